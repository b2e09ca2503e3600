//! World serialization: full binary snapshots, stateful deltas, JSON, and
//! base64.

pub mod base64;
pub mod binary;
pub(crate) mod codec;
pub mod delta;
pub mod json;

use crate::error::Result;
use crate::registry::Registry;
use crate::world::World;
use std::sync::Arc;

pub use delta::{apply_delta, DeltaSerializer};

/// Binary wire format version.
pub const SERIALIZER_VERSION: u16 = 2;

/// Faux value sentinel: explicit null.
pub const NULL_FLAG: u8 = 254;
/// Faux value sentinel: no value stored.
pub const UNDEFINED_FLAG: u8 = 255;
/// Faux value marker: a concrete payload follows.
pub const CONCRETE_VALUE_MARKER: u8 = 0;
/// Absent slot in the 16-bit sparse set wire layout.
pub const SPARSE_SET_ABSENT_U16: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationMode {
    Json,
    Binary,
    Base64,
}

/// A serialized world in one of the three modes.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldSnapshot {
    Json(String),
    Binary(Vec<u8>),
    Base64(String),
}

/// Serializes a world in the requested mode.
pub fn serialize_world(mode: SerializationMode, world: &World) -> Result<WorldSnapshot> {
    Ok(match mode {
        SerializationMode::Json => WorldSnapshot::Json(json::encode_world(world)?),
        SerializationMode::Binary => WorldSnapshot::Binary(binary::encode_world(world)?),
        SerializationMode::Base64 => {
            WorldSnapshot::Base64(base64::encode(&binary::encode_world(world)?))
        }
    })
}

/// Deserializes a snapshot into an existing world, replacing its state.
pub fn deserialize_world_into(snapshot: &WorldSnapshot, world: &mut World) -> Result<()> {
    match snapshot {
        WorldSnapshot::Json(text) => json::decode_into(text, world),
        WorldSnapshot::Binary(bytes) => binary::decode_into(bytes, world),
        WorldSnapshot::Base64(text) => binary::decode_into(&base64::decode(text)?, world),
    }
}

/// Deserializes a snapshot into a fresh world created from the registry.
pub fn deserialize_world(snapshot: &WorldSnapshot, registry: &Arc<Registry>) -> Result<World> {
    let mut world = registry.create_world(None);
    deserialize_world_into(snapshot, &mut world)?;
    Ok(world)
}
