//! Columnar ECS simulation runtime with snapshot and delta serialization.
//!
//! Worlds store entities as rows of per-component typed columns, match
//! them against bitmask-driven queries, and run depth-ordered systems over
//! the matches. The whole world state round-trips through JSON, binary,
//! and base64 snapshots; a stateful delta serializer diffs columns against
//! shadow copies for incremental updates.

pub mod error;
pub mod query;
pub mod registry;
pub mod schema;
pub mod serialize;
pub mod storage;
pub mod system;
pub mod world;

pub use error::{Result, SimEcsError, ValidationIssue};
pub use query::QueryInstance;
pub use registry::{
    create_world, define_component, define_query, define_system, delete_world,
    get_component_by_type, Registry, DEFAULT_WORLD_SIZE,
};
pub use schema::{ComponentBuilder, ComponentSchema, ElementType, FauxKind, SchemaParser};
pub use serialize::{
    apply_delta, deserialize_world, deserialize_world_into, serialize_world, DeltaSerializer,
    SerializationMode, WorldSnapshot, SERIALIZER_VERSION,
};
pub use system::System;
pub use world::{Eid, World, EID_UNSET};
