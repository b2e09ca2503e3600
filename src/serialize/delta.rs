//! Stateful delta serialization.
//!
//! A [`DeltaSerializer`] keeps shadow copies of every column plus
//! per-component membership caches. Its first call produces a full
//! snapshot while installing the shadows; later calls emit mode-1 buffers
//! carrying only values that differ from the shadows (newly-added members
//! are written in full). Headers are always complete; the savings live in
//! the entities block, where unchanged entities and silent pids are
//! rewound out of the buffer.
//!
//! `apply_delta` patches only the `(pid, eid, value)` tuples present in
//! the buffer. Removed components are a known gap: a delta never clears a
//! mask bit on the receiving world, so senders must follow removals with a
//! full snapshot.

use crate::error::Result;
use crate::serialize::binary::{
    self, finish_entities_block, members_of, pid_entries, write_faux_entry, write_header,
    ComplexMap, MODE_DELTA,
};
use crate::serialize::codec::Writer;
use crate::serialize::SERIALIZER_VERSION;
use crate::storage::{Column, Shadow};
use crate::world::{Eid, RegisteredComponent, World};
use std::collections::{HashMap, HashSet};

pub struct DeltaSerializer {
    /// Shadow per (component type, column), keyed by property identity.
    shadows: HashMap<(String, usize), Shadow>,
    /// Members of each component's store at the previous serialization.
    membership: HashMap<String, HashSet<Eid>>,
    baseline: bool,
}

impl Default for DeltaSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaSerializer {
    pub fn new() -> DeltaSerializer {
        DeltaSerializer {
            shadows: HashMap::new(),
            membership: HashMap::new(),
            baseline: false,
        }
    }

    /// Drops the baseline; the next `serialize` emits a full snapshot.
    /// Call this after any mutation the delta stream should not carry.
    pub fn reset(&mut self) {
        self.shadows.clear();
        self.membership.clear();
        self.baseline = false;
    }

    /// Serializes the world: a full snapshot on the first call (or after
    /// `reset`), a delta against the shadows afterwards. `max_bytes` is a
    /// buffer capacity hint.
    pub fn serialize(&mut self, world: &World, max_bytes: Option<usize>) -> Result<Vec<u8>> {
        if self.baseline {
            self.serialize_delta(world, max_bytes)
        } else {
            let bytes = binary::encode_world(world)?;
            self.sync_all(world);
            self.baseline = true;
            Ok(bytes)
        }
    }

    fn sync_all(&mut self, world: &World) {
        self.shadows.clear();
        self.membership.clear();
        for (ci, comp) in world.components.iter().enumerate() {
            let name = comp.schema.type_name().to_string();
            for col in 0..comp.store.columns().len() {
                self.shadows
                    .insert((name.clone(), col), comp.store.create_shadow(col));
            }
            self.membership
                .insert(name, members_of(world, ci).into_iter().collect());
        }
    }

    fn serialize_delta(&mut self, world: &World, max_bytes: Option<usize>) -> Result<Vec<u8>> {
        let mut w = Writer::with_capacity(max_bytes.unwrap_or(256));
        w.put_u16(SERIALIZER_VERSION);
        w.put_u8(MODE_DELTA);
        if world.entities.is_empty() {
            self.sync_all(world);
            return Ok(w.into_vec());
        }
        write_header(&mut w, world);

        let mut region = Writer::new();
        let mut complex = ComplexMap::new();
        for (pid, entry) in pid_entries(world).iter().enumerate() {
            let comp = &world.components[entry.comp];
            let name = comp.schema.type_name();
            let members = members_of(world, entry.comp);
            let prev = self.membership.get(name);

            let pid_start = region.len();
            region.put_u16(pid as u16);
            let count_pos = region.len();
            region.put_u32(0);
            let mut count: u32 = 0;

            match entry.col {
                None => {
                    // Tag: only newly-added members are worth a write.
                    for &eid in &members {
                        if prev.map_or(true, |p| !p.contains(&eid)) {
                            region.put_u32(eid);
                            count += 1;
                        }
                    }
                }
                Some(col) => {
                    let shadow_key = (name.to_string(), col);
                    let mut shadow = self
                        .shadows
                        .remove(&shadow_key)
                        .unwrap_or_else(|| comp.store.create_shadow(col));
                    for &eid in &members {
                        let newly = prev.map_or(true, |p| !p.contains(&eid));
                        let eid_start = region.len();
                        region.put_u32(eid);
                        let wrote = write_column_delta(
                            &mut region,
                            comp,
                            col,
                            eid,
                            newly,
                            &mut shadow,
                            &mut complex,
                        )?;
                        if wrote {
                            count += 1;
                        } else {
                            region.truncate(eid_start);
                        }
                    }
                    self.shadows.insert(shadow_key, shadow);
                }
            }

            if count == 0 {
                // Silent pid: rewind the 6-byte header too.
                region.truncate(pid_start);
            } else {
                region.patch_u32(count_pos, count);
            }
        }

        for (ci, comp) in world.components.iter().enumerate() {
            self.membership.insert(
                comp.schema.type_name().to_string(),
                members_of(world, ci).into_iter().collect(),
            );
        }

        finish_entities_block(&mut w, region, &complex)?;
        let bytes = w.into_vec();
        log::debug!("serialized delta: {} bytes", bytes.len());
        Ok(bytes)
    }
}

/// Emits one column slot if it differs from its shadow (or the entity is
/// newly added), syncing the shadow either way. Returns whether anything
/// was written.
fn write_column_delta(
    region: &mut Writer,
    comp: &RegisteredComponent,
    col: usize,
    eid: Eid,
    newly: bool,
    shadow: &mut Shadow,
    complex: &mut ComplexMap,
) -> Result<bool> {
    let store = &comp.store;
    match (store.column(col), shadow) {
        (Column::Scalar { data, .. }, Shadow::Scalar(sh)) => {
            let changed = !data.eq_at(eid as usize, sh, eid as usize);
            sh.set(eid as usize, data.get(eid as usize));
            if newly || changed {
                region.put_element(data.element(), data.get(eid as usize));
                Ok(true)
            } else {
                Ok(false)
            }
        }
        (
            Column::SubArray {
                element,
                length,
                index_type,
                ..
            },
            Shadow::SubArray(sh),
        ) => {
            let parent = store.parent_buffer(col).expect("sub-array parent buffer");
            let shadow_base = eid as usize * length;
            let mut changed = Vec::new();
            for i in 0..*length {
                let cur = store.sub_get(col, eid, i);
                if !sh.eq_at(shadow_base + i, parent, parent_index(store, col, eid, i)) {
                    changed.push(i);
                    sh.set(shadow_base + i, cur);
                }
            }
            if newly {
                region.put_element(*index_type, *length as f64);
                for i in 0..*length {
                    region.put_element(*index_type, i as f64);
                    region.put_element(*element, store.sub_get(col, eid, i));
                }
                Ok(true)
            } else if !changed.is_empty() {
                region.put_element(*index_type, changed.len() as f64);
                for i in changed {
                    region.put_element(*index_type, i as f64);
                    region.put_element(*element, store.sub_get(col, eid, i));
                }
                Ok(true)
            } else {
                Ok(false)
            }
        }
        (Column::Faux { key, kind, .. }, Shadow::Faux(map)) => {
            let cur = store.faux_get(col, eid);
            let changed = cur != map.get(&eid);
            if newly || changed {
                match cur {
                    Some(v) => {
                        map.insert(eid, v.clone());
                    }
                    None => {
                        map.remove(&eid);
                    }
                }
                let type_name = comp.schema.type_name();
                if let Some(json) = write_faux_entry(region, type_name, key, kind, cur)? {
                    complex
                        .entry(eid.to_string())
                        .or_default()
                        .entry(type_name.to_string())
                        .or_default()
                        .insert(key.clone(), json);
                }
                Ok(true)
            } else {
                Ok(false)
            }
        }
        _ => unreachable!("shadow kind matches column kind"),
    }
}

/// Absolute index of `(eid, i)` of a sub-array column inside its shared
/// parent buffer.
fn parent_index(store: &crate::storage::Store, col: usize, eid: Eid, i: usize) -> usize {
    match store.column(col) {
        Column::SubArray { base, length, .. } => base * store.size() + eid as usize * length + i,
        _ => unreachable!("parent_index on a sub-array column"),
    }
}

/// Applies a snapshot or delta buffer to a world. Mode-0 buffers replace
/// the world state and establish the delta baseline; mode-1 buffers
/// require a prior baseline and patch only the tuples present.
pub fn apply_delta(bytes: &[u8], world: &mut World) -> Result<()> {
    binary::decode_into(bytes, world)
}
