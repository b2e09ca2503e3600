//! Full binary snapshots (wire version 2).
//!
//! Frame layout: `u16 version`, `u8 mode`, then the header (entity
//! sparse set, removed queue, cursor, size, bitflag, frame, component map,
//! query states, dirty queries) followed by the entities block: a
//! length-prefixed pid region of `(pid, write count, entity values)` runs
//! and a length-prefixed out-of-band complex-data buffer holding JSON for
//! values the inline encoding cannot express. A world with no live
//! entities serializes to just the version and mode bytes.

use crate::error::{Result, SimEcsError};
use crate::query::{QueryInstance, QueryState};
use crate::schema::FauxKind;
use crate::serialize::codec::{Reader, Writer};
use crate::serialize::{
    CONCRETE_VALUE_MARKER, NULL_FLAG, SERIALIZER_VERSION, UNDEFINED_FLAG,
};
use crate::storage::{Column, SparseSet};
use crate::world::{Eid, RegisteredComponent, World};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub(crate) const MODE_FULL: u8 = 0;
pub(crate) const MODE_DELTA: u8 = 1;

/// Out-of-band complex data: eid -> component type -> property key ->
/// JSON-encoded value.
pub(crate) type ComplexMap = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

/// One slot of the global flattened property walk: a component's column,
/// or the component itself for tag stores.
pub(crate) struct PidEntry {
    pub(crate) comp: usize,
    pub(crate) col: Option<usize>,
}

/// The flattened pid table in component-map insertion order.
pub(crate) fn pid_entries(world: &World) -> Vec<PidEntry> {
    let mut out = Vec::new();
    for (ci, comp) in world.components.iter().enumerate() {
        if comp.store.is_tag() {
            out.push(PidEntry { comp: ci, col: None });
        } else {
            for col in 0..comp.store.columns().len() {
                out.push(PidEntry { comp: ci, col: Some(col) });
            }
        }
    }
    out
}

/// Entities carrying the component, in entity sparse set dense order.
pub(crate) fn members_of(world: &World, ci: usize) -> Vec<Eid> {
    let comp = &world.components[ci];
    world
        .entities
        .dense()
        .iter()
        .copied()
        .filter(|&eid| {
            world.masks[comp.generation_id][eid as usize] & comp.bitflag == comp.bitflag
        })
        .collect()
}

/// Serializes a full snapshot (mode 0).
pub fn encode_world(world: &World) -> Result<Vec<u8>> {
    let mut w = Writer::with_capacity(256);
    w.put_u16(SERIALIZER_VERSION);
    w.put_u8(MODE_FULL);
    if world.entities.is_empty() {
        return Ok(w.into_vec());
    }
    write_header(&mut w, world);

    let mut region = Writer::new();
    let mut complex = ComplexMap::new();
    for (pid, entry) in pid_entries(world).iter().enumerate() {
        let members = members_of(world, entry.comp);
        region.put_u16(pid as u16);
        region.put_u32(members.len() as u32);
        for &eid in &members {
            region.put_u32(eid);
            if let Some(col) = entry.col {
                write_column_full(&mut region, &world.components[entry.comp], col, eid, &mut complex)?;
            }
        }
    }
    finish_entities_block(&mut w, region, &complex)?;
    let bytes = w.into_vec();
    log::debug!("serialized full snapshot: {} bytes", bytes.len());
    Ok(bytes)
}

/// Decodes a snapshot or delta buffer into an existing world. Rejects
/// version mismatches, and mode-1 buffers unless a baseline snapshot has
/// been applied to this world before.
pub fn decode_into(bytes: &[u8], world: &mut World) -> Result<()> {
    let mut r = Reader::new(bytes);
    let version = r.get_u16()?;
    if version != SERIALIZER_VERSION {
        return Err(SimEcsError::VersionMismatch {
            expected: SERIALIZER_VERSION,
            found: version,
        });
    }
    match r.get_u8()? {
        MODE_FULL => {
            if r.remaining() == 0 {
                reset_world_empty(world);
                world.delta_baseline = true;
                return Ok(());
            }
            let header = read_header(&mut r)?;
            apply_header_full(world, header)?;
            let entries = pid_entries(world);
            read_entities_block(&mut r, world, &entries)?;
            rebind_system_queries(world);
            world.delta_baseline = true;
            Ok(())
        }
        MODE_DELTA => {
            if !world.delta_baseline {
                return Err(SimEcsError::DeltaWithoutBaseline);
            }
            if r.remaining() == 0 {
                reset_world_empty(world);
                return Ok(());
            }
            let header = read_header(&mut r)?;
            let entries = apply_header_delta(world, header)?;
            read_entities_block(&mut r, world, &entries)?;
            rebind_system_queries(world);
            Ok(())
        }
        other => Err(SimEcsError::Corrupt(format!("unknown mode byte {}", other))),
    }
}

pub(crate) fn write_header(w: &mut Writer, world: &World) {
    w.put_sparse_set(&world.entities);
    w.put_uint_array(world.removed.iter().copied());
    w.put_u16(world.entity_cursor as u16);
    w.put_u16(world.size as u16);
    w.put_u32(world.bitflag);
    w.put_u32(world.frame);

    w.put_u16(world.components.len() as u16);
    for comp in &world.components {
        w.put_string(comp.schema.type_name());
        w.put_u32(comp.generation_id as u32);
        w.put_u32(comp.bitflag);
    }

    w.put_u16(world.queries.len() as u16);
    for state in &world.queries {
        w.put_string(&state.key);
        write_query(w, state);
    }

    w.put_u16(world.dirty_queries.len() as u16);
    for key in &world.dirty_queries {
        w.put_string(key);
    }
}

fn write_query(w: &mut Writer, state: &QueryState) {
    w.put_sparse_set(&state.members);
    w.put_sparse_set(&state.to_remove);
    w.put_sparse_set(&state.entered);
    w.put_string(&state.key);
    w.put_number_object(&state.masks);
    let generations: Vec<f64> = state.generations.iter().map(|&g| g as f64).collect();
    w.put_number_array(&generations);
}

pub(crate) struct WireQuery {
    pub(crate) key: String,
    pub(crate) members: SparseSet,
    pub(crate) to_remove: SparseSet,
    pub(crate) entered: SparseSet,
    pub(crate) masks: BTreeMap<u32, u32>,
    pub(crate) generations: Vec<u32>,
}

pub(crate) struct WireHeader {
    pub(crate) entities: SparseSet,
    pub(crate) removed: Vec<u32>,
    pub(crate) entity_cursor: u16,
    pub(crate) size: u16,
    pub(crate) bitflag: u32,
    pub(crate) frame: u32,
    pub(crate) components: Vec<(String, u32, u32)>,
    pub(crate) queries: Vec<WireQuery>,
    pub(crate) dirty: Vec<String>,
}

pub(crate) fn read_header(r: &mut Reader<'_>) -> Result<WireHeader> {
    let entities = r.get_sparse_set()?;
    let removed = r.get_uint_array()?;
    let entity_cursor = r.get_u16()?;
    let size = r.get_u16()?;
    let bitflag = r.get_u32()?;
    let frame = r.get_u32()?;

    let component_count = r.get_u16()? as usize;
    let mut components = Vec::with_capacity(component_count);
    for _ in 0..component_count {
        let name = r.get_string()?;
        let generation = r.get_u32()?;
        let flag = r.get_u32()?;
        components.push((name, generation, flag));
    }

    let query_count = r.get_u16()? as usize;
    let mut queries = Vec::with_capacity(query_count);
    for _ in 0..query_count {
        let _outer_key = r.get_string()?;
        let members = r.get_sparse_set()?;
        let to_remove = r.get_sparse_set()?;
        let entered = r.get_sparse_set()?;
        let key = r.get_string()?;
        let masks = r.get_number_object()?;
        let generations: Vec<u32> = r.get_number_array()?.into_iter().map(|g| g as u32).collect();
        queries.push(WireQuery {
            key,
            members,
            to_remove,
            entered,
            masks,
            generations,
        });
    }

    let dirty_count = r.get_u16()? as usize;
    let mut dirty = Vec::with_capacity(dirty_count);
    for _ in 0..dirty_count {
        dirty.push(r.get_string()?);
    }

    Ok(WireHeader {
        entities,
        removed,
        entity_cursor,
        size,
        bitflag,
        frame,
        components,
        queries,
        dirty,
    })
}

/// Full apply: the world's entity state, component map, and query states
/// are rebuilt from the wire in wire order.
pub(crate) fn apply_header_full(world: &mut World, header: WireHeader) -> Result<()> {
    world.size = header.size as usize;
    world.entities = header.entities;
    world.removed = header.removed.into_iter().collect();
    world.entity_cursor = header.entity_cursor as u32;
    world.bitflag = header.bitflag;
    world.frame = header.frame;

    let generations = header
        .components
        .iter()
        .map(|&(_, generation, _)| generation as usize + 1)
        .max()
        .unwrap_or(1);
    world.masks = vec![vec![0; world.size]; generations];
    world.components.clear();
    world.component_index.clear();
    for (name, generation, flag) in header.components {
        let schema = world
            .registry
            .get_component_by_type(&name)
            .ok_or_else(|| SimEcsError::UnknownComponentType(name.clone()))?;
        world.register_component_raw(schema, generation as usize, flag);
    }

    apply_queries(world, header.queries, header.dirty);
    Ok(())
}

/// Delta apply: entity state and query states are replaced, components are
/// reconciled by name (never rebuilt, so baseline column data survives),
/// and the pid table is built in wire order.
fn apply_header_delta(world: &mut World, header: WireHeader) -> Result<Vec<PidEntry>> {
    world.entities = header.entities;
    world.removed = header.removed.into_iter().collect();
    world.entity_cursor = header.entity_cursor as u32;
    world.bitflag = header.bitflag;
    world.frame = header.frame;

    let mut entries = Vec::new();
    for (name, generation, flag) in header.components {
        let ci = match world.component_index.get(&name) {
            Some(&ci) => ci,
            None => {
                let schema = world
                    .registry
                    .get_component_by_type(&name)
                    .ok_or_else(|| SimEcsError::UnknownComponentType(name.clone()))?;
                world.register_component_raw(schema, generation as usize, flag)
            }
        };
        if world.components[ci].store.is_tag() {
            entries.push(PidEntry { comp: ci, col: None });
        } else {
            for col in 0..world.components[ci].store.columns().len() {
                entries.push(PidEntry { comp: ci, col: Some(col) });
            }
        }
    }

    apply_queries(world, header.queries, header.dirty);
    Ok(entries)
}

fn apply_queries(world: &mut World, queries: Vec<WireQuery>, dirty: Vec<String>) {
    world.queries.clear();
    world.query_index.clear();
    for wq in queries {
        let idx = world.queries.len();
        world.query_index.insert(wq.key.clone(), idx);
        world.queries.push(QueryState {
            component_names: wq.key.split('|').filter(|s| !s.is_empty()).map(String::from).collect(),
            key: wq.key,
            members: wq.members,
            entered: wq.entered,
            to_remove: wq.to_remove,
            masks: wq.masks,
            generations: wq.generations,
        });
    }
    world.dirty_queries = dirty;
}

/// Re-binds per-world system instances to rebuilt query states. Runs after
/// the entities region so a query unknown to the encoder is populated from
/// the restored masks.
pub(crate) fn rebind_system_queries(world: &mut World) {
    let bindings: Vec<(usize, Arc<QueryInstance>)> = world
        .systems
        .iter()
        .enumerate()
        .map(|(i, ws)| (i, ws.query.clone()))
        .collect();
    for (i, query) in bindings {
        let qi = world.ensure_query(&query);
        world.systems[i].query_idx = qi;
    }
}

/// Resets a world to the state an empty snapshot denotes: no entities, no
/// memberships, zeroed masks and stores. Registered components survive.
pub(crate) fn reset_world_empty(world: &mut World) {
    world.entities.reset(None, None);
    world.removed.clear();
    world.entity_cursor = 0;
    world.frame = 0;
    for generation in &mut world.masks {
        generation.fill(0);
    }
    for comp in &mut world.components {
        comp.store.reset();
    }
    for state in &mut world.queries {
        state.members.reset(None, None);
        state.entered.reset(None, None);
        state.to_remove.reset(None, None);
    }
    world.dirty_queries.clear();
}

fn write_column_full(
    region: &mut Writer,
    comp: &RegisteredComponent,
    col: usize,
    eid: Eid,
    complex: &mut ComplexMap,
) -> Result<()> {
    let store = &comp.store;
    match store.column(col) {
        Column::Scalar { data, .. } => {
            region.put_element(data.element(), store.scalar_get(col, eid));
        }
        Column::SubArray {
            element,
            length,
            index_type,
            ..
        } => {
            // Full write: all indices 0..length.
            region.put_element(*index_type, *length as f64);
            for i in 0..*length {
                region.put_element(*index_type, i as f64);
                region.put_element(*element, store.sub_get(col, eid, i));
            }
        }
        Column::Faux { key, kind, .. } => {
            let type_name = comp.schema.type_name();
            if let Some(json) =
                write_faux_entry(region, type_name, key, kind, store.faux_get(col, eid))?
            {
                complex
                    .entry(eid.to_string())
                    .or_default()
                    .entry(type_name.to_string())
                    .or_default()
                    .insert(key.clone(), json);
            }
        }
    }
    Ok(())
}

pub(crate) fn finish_entities_block(
    w: &mut Writer,
    region: Writer,
    complex: &ComplexMap,
) -> Result<()> {
    let region_bytes = region.into_vec();
    w.put_u32(region_bytes.len() as u32);
    w.extend(&region_bytes);

    let complex_bytes: Vec<u8> = if complex.is_empty() {
        Vec::new()
    } else {
        let text = serde_json::to_string(complex)
            .map_err(|e| SimEcsError::JsonError(e.to_string()))?;
        text.chars().map(|c| (c as u32 & 0xFF) as u8).collect()
    };
    w.put_u32(complex_bytes.len() as u32);
    w.extend(&complex_bytes);
    Ok(())
}

fn read_entities_block(r: &mut Reader<'_>, world: &mut World, entries: &[PidEntry]) -> Result<()> {
    let region_len = r.get_u32()? as usize;
    let region = r.take(region_len)?;
    apply_region(world, region, entries)?;
    let complex_len = r.get_u32()? as usize;
    let complex = r.take(complex_len)?;
    apply_complex(world, complex)
}

fn apply_region(world: &mut World, region: &[u8], entries: &[PidEntry]) -> Result<()> {
    let mut r = Reader::new(region);
    while r.remaining() > 0 {
        let pid = r.get_u16()? as usize;
        let count = r.get_u32()? as usize;
        let entry = entries
            .get(pid)
            .ok_or_else(|| SimEcsError::Corrupt(format!("pid {} out of range", pid)))?;
        let (generation_id, bitflag) = {
            let comp = &world.components[entry.comp];
            (comp.generation_id, comp.bitflag)
        };
        for _ in 0..count {
            let eid = r.get_u32()?;
            if eid as usize >= world.size {
                return Err(SimEcsError::Corrupt(format!(
                    "eid {} outside world of size {}",
                    eid, world.size
                )));
            }
            world.masks[generation_id][eid as usize] |= bitflag;
            if let Some(col) = entry.col {
                read_column_into(&mut r, world, entry.comp, col, eid)?;
            }
        }
    }
    Ok(())
}

fn read_column_into(
    r: &mut Reader<'_>,
    world: &mut World,
    ci: usize,
    col: usize,
    eid: Eid,
) -> Result<()> {
    enum Meta {
        Scalar(crate::schema::ElementType),
        Sub {
            element: crate::schema::ElementType,
            index_type: crate::schema::ElementType,
            length: usize,
        },
        Faux(FauxKind),
    }
    let meta = match world.components[ci].store.column(col) {
        Column::Scalar { data, .. } => Meta::Scalar(data.element()),
        Column::SubArray {
            element,
            index_type,
            length,
            ..
        } => Meta::Sub {
            element: *element,
            index_type: *index_type,
            length: *length,
        },
        Column::Faux { kind, .. } => Meta::Faux(kind.clone()),
    };

    match meta {
        Meta::Scalar(element) => {
            let v = r.get_element(element)?;
            world.components[ci].store.scalar_set(col, eid, v);
        }
        Meta::Sub {
            element,
            index_type,
            length,
        } => {
            let count = r.get_element(index_type)? as usize;
            for _ in 0..count {
                let i = r.get_element(index_type)? as usize;
                let v = r.get_element(element)?;
                if i >= length {
                    return Err(SimEcsError::Corrupt(format!(
                        "sub-array index {} outside length {}",
                        i, length
                    )));
                }
                world.components[ci].store.sub_set(col, eid, i, v);
            }
        }
        Meta::Faux(kind) => match read_faux_entry(r, &kind)? {
            FauxRead::Undefined => world.components[ci].store.faux_remove(col, eid),
            FauxRead::Concrete(v) => world.components[ci].store.faux_set(col, eid, v),
            // The complex buffer pass writes the value.
            FauxRead::Complex => {}
        },
    }
    Ok(())
}

/// Inline faux entry: one of the null/undefined sentinels, or the concrete
/// marker followed by the kind's payload. Non-inline kinds return the JSON
/// text destined for the complex buffer instead of writing a payload.
/// A value that does not fit the declared kind is `UnsupportedTypeTag`.
pub(crate) fn write_faux_entry(
    w: &mut Writer,
    component: &str,
    key: &str,
    kind: &FauxKind,
    value: Option<&Value>,
) -> Result<Option<String>> {
    match value {
        None => {
            w.put_u8(UNDEFINED_FLAG);
            Ok(None)
        }
        Some(Value::Null) => {
            w.put_u8(NULL_FLAG);
            Ok(None)
        }
        Some(v) => {
            w.put_u8(CONCRETE_VALUE_MARKER);
            if kind.is_inline() {
                write_faux_payload(w, component, key, kind, v)?;
                Ok(None)
            } else {
                let json = serde_json::to_string(v)
                    .map_err(|e| SimEcsError::JsonError(e.to_string()))?;
                Ok(Some(json))
            }
        }
    }
}

fn unsupported(component: &str, key: &str) -> SimEcsError {
    SimEcsError::UnsupportedTypeTag {
        component: component.to_string(),
        key: key.to_string(),
    }
}

fn write_faux_payload(
    w: &mut Writer,
    component: &str,
    key: &str,
    kind: &FauxKind,
    value: &Value,
) -> Result<()> {
    match kind {
        FauxKind::Str => {
            let s = value.as_str().ok_or_else(|| unsupported(component, key))?;
            let len = s.chars().count().min(255);
            w.put_u8(len as u8);
            for c in s.chars().take(len) {
                w.put_u8((c as u32 & 0xFF) as u8);
            }
        }
        FauxKind::Number => {
            w.put_f64(value.as_f64().ok_or_else(|| unsupported(component, key))?)
        }
        FauxKind::Boolean => {
            w.put_u8(value.as_bool().ok_or_else(|| unsupported(component, key))? as u8)
        }
        FauxKind::Object(props) => {
            if !value.is_object() {
                return Err(unsupported(component, key));
            }
            let mut ordered: Vec<&(String, FauxKind)> = props.iter().collect();
            ordered.sort_by(|a, b| a.0.cmp(&b.0));
            for (sub_key, sub_kind) in ordered {
                write_faux_entry(w, component, key, sub_kind, value.get(sub_key))?;
            }
        }
        FauxKind::Array(elem) => {
            let items = value.as_array().ok_or_else(|| unsupported(component, key))?;
            w.put_u16(items.len() as u16);
            for item in items {
                write_faux_entry(w, component, key, elem, Some(item))?;
            }
        }
        FauxKind::Json => return Err(unsupported(component, key)),
    }
    Ok(())
}

pub(crate) enum FauxRead {
    Undefined,
    Concrete(Value),
    Complex,
}

pub(crate) fn read_faux_entry(r: &mut Reader<'_>, kind: &FauxKind) -> Result<FauxRead> {
    match r.get_u8()? {
        UNDEFINED_FLAG => Ok(FauxRead::Undefined),
        NULL_FLAG => Ok(FauxRead::Concrete(Value::Null)),
        CONCRETE_VALUE_MARKER => {
            if kind.is_inline() {
                Ok(FauxRead::Concrete(read_faux_payload(r, kind)?))
            } else {
                Ok(FauxRead::Complex)
            }
        }
        other => Err(SimEcsError::Corrupt(format!(
            "unknown faux flag byte {}",
            other
        ))),
    }
}

fn read_faux_payload(r: &mut Reader<'_>, kind: &FauxKind) -> Result<Value> {
    Ok(match kind {
        FauxKind::Str => {
            let len = r.get_u8()? as usize;
            let bytes = r.take(len)?;
            Value::String(bytes.iter().map(|&b| b as char).collect())
        }
        FauxKind::Number => serde_json::Number::from_f64(r.get_f64()?)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        FauxKind::Boolean => Value::Bool(r.get_u8()? != 0),
        FauxKind::Object(props) => {
            let mut ordered: Vec<&(String, FauxKind)> = props.iter().collect();
            ordered.sort_by(|a, b| a.0.cmp(&b.0));
            let mut obj = serde_json::Map::new();
            for (key, sub_kind) in ordered {
                match read_faux_entry(r, sub_kind)? {
                    FauxRead::Concrete(v) => {
                        obj.insert(key.clone(), v);
                    }
                    FauxRead::Undefined => {}
                    FauxRead::Complex => {
                        return Err(SimEcsError::Corrupt(
                            "complex value inside inline object".to_string(),
                        ))
                    }
                }
            }
            Value::Object(obj)
        }
        FauxKind::Array(elem) => {
            let len = r.get_u16()? as usize;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                match read_faux_entry(r, elem)? {
                    FauxRead::Concrete(v) => items.push(v),
                    FauxRead::Undefined => items.push(Value::Null),
                    FauxRead::Complex => {
                        return Err(SimEcsError::Corrupt(
                            "complex value inside inline array".to_string(),
                        ))
                    }
                }
            }
            Value::Array(items)
        }
        FauxKind::Json => {
            return Err(SimEcsError::Corrupt(
                "opaque JSON kind has no inline payload".to_string(),
            ))
        }
    })
}

pub(crate) fn apply_complex(world: &mut World, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let text: String = bytes.iter().map(|&b| b as char).collect();
    let map: ComplexMap =
        serde_json::from_str(&text).map_err(|e| SimEcsError::Corrupt(format!("complex buffer: {}", e)))?;
    for (eid_str, comps) in map {
        let eid: Eid = eid_str
            .parse()
            .map_err(|_| SimEcsError::Corrupt(format!("bad eid key '{}'", eid_str)))?;
        for (comp_name, props) in comps {
            let Some(&ci) = world.component_index.get(&comp_name) else {
                continue;
            };
            for (key, json) in props {
                let Some(col) = world.components[ci].store.column_index(&key) else {
                    continue;
                };
                let value: Value = serde_json::from_str(&json)
                    .map_err(|e| SimEcsError::Corrupt(format!("complex value: {}", e)))?;
                world.components[ci].store.faux_set(col, eid, value);
            }
        }
    }
    Ok(())
}
