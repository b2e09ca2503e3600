//! JSON serialization mode.
//!
//! A structured mirror of the binary snapshot's logical data: entity
//! sparse set, removed queue, component map (as `[type, {generationId,
//! bitflag}]` pairs in insertion order), query map, dirty query list, and
//! per-entity component objects with booleans coerced to native booleans.

use crate::error::{Result, SimEcsError};
use crate::serialize::binary::{apply_header_full, rebind_system_queries, WireHeader, WireQuery};
use crate::storage::SparseSet;
use crate::world::{Eid, World};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub fn encode_world(world: &World) -> Result<String> {
    let component_map: Vec<Value> = world
        .components
        .iter()
        .map(|comp| {
            json!([
                comp.schema.type_name(),
                { "generationId": comp.generation_id, "bitflag": comp.bitflag }
            ])
        })
        .collect();

    let mut query_map = Map::new();
    for state in &world.queries {
        let masks: Map<String, Value> = state
            .masks
            .iter()
            .map(|(g, m)| (g.to_string(), json!(m)))
            .collect();
        query_map.insert(
            state.key.clone(),
            json!({
                "entities": sparse_set_to_json(&state.members),
                "toRemove": sparse_set_to_json(&state.to_remove),
                "entered": sparse_set_to_json(&state.entered),
                "queryKey": state.key,
                "masks": masks,
                "generations": state.generations,
            }),
        );
    }

    let mut entities = Vec::new();
    for &eid in world.entities.dense() {
        let mut components = Map::new();
        for comp in &world.components {
            if world.masks[comp.generation_id][eid as usize] & comp.bitflag != comp.bitflag {
                continue;
            }
            let mut object = Map::new();
            for (col, column) in comp.store.columns().iter().enumerate() {
                object.insert(column.key().to_string(), comp.store.read_value(col, eid));
            }
            components.insert(comp.schema.type_name().to_string(), Value::Object(object));
        }
        entities.push(json!({ "entityId": eid, "components": components }));
    }

    let doc = json!({
        "entitySparseSet": sparse_set_to_json(&world.entities),
        "removed": world.removed.iter().collect::<Vec<_>>(),
        "entityCursor": world.entity_cursor,
        "size": world.size,
        "bitflag": world.bitflag,
        "frame": world.frame,
        "componentMap": component_map,
        "queryMap": query_map,
        "dirtyQueries": world.dirty_queries,
        "entities": entities,
    });
    serde_json::to_string(&doc).map_err(|e| SimEcsError::JsonError(e.to_string()))
}

pub fn decode_into(text: &str, world: &mut World) -> Result<()> {
    let doc: Value =
        serde_json::from_str(text).map_err(|e| SimEcsError::JsonError(e.to_string()))?;

    let components = doc["componentMap"]
        .as_array()
        .ok_or_else(|| corrupt("componentMap"))?
        .iter()
        .map(|pair| {
            let name = pair[0].as_str().ok_or_else(|| corrupt("component type"))?;
            let generation = pair[1]["generationId"].as_u64().unwrap_or(0) as u32;
            let flag = pair[1]["bitflag"].as_u64().unwrap_or(0) as u32;
            Ok((name.to_string(), generation, flag))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut queries = Vec::new();
    if let Some(map) = doc["queryMap"].as_object() {
        for (key, q) in map {
            let mut masks = BTreeMap::new();
            if let Some(m) = q["masks"].as_object() {
                for (g, v) in m {
                    let generation: u32 = g.parse().map_err(|_| corrupt("mask generation"))?;
                    masks.insert(generation, v.as_u64().unwrap_or(0) as u32);
                }
            }
            queries.push(WireQuery {
                key: key.clone(),
                members: sparse_set_from_json(&q["entities"])?,
                to_remove: sparse_set_from_json(&q["toRemove"])?,
                entered: sparse_set_from_json(&q["entered"])?,
                masks,
                generations: q["generations"]
                    .as_array()
                    .map(|a| a.iter().filter_map(|v| v.as_u64()).map(|v| v as u32).collect())
                    .unwrap_or_default(),
            });
        }
    }

    let header = WireHeader {
        entities: sparse_set_from_json(&doc["entitySparseSet"])?,
        removed: doc["removed"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_u64()).map(|v| v as u32).collect())
            .unwrap_or_default(),
        entity_cursor: doc["entityCursor"].as_u64().unwrap_or(0) as u16,
        size: doc["size"].as_u64().unwrap_or(0) as u16,
        bitflag: doc["bitflag"].as_u64().unwrap_or(1) as u32,
        frame: doc["frame"].as_u64().unwrap_or(0) as u32,
        components,
        queries,
        dirty: doc["dirtyQueries"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str()).map(String::from).collect())
            .unwrap_or_default(),
    };
    apply_header_full(world, header)?;

    if let Some(entities) = doc["entities"].as_array() {
        for entry in entities {
            let eid = entry["entityId"].as_u64().ok_or_else(|| corrupt("entityId"))? as Eid;
            if eid as usize >= world.size {
                return Err(corrupt("entityId out of range"));
            }
            let Some(components) = entry["components"].as_object() else {
                continue;
            };
            for (type_name, object) in components {
                let &ci = world
                    .component_index
                    .get(type_name)
                    .ok_or_else(|| SimEcsError::UnknownComponentType(type_name.clone()))?;
                let (generation_id, bitflag) = {
                    let comp = &world.components[ci];
                    (comp.generation_id, comp.bitflag)
                };
                world.masks[generation_id][eid as usize] |= bitflag;
                if let Some(object) = object.as_object() {
                    for (key, value) in object {
                        if key == "type" {
                            continue;
                        }
                        if let Some(col) = world.components[ci].store.column_index(key) {
                            world.components[ci].store.write_value(col, eid, value);
                        }
                    }
                }
            }
        }
    }
    rebind_system_queries(world);
    world.delta_baseline = true;
    Ok(())
}

fn sparse_set_to_json(set: &SparseSet) -> Value {
    json!({ "dense": set.dense(), "sparse": set.sparse_raw() })
}

fn sparse_set_from_json(value: &Value) -> Result<SparseSet> {
    let dense: Vec<Eid> = value["dense"]
        .as_array()
        .ok_or_else(|| corrupt("sparse set dense"))?
        .iter()
        .filter_map(|v| v.as_u64())
        .map(|v| v as Eid)
        .collect();
    let sparse: Vec<i32> = value["sparse"]
        .as_array()
        .ok_or_else(|| corrupt("sparse set sparse"))?
        .iter()
        .filter_map(|v| v.as_i64())
        .map(|v| v as i32)
        .collect();
    let mut set = SparseSet::new();
    set.reset(Some(dense), Some(sparse));
    Ok(set)
}

fn corrupt(what: &str) -> SimEcsError {
    SimEcsError::Corrupt(format!("malformed JSON snapshot: {}", what))
}
