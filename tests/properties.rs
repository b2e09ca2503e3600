//! Property tests for the sparse set and snapshot round-trips.

use proptest::prelude::*;
use serde_json::json;
use simecs::schema::{ComponentBuilder, ElementType};
use simecs::serialize::{deserialize_world, serialize_world, SerializationMode};
use simecs::storage::SparseSet;
use simecs::Registry;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Add(u32),
    Remove(u32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u32..64).prop_map(Op::Add),
        (0u32..64).prop_map(Op::Remove),
    ]
}

proptest! {
    #[test]
    fn sparse_set_matches_hash_set(ops in proptest::collection::vec(op_strategy(), 0..200)) {
        let mut set = SparseSet::with_capacity(64);
        let mut model: HashSet<u32> = HashSet::new();

        for op in ops {
            match op {
                Op::Add(id) => {
                    let newly = set.add(id);
                    prop_assert_eq!(newly, model.insert(id));
                }
                Op::Remove(id) => {
                    let removed = set.remove(id);
                    prop_assert_eq!(removed, model.remove(&id));
                }
            }
            prop_assert_eq!(set.len(), model.len());
        }

        for id in 0..64u32 {
            prop_assert_eq!(set.has(id), model.contains(&id));
        }
        // Dense holds each live id exactly once.
        let dense: HashSet<u32> = set.dense().iter().copied().collect();
        prop_assert_eq!(dense.len(), set.dense().len());
        prop_assert_eq!(dense, model);
    }

    #[test]
    fn binary_round_trip_preserves_scalars(values in proptest::collection::vec((-1.0e6f64..1.0e6, -128i32..127), 1..20)) {
        let registry = Arc::new(Registry::new());
        let body = registry
            .define_component(
                ComponentBuilder::new("Body")
                    .scalar("mass", ElementType::F64, 0.0)
                    .scalar("kind", ElementType::I8, 0.0)
                    .build(),
            )
            .unwrap();
        let mut world = registry.create_world(Some(32));

        for (mass, kind) in &values {
            let e = world.add_entity().unwrap();
            world
                .add_component(
                    &body,
                    e,
                    Some(json!({ "mass": mass, "kind": kind }).as_object().unwrap().clone()),
                )
                .unwrap();
        }

        let snapshot = serialize_world(SerializationMode::Binary, &world).unwrap();
        let restored = deserialize_world(&snapshot, &registry).unwrap();
        for (e, (mass, kind)) in values.iter().enumerate() {
            let view = restored.component(&body, e as u32).unwrap();
            prop_assert_eq!(view.get("mass").unwrap().as_f64().unwrap(), *mass);
            prop_assert_eq!(view.get("kind").unwrap().as_i64().unwrap(), *kind as i64);
        }
    }
}
