use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use simecs::schema::{ComponentBuilder, ElementType};
use simecs::serialize::{serialize_world, DeltaSerializer, SerializationMode};
use simecs::world::World;
use simecs::Registry;
use std::sync::Arc;

fn populated_world(entities: usize) -> World {
    let registry = Arc::new(Registry::new());
    let body = registry
        .define_component(
            ComponentBuilder::new("Body")
                .scalar("mass", ElementType::F64, 1.0)
                .subarray("extents", ElementType::F32, 3, &[])
                .build(),
        )
        .unwrap();
    let mut world = registry.create_world(Some(entities.max(1)));
    for i in 0..entities {
        let e = world.add_entity().unwrap();
        world
            .add_component(
                &body,
                e,
                Some(
                    json!({ "mass": i as f64, "extents": [1.0, 2.0, 3.0] })
                        .as_object()
                        .unwrap()
                        .clone(),
                ),
            )
            .unwrap();
    }
    world
}

fn bench_full_snapshot(c: &mut Criterion) {
    let world = populated_world(1000);
    c.bench_function("binary_snapshot_1000_entities", |b| {
        b.iter(|| black_box(serialize_world(SerializationMode::Binary, &world).unwrap()));
    });
}

fn bench_quiet_delta(c: &mut Criterion) {
    let world = populated_world(1000);
    let mut serializer = DeltaSerializer::new();
    serializer.serialize(&world, None).unwrap();
    c.bench_function("quiet_delta_1000_entities", |b| {
        b.iter(|| black_box(serializer.serialize(&world, None).unwrap()));
    });
}

criterion_group!(benches, bench_full_snapshot, bench_quiet_delta);
criterion_main!(benches);
