use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use simecs::schema::{ComponentBuilder, ElementType};
use simecs::system::System;
use simecs::world::{Eid, World};
use simecs::Registry;
use std::sync::Arc;

#[derive(Default)]
struct Movement;

impl System for Movement {
    fn run(&self, world: &mut World, eid: Eid) {
        let position = world.registry().get_component_by_type("Position").unwrap();
        let velocity = world.registry().get_component_by_type("Velocity").unwrap();
        let vx = world
            .component(&velocity, eid)
            .unwrap()
            .get("x")
            .unwrap()
            .as_f64()
            .unwrap();
        let px = world
            .component(&position, eid)
            .unwrap()
            .get("x")
            .unwrap()
            .as_f64()
            .unwrap();
        world
            .component_mut(&position, eid)
            .unwrap()
            .set("x", json!(px + vx))
            .unwrap();
    }
}

fn populated_world(entities: usize) -> World {
    let registry = Arc::new(Registry::new());
    let position = registry
        .define_component(
            ComponentBuilder::new("Position")
                .scalar("x", ElementType::F64, 0.0)
                .scalar("y", ElementType::F64, 0.0)
                .build(),
        )
        .unwrap();
    let velocity = registry
        .define_component(
            ComponentBuilder::new("Velocity")
                .scalar("x", ElementType::F64, 0.0)
                .scalar("y", ElementType::F64, 0.0)
                .build(),
        )
        .unwrap();
    registry.define_system::<Movement>(&[&position, &velocity]).unwrap();

    let mut world = registry.create_world(Some(entities.max(1)));
    for _ in 0..entities {
        let e = world.add_entity().unwrap();
        world.add_component(&position, e, None).unwrap();
        world
            .add_component(
                &velocity,
                e,
                Some(json!({ "x": 1.0, "y": 0.5 }).as_object().unwrap().clone()),
            )
            .unwrap();
    }
    world
}

fn bench_step(c: &mut Criterion) {
    let mut world = populated_world(1000);
    c.bench_function("step_1000_entities", |b| {
        b.iter(|| {
            world.step();
            black_box(world.frame());
        });
    });
}

fn bench_add_remove_entity(c: &mut Criterion) {
    let mut world = populated_world(0);
    let position = world.registry().get_component_by_type("Position").unwrap();
    c.bench_function("add_remove_entity", |b| {
        b.iter(|| {
            let e = world.add_entity().unwrap();
            world.add_component(&position, e, None).unwrap();
            world.remove_entity(black_box(e));
        });
    });
}

criterion_group!(benches, bench_step, bench_add_remove_entity);
criterion_main!(benches);
