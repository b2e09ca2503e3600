//! Basic usage walkthrough: declare components, run a system, snapshot the
//! world, and stream a delta.

use serde_json::json;
use simecs::schema::ComponentSchema;
use simecs::serialize::{serialize_world, DeltaSerializer, SerializationMode, WorldSnapshot};
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
        for key in ["x", "y"] {
            let v = world
                .component(&velocity, eid)
                .unwrap()
                .get(key)
                .unwrap()
                .as_f64()
                .unwrap();
            let p = world
                .component(&position, eid)
                .unwrap()
                .get(key)
                .unwrap()
                .as_f64()
                .unwrap();
            world
                .component_mut(&position, eid)
                .unwrap()
                .set(key, json!(p + v))
                .unwrap();
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = Arc::new(Registry::new());
    let schemas: Vec<Arc<ComponentSchema>> = registry.define_components_toml(
        r#"
        [components.Position]
        fields = [
            { name = "x", type = "f64" },
            { name = "y", type = "f64" },
        ]

        [components.Velocity]
        fields = [
            { name = "x", type = "f64" },
            { name = "y", type = "f64" },
        ]
        "#,
    )?;
    let (position, velocity) = (&schemas[0], &schemas[1]);
    registry.define_system::<Movement>(&[position, velocity])?;

    let mut world = registry.create_world(Some(1000));
    let e = world.add_entity()?;
    world.add_component(position, e, None)?;
    world.add_component(
        velocity,
        e,
        json!({ "x": 30.0, "y": 30.0 }).as_object().cloned(),
    )?;

    world.step();
    println!(
        "after one step: x = {}, y = {}",
        world.component(position, e)?.get("x").unwrap(),
        world.component(position, e)?.get("y").unwrap(),
    );

    if let WorldSnapshot::Binary(bytes) = serialize_world(SerializationMode::Binary, &world)? {
        println!("binary snapshot: {} bytes", bytes.len());
    }

    let mut delta = DeltaSerializer::new();
    let baseline = delta.serialize(&world, None)?;
    world.step();
    let update = delta.serialize(&world, None)?;
    println!(
        "baseline {} bytes, delta after one more step {} bytes",
        baseline.len(),
        update.len()
    );
    Ok(())
}
