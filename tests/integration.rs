//! End-to-end world, query, and system scenarios.

use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};
use simecs::error::Result;
use simecs::schema::{ComponentBuilder, ComponentSchema, ElementType, Overrides};
use simecs::system::System;
use simecs::world::{Eid, World};
use simecs::Registry;
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static ORDER: RefCell<Vec<i32>> = const { RefCell::new(Vec::new()) };
}

fn overrides(value: Value) -> Option<Map<String, Value>> {
    Some(value.as_object().unwrap().clone())
}

fn position() -> Arc<ComponentSchema> {
    ComponentBuilder::new("Position")
        .scalar("x", ElementType::F64, 0.0)
        .scalar("y", ElementType::F64, 0.0)
        .build()
}

fn velocity() -> Arc<ComponentSchema> {
    ComponentBuilder::new("Velocity")
        .scalar("x", ElementType::F64, 0.0)
        .scalar("y", ElementType::F64, 0.0)
        .build()
}

fn lookup(world: &World, name: &str) -> Arc<ComponentSchema> {
    world.registry().get_component_by_type(name).unwrap()
}

fn scalar(world: &World, schema: &Arc<ComponentSchema>, eid: Eid, key: &str) -> f64 {
    world
        .component(schema, eid)
        .unwrap()
        .get(key)
        .unwrap()
        .as_f64()
        .unwrap()
}

#[derive(Default)]
struct Movement;

impl System for Movement {
    fn run(&self, world: &mut World, eid: Eid) {
        let position = lookup(world, "Position");
        let velocity = lookup(world, "Velocity");
        let vx = scalar(world, &velocity, eid, "x");
        let vy = scalar(world, &velocity, eid, "y");
        let px = scalar(world, &position, eid, "x");
        let py = scalar(world, &position, eid, "y");
        let mut view = world.component_mut(&position, eid).unwrap();
        view.set("x", json!(px + vx)).unwrap();
        view.set("y", json!(py + vy)).unwrap();
    }
}

#[test]
fn create_add_step() -> Result<()> {
    let registry = Arc::new(Registry::new());
    let position = registry.define_component(position())?;
    let velocity = registry.define_component(velocity())?;
    registry.define_system::<Movement>(&[&position, &velocity])?;

    let mut world = registry.create_world(Some(100));
    let e = world.add_entity()?;
    assert_eq!(e, 0);
    world.add_component(&position, e, None)?;
    world.add_component(&velocity, e, overrides(json!({ "x": 30.0, "y": 30.0 })))?;

    let view = world.component(&position, e)?;
    assert_eq!(view.get("x"), Some(json!(0.0)));
    assert_eq!(view.get("y"), Some(json!(0.0)));
    assert_eq!(view.get("type"), Some(json!("Position")));

    world.step();
    assert_eq!(scalar(&world, &position, e, "x"), 30.0);
    assert_eq!(scalar(&world, &position, e, "y"), 30.0);

    world.step();
    assert_eq!(scalar(&world, &position, e, "x"), 60.0);
    Ok(())
}

#[derive(Default)]
struct OrderInit;

impl System for OrderInit {
    fn init(&self, _world: &mut World, _eid: Eid) {
        ORDER.with(|o| o.borrow_mut().push(0));
    }
}

#[derive(Default)]
struct OrderFirst;

impl System for OrderFirst {
    fn run(&self, _world: &mut World, _eid: Eid) {
        ORDER.with(|o| o.borrow_mut().push(1));
    }
}

#[derive(Default)]
struct OrderSecond;

impl System for OrderSecond {
    fn depth(&self) -> i32 {
        1
    }
    fn run(&self, _world: &mut World, _eid: Eid) {
        ORDER.with(|o| o.borrow_mut().push(2));
    }
}

#[derive(Default)]
struct OrderThird;

impl System for OrderThird {
    fn depth(&self) -> i32 {
        2
    }
    fn run(&self, _world: &mut World, _eid: Eid) {
        ORDER.with(|o| o.borrow_mut().push(3));
    }
}

#[test]
fn systems_run_in_depth_order() -> Result<()> {
    ORDER.with(|o| o.borrow_mut().clear());
    let registry = Arc::new(Registry::new());
    let order = registry.define_component(ComponentBuilder::new("Order").build())?;
    // Registration order deliberately scrambled; (depth, key) ordering wins.
    registry.define_system::<OrderThird>(&[&order])?;
    registry.define_system::<OrderFirst>(&[&order])?;
    registry.define_system::<OrderInit>(&[&order])?;
    registry.define_system::<OrderSecond>(&[&order])?;

    let mut world = registry.create_world(Some(10));
    let e = world.add_entity()?;
    world.add_component(&order, e, None)?;

    world.step();
    ORDER.with(|o| assert_eq!(*o.borrow(), vec![0, 1, 2, 3]));

    world.step();
    ORDER.with(|o| assert_eq!(*o.borrow(), vec![0, 1, 2, 3, 1, 2, 3]));
    Ok(())
}

#[derive(Default)]
struct ManualToggle;

impl System for ManualToggle {
    fn depth(&self) -> i32 {
        -1
    }
    fn run(&self, world: &mut World, eid: Eid) {
        let switch = lookup(world, "Switch");
        let current = world
            .component(&switch, eid)
            .unwrap()
            .get("active")
            .unwrap()
            .as_bool()
            .unwrap();
        let mut view = world.component_mut(&switch, eid).unwrap();
        view.set("active", json!(!current)).unwrap();
    }
}

#[test]
fn manual_systems_are_not_stepped() -> Result<()> {
    let registry = Arc::new(Registry::new());
    let switch = registry.define_component(
        ComponentBuilder::new("Switch").boolean("active", false).build(),
    )?;
    registry.define_system::<ManualToggle>(&[&switch])?;

    let mut world = registry.create_world(Some(10));
    let e = world.add_entity()?;
    world.add_component(&switch, e, None)?;

    world.step();
    world.step_draw();
    assert_eq!(
        world.component(&switch, e)?.get("active"),
        Some(json!(false))
    );

    let system = world.get_system::<ManualToggle>().unwrap();
    system.run(&mut world, e);
    assert_eq!(world.component(&switch, e)?.get("active"), Some(json!(true)));
    Ok(())
}

#[test]
fn query_removal_is_deferred() -> Result<()> {
    let registry = Arc::new(Registry::new());
    let a = registry.define_component(ComponentBuilder::new("A").build())?;
    let b = registry.define_component(ComponentBuilder::new("B").build())?;
    let query = registry.define_query(&[&a, &b])?;

    let mut world = registry.create_world(Some(10));
    let e = world.add_entity()?;
    world.add_component(&a, e, None)?;
    world.add_component(&b, e, None)?;
    assert_eq!(query.entities(&mut world), &[e]);

    world.remove_component(&b, e)?;
    // The removal is queued, not committed, but membership reads already
    // report the post-commit truth.
    assert!(!query.has(&world, e));
    assert_eq!(query.entities(&mut world), &[] as &[Eid]);
    Ok(())
}

#[derive(Default)]
struct Hooked;

impl System for Hooked {
    fn init(&self, _world: &mut World, eid: Eid) {
        ORDER.with(|o| o.borrow_mut().push(1000 + eid as i32));
    }
    fn cleanup(&self, _world: &mut World, eid: Eid) {
        ORDER.with(|o| o.borrow_mut().push(-1000 - eid as i32));
    }
}

#[test]
fn init_and_cleanup_fire_on_membership_transitions() -> Result<()> {
    ORDER.with(|o| o.borrow_mut().clear());
    let registry = Arc::new(Registry::new());
    let a = registry.define_component(ComponentBuilder::new("A").build())?;
    let b = registry.define_component(ComponentBuilder::new("B").build())?;
    registry.define_system::<Hooked>(&[&a, &b])?;

    let mut world = registry.create_world(Some(10));
    let e = world.add_entity()?;
    world.add_component(&a, e, None)?;
    ORDER.with(|o| assert!(o.borrow().is_empty()));

    world.add_component(&b, e, None)?;
    ORDER.with(|o| assert_eq!(*o.borrow(), vec![1000]));

    world.remove_component(&a, e)?;
    ORDER.with(|o| assert_eq!(*o.borrow(), vec![1000, -1000]));

    // Removing the entity entirely does not re-fire cleanup: membership
    // was already lost.
    world.remove_entity(e);
    ORDER.with(|o| assert_eq!(*o.borrow(), vec![1000, -1000]));
    Ok(())
}

#[test]
fn remove_entity_clears_all_components() -> Result<()> {
    let registry = Arc::new(Registry::new());
    let position = registry.define_component(position())?;
    let velocity = registry.define_component(velocity())?;

    let mut world = registry.create_world(Some(10));
    let e = world.add_entity()?;
    world.add_component(&position, e, overrides(json!({ "x": 5.0 })))?;
    world.add_component(&velocity, e, None)?;
    assert!(world.has_component(&position, e));

    world.remove_entity(e);
    assert!(!world.entity_exists(e));
    assert!(!world.has_component(&position, e));
    assert!(!world.has_component(&velocity, e));
    Ok(())
}

#[test]
fn add_component_is_idempotent_and_reset_reapplies_defaults() -> Result<()> {
    let registry = Arc::new(Registry::new());
    let body = registry.define_component(
        ComponentBuilder::new("Body")
            .scalar("mass", ElementType::F64, 2.5)
            .scalar("charge", ElementType::F64, 0.0)
            .build(),
    )?;

    let mut world = registry.create_world(Some(10));
    let e = world.add_entity()?;
    world.add_component(&body, e, Some(Overrides::new().set("charge", 7.0).into_map()))?;
    assert_eq!(scalar(&world, &body, e, "mass"), 2.5);
    assert_eq!(scalar(&world, &body, e, "charge"), 7.0);

    // Second add with different overrides is a no-op.
    world.add_component(&body, e, overrides(json!({ "charge": 9.0 })))?;
    assert_eq!(scalar(&world, &body, e, "charge"), 7.0);

    // Remove then re-add with reset: the column returns to its default.
    world.remove_component(&body, e)?;
    world.add_component(&body, e, None)?;
    assert_eq!(scalar(&world, &body, e, "mass"), 2.5);
    assert_eq!(scalar(&world, &body, e, "charge"), 0.0);
    Ok(())
}

#[test]
fn disable_component_skips_query_updates() -> Result<()> {
    let registry = Arc::new(Registry::new());
    let a = registry.define_component(ComponentBuilder::new("A").build())?;
    let query = registry.define_query(&[&a])?;

    let mut world = registry.create_world(Some(10));
    let e = world.add_entity()?;
    world.add_component(&a, e, None)?;
    assert_eq!(query.entities(&mut world), &[e]);

    world.disable_component(&a, e);
    assert!(!world.has_component(&a, e));
    // The query was not re-evaluated: the entity lingers until the next
    // add/remove on the same component.
    assert_eq!(query.entities(&mut world), &[e]);
    Ok(())
}

#[test]
fn validation_rejects_bad_overrides() -> Result<()> {
    let registry = Arc::new(Registry::new());
    let position = registry.define_component(position())?;

    let mut world = registry.create_world(Some(10));
    let e = world.add_entity()?;
    let err = world.add_component(&position, e, overrides(json!({ "x": "fast", "z": 1.0 })));
    match err {
        Err(simecs::SimEcsError::Validation { component, errors, .. }) => {
            assert_eq!(component, "Position");
            assert_eq!(errors.len(), 2);
        }
        other => panic!("expected validation error, got {:?}", other.err()),
    }
    Ok(())
}

#[test]
fn bitflag_overflow_spans_generations() -> Result<()> {
    let registry = Arc::new(Registry::new());
    let schemas: Vec<Arc<ComponentSchema>> = (0..34)
        .map(|i| {
            registry
                .define_component(ComponentBuilder::new(format!("C{:02}", i)).build())
                .unwrap()
        })
        .collect();
    // A query spanning the first and last component crosses the
    // generation boundary at 32 registrations.
    let query = registry.define_query(&[&schemas[0], &schemas[33]])?;

    let mut world = registry.create_world(Some(10));
    let e = world.add_entity()?;
    for schema in &schemas {
        world.add_component(schema, e, None)?;
    }
    for schema in &schemas {
        assert!(world.has_component(schema, e), "{}", schema.type_name());
    }
    assert_eq!(query.entities(&mut world), &[e]);

    world.remove_component(&schemas[33], e)?;
    assert_eq!(query.entities(&mut world), &[] as &[Eid]);
    Ok(())
}

#[test]
fn global_registry_module_scope_api() -> Result<()> {
    // The only test touching the process-wide registry, to keep the
    // freeze semantics deterministic under parallel test execution.
    let marker = simecs::define_component(
        ComponentBuilder::new("GlobalMarker")
            .scalar("v", ElementType::I32, 0.0)
            .build(),
    )?;
    let query = simecs::define_query(&[&marker])?;
    let mut world = simecs::create_world(Some(50));
    let e = world.add_entity()?;
    world.add_component(&marker, e, overrides(json!({ "v": 3 })))?;
    assert_eq!(query.entities(&mut world), &[e]);
    assert!(simecs::get_component_by_type("GlobalMarker").is_some());
    simecs::delete_world(world);
    Ok(())
}
