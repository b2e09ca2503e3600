//! Depth-scheduled systems.
//!
//! Systems are defined once per registry and instantiated per world. A
//! definition captures the system's depth and draw-ness at registration
//! time and binds it to the query over its required components. Systems
//! with a negative depth are manual: they are excluded from both steppers
//! and invoked explicitly through [`World::get_system`].

use crate::query::QueryInstance;
use crate::schema::ComponentSchema;
use crate::world::{Eid, World};
use std::any::{Any, TypeId};
use std::rc::Rc;
use std::sync::Arc;

/// A simulation system.
///
/// `depth` and `is_draw` are read from a probe instance when the system is
/// defined; `init` fires when an entity newly matches the system's query,
/// `cleanup` when it newly de-matches (deferred to after the transition
/// loop), `destroy` when the owning world is freed.
pub trait System: 'static {
    /// Scheduling depth. Non-negative systems run in `(depth, query key)`
    /// order; negative depth marks a manual system.
    fn depth(&self) -> i32 {
        0
    }

    /// Draw systems run from `step_draw` instead of `step`.
    fn is_draw(&self) -> bool {
        false
    }

    fn init(&self, _world: &mut World, _eid: Eid) {}

    fn cleanup(&self, _world: &mut World, _eid: Eid) {}

    fn run(&self, _world: &mut World, _eid: Eid) {}

    fn destroy(&self, _world: &mut World) {}

    /// Runs the system over every matching entity. Fetching the entity
    /// list commits pending deferred removals first.
    fn run_all(&self, world: &mut World, query: &QueryInstance) {
        let eids = query.entities(world).to_vec();
        for eid in eids {
            self.run(world, eid);
        }
    }
}

type SystemFactory = Box<dyn Fn() -> (Rc<dyn System>, Rc<dyn Any>) + Send + Sync>;

/// Registry-side record of one defined system.
pub struct SystemDef {
    pub(crate) name: String,
    pub(crate) type_id: TypeId,
    pub(crate) depth: i32,
    pub(crate) draw: bool,
    pub(crate) query_key: String,
    pub(crate) components: Vec<Arc<ComponentSchema>>,
    pub(crate) factory: SystemFactory,
}

impl std::fmt::Debug for SystemDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemDef")
            .field("name", &self.name)
            .field("depth", &self.depth)
            .field("draw", &self.draw)
            .field("query_key", &self.query_key)
            .finish()
    }
}

impl SystemDef {
    pub(crate) fn new<S: System + Default>(components: Vec<Arc<ComponentSchema>>) -> SystemDef {
        let probe = S::default();
        let name = short_type_name::<S>();
        SystemDef {
            name,
            type_id: TypeId::of::<S>(),
            depth: probe.depth(),
            draw: probe.is_draw(),
            query_key: crate::query::query_key(&components),
            components,
            factory: Box::new(|| {
                let instance = Rc::new(S::default());
                (instance.clone() as Rc<dyn System>, instance as Rc<dyn Any>)
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depth(&self) -> i32 {
        self.depth
    }

    pub fn query_key(&self) -> &str {
        &self.query_key
    }

    /// Manual systems are excluded from both steppers.
    pub fn is_manual(&self) -> bool {
        self.depth < 0
    }
}

fn short_type_name<S: 'static>() -> String {
    let full = std::any::type_name::<S>();
    full.rsplit("::").next().unwrap_or(full).to_string()
}

/// Per-world instantiation of a defined system.
pub(crate) struct WorldSystem {
    pub(crate) def: Arc<SystemDef>,
    pub(crate) system: Rc<dyn System>,
    pub(crate) any: Rc<dyn Any>,
    pub(crate) query: Arc<QueryInstance>,
    pub(crate) query_idx: usize,
}

impl World {
    /// Returns the index of the per-world instance for a definition,
    /// instantiating it (and its query state) on first use.
    pub(crate) fn ensure_system(&mut self, def: &Arc<SystemDef>) -> usize {
        if let Some(&idx) = self.system_index.get(&def.type_id) {
            return idx;
        }
        let query = self.registry.clone().query_for(&def.components);
        let query_idx = self.ensure_query(&query);
        let (system, any) = (def.factory)();
        let idx = self.systems.len();
        self.systems.push(WorldSystem {
            def: def.clone(),
            system,
            any,
            query,
            query_idx,
        });
        self.system_index.insert(def.type_id, idx);
        self.systems_by_query
            .entry(def.query_key.clone())
            .or_default()
            .push(idx);
        idx
    }

    /// The per-world instance of a system type, if the type was defined.
    pub fn get_system<S: System + Default>(&mut self) -> Option<Rc<S>> {
        let def = self.registry.clone().system_def(TypeId::of::<S>())?;
        let idx = self.ensure_system(&def);
        self.systems[idx].any.clone().downcast::<S>().ok()
    }

    /// The memoized query a system type runs against.
    pub fn get_system_query<S: System + Default>(&mut self) -> Option<Arc<QueryInstance>> {
        let def = self.registry.clone().system_def(TypeId::of::<S>())?;
        let idx = self.ensure_system(&def);
        Some(self.systems[idx].query.clone())
    }

    /// All instantiated systems whose definition name matches.
    pub fn get_systems_by_type(&self, name: &str) -> Vec<Rc<dyn System>> {
        self.systems
            .iter()
            .filter(|ws| ws.def.name == name)
            .map(|ws| ws.system.clone())
            .collect()
    }
}
