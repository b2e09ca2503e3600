//! Worlds: entity sparse set, mask generations, component stores, query
//! states, and per-world system instances.

mod accessor;
mod component;
mod entity;

pub use accessor::{ComponentMut, ComponentRef};

use crate::query::QueryState;
use crate::registry::Registry;
use crate::schema::ComponentSchema;
use crate::storage::{SparseSet, Store};
use crate::system::WorldSystem;
use std::any::TypeId;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

/// Opaque 32-bit entity index.
pub type Eid = u32;

/// Sentinel for an unset entity reference.
pub const EID_UNSET: Eid = u32::MAX;

/// A component registered on one world: its schema, bitmask coordinates,
/// and column store.
pub(crate) struct RegisteredComponent {
    pub(crate) schema: Arc<ComponentSchema>,
    pub(crate) generation_id: usize,
    pub(crate) bitflag: u32,
    pub(crate) store: Store,
}

/// A single simulation state: entities, component columns, queries, and
/// systems. Single-threaded; nothing here is shared across threads.
pub struct World {
    pub(crate) registry: Arc<Registry>,
    pub(crate) size: usize,
    pub(crate) entities: SparseSet,
    /// Freed ids awaiting reuse, oldest first.
    pub(crate) removed: VecDeque<Eid>,
    pub(crate) entity_cursor: Eid,
    /// One 32-bit mask row per entity, per generation.
    pub(crate) masks: Vec<Vec<u32>>,
    /// Bitflag cursor for the next registered component. Zero marks a
    /// pending wrap: the next registration opens a fresh generation.
    pub(crate) bitflag: u32,
    /// Registered components in insertion order; this order is the
    /// serializer's canonical property walk.
    pub(crate) components: Vec<RegisteredComponent>,
    pub(crate) component_index: HashMap<String, usize>,
    pub(crate) queries: Vec<QueryState>,
    pub(crate) query_index: HashMap<String, usize>,
    /// Queries with pending deferred removals, in marking order.
    pub(crate) dirty_queries: Vec<String>,
    pub(crate) systems: Vec<WorldSystem>,
    pub(crate) system_index: HashMap<TypeId, usize>,
    pub(crate) systems_by_query: HashMap<String, Vec<usize>>,
    pub(crate) frame: u32,
    /// True once a full snapshot has been applied; required before a
    /// mode-1 delta buffer may be applied.
    pub(crate) delta_baseline: bool,
}

impl World {
    pub(crate) fn new(registry: Arc<Registry>, size: usize) -> World {
        let mut world = World {
            registry: registry.clone(),
            size,
            entities: SparseSet::with_capacity(size),
            removed: VecDeque::new(),
            entity_cursor: 0,
            masks: vec![vec![0; size]],
            bitflag: 1,
            components: Vec::new(),
            component_index: HashMap::new(),
            queries: Vec::new(),
            query_index: HashMap::new(),
            dirty_queries: Vec::new(),
            systems: Vec::new(),
            system_index: HashMap::new(),
            systems_by_query: HashMap::new(),
            frame: 0,
            delta_baseline: false,
        };
        for def in registry.all_systems() {
            world.ensure_system(&def);
        }
        log::debug!("created world of size {}", size);
        world
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Advances the frame counter and runs the auto-run systems in
    /// `(depth, query key)` order, skipping systems whose query is empty.
    pub fn step(&mut self) {
        self.frame = self.frame.wrapping_add(1);
        let defs = self.registry.clone().run_list();
        for def in defs {
            self.run_system_def(&def);
        }
    }

    /// Runs the draw systems in the same order; the frame counter is not
    /// advanced.
    pub fn step_draw(&mut self) {
        let defs = self.registry.clone().draw_list();
        for def in defs {
            self.run_system_def(&def);
        }
    }

    fn run_system_def(&mut self, def: &Arc<crate::system::SystemDef>) {
        let idx = self.ensure_system(def);
        let ws = &self.systems[idx];
        if self.queries[ws.query_idx].members.is_empty() {
            return;
        }
        let system = ws.system.clone();
        let query = ws.query.clone();
        system.run_all(self, &query);
    }

    /// Runs every system's `destroy` hook and releases the per-component
    /// stores.
    pub fn free(mut self) {
        let systems: Vec<Rc<dyn crate::system::System>> =
            self.systems.iter().map(|ws| ws.system.clone()).collect();
        for system in systems {
            system.destroy(&mut self);
        }
        for comp in &mut self.components {
            comp.store.reset();
        }
        log::debug!("freed world of size {}", self.size);
    }
}
