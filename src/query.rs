//! Bitmask-matched entity queries with deferred removal.
//!
//! A query is keyed by the `|`-joined, alphabetically-sorted type names of
//! its required components. Instances are memoized per registry; per-world
//! state lives in [`QueryState`] inside the world. Removal from a query is
//! deferred: entities are queued in `to_remove` and dropped from the
//! primary set only when removals are committed, which happens before any
//! read of query results.

use crate::schema::ComponentSchema;
use crate::storage::SparseSet;
use crate::world::{Eid, World};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

/// Builds the canonical query key for a component set.
pub fn query_key(components: &[Arc<ComponentSchema>]) -> String {
    let mut names: Vec<&str> = components.iter().map(|c| c.type_name()).collect();
    names.sort_unstable();
    names.join("|")
}

/// A memoized handle to a component-set query.
///
/// The same instance is returned for any ordering of the same components.
#[derive(Debug)]
pub struct QueryInstance {
    pub(crate) key: String,
    pub(crate) components: Vec<Arc<ComponentSchema>>,
}

impl QueryInstance {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn components(&self) -> &[Arc<ComponentSchema>] {
        &self.components
    }

    /// Entities currently matching, committing any deferred removals first.
    pub fn entities<'w>(&self, world: &'w mut World) -> &'w [Eid] {
        let idx = world.ensure_query(self);
        world.commit_removals();
        world.queries[idx].members.dense()
    }

    /// Post-commit membership truth without forcing a commit:
    /// a member queued for removal is already reported absent.
    pub fn has(&self, world: &World, eid: Eid) -> bool {
        match world.query_index.get(&self.key) {
            Some(&idx) => {
                let state = &world.queries[idx];
                state.members.has(eid) && !state.to_remove.has(eid)
            }
            None => false,
        }
    }
}

/// Per-world query state: the primary member set, the entered/to-remove
/// auxiliary sets, and the precomputed per-generation masks.
#[derive(Debug)]
pub struct QueryState {
    pub(crate) key: String,
    pub(crate) component_names: Vec<String>,
    pub(crate) members: SparseSet,
    pub(crate) entered: SparseSet,
    pub(crate) to_remove: SparseSet,
    /// generation id -> OR of the required components' bitflags there.
    pub(crate) masks: BTreeMap<u32, u32>,
    pub(crate) generations: Vec<u32>,
}

impl World {
    /// Returns the index of the query's per-world state, creating it on
    /// first association: masks are computed from the (lazily registered)
    /// components and all existing entities are walked to populate initial
    /// membership.
    pub(crate) fn ensure_query(&mut self, instance: &QueryInstance) -> usize {
        if let Some(&idx) = self.query_index.get(&instance.key) {
            return idx;
        }
        let schemas = instance.components.clone();
        let mut masks: BTreeMap<u32, u32> = BTreeMap::new();
        for schema in &schemas {
            let ci = self
                .ensure_registered(schema)
                .expect("query components are registered with the registry");
            let comp = &self.components[ci];
            *masks.entry(comp.generation_id as u32).or_insert(0) |= comp.bitflag;
        }
        let generations: Vec<u32> = masks.keys().copied().collect();

        let idx = self.queries.len();
        self.queries.push(QueryState {
            key: instance.key.clone(),
            component_names: schemas.iter().map(|s| s.type_name().to_string()).collect(),
            members: SparseSet::with_capacity(self.size),
            entered: SparseSet::with_capacity(self.size),
            to_remove: SparseSet::with_capacity(self.size),
            masks,
            generations,
        });
        self.query_index.insert(instance.key.clone(), idx);

        let existing: Vec<Eid> = self.entities.dense().to_vec();
        for eid in existing {
            if self.query_check(idx, eid) {
                self.query_add(idx, eid);
            }
        }
        idx
    }

    /// True iff the entity's masks cover the query's masks in every
    /// participating generation.
    pub(crate) fn query_check(&self, idx: usize, eid: Eid) -> bool {
        let state = &self.queries[idx];
        state.generations.iter().all(|&g| {
            let mask = state.masks[&g];
            (self.masks[g as usize][eid as usize] & mask) == mask
        })
    }

    /// Adds to the primary set, feeding `entered` and clearing any pending
    /// removal. Returns true when newly added.
    pub(crate) fn query_add(&mut self, idx: usize, eid: Eid) -> bool {
        let state = &mut self.queries[idx];
        state.to_remove.remove(eid);
        state.entered.add(eid);
        state.members.add(eid)
    }

    /// Queues a member for deferred removal and marks the query dirty.
    /// Returns true iff newly queued.
    pub(crate) fn query_defer_remove(&mut self, idx: usize, eid: Eid) -> bool {
        let key = self.queries[idx].key.clone();
        let state = &mut self.queries[idx];
        if !state.members.has(eid) || state.to_remove.has(eid) {
            return false;
        }
        state.to_remove.add(eid);
        if !self.dirty_queries.contains(&key) {
            self.dirty_queries.push(key);
        }
        true
    }

    /// Commits all pending deferred removals, draining each dirty query's
    /// `to_remove` in reverse order.
    pub fn commit_removals(&mut self) {
        if self.dirty_queries.is_empty() {
            return;
        }
        let keys = std::mem::take(&mut self.dirty_queries);
        for key in keys {
            let Some(&idx) = self.query_index.get(&key) else { continue };
            let state = &mut self.queries[idx];
            let pending: Vec<Eid> = state.to_remove.dense().to_vec();
            for &eid in pending.iter().rev() {
                state.to_remove.remove(eid);
                state.members.remove(eid);
                state.entered.remove(eid);
            }
        }
    }

    /// Rc-cloned system instances bound to a query key, in registration
    /// order, so hooks can be invoked while the world is borrowed mutably.
    pub(crate) fn systems_for_query(&self, key: &str) -> Vec<Rc<dyn crate::system::System>> {
        self.systems_by_query
            .get(key)
            .map(|ids| ids.iter().map(|&i| self.systems[i].system.clone()).collect())
            .unwrap_or_default()
    }
}
