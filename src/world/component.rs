//! Component lifecycle: per-world registration, mask transitions, and the
//! add/remove/disable operations with their query side effects.

use crate::error::{Result, SimEcsError};
use crate::schema::ComponentSchema;
use crate::storage::Store;
use crate::system::System;
use crate::world::{Eid, RegisteredComponent, World, EID_UNSET};
use serde_json::{Map, Value};
use std::rc::Rc;
use std::sync::Arc;

impl World {
    /// Lazily registers a component on this world, allocating its bitflag
    /// (and a fresh mask generation when the cursor wraps past bit 31) and
    /// creating its store. The schema must be known to the registry.
    pub(crate) fn ensure_registered(&mut self, schema: &Arc<ComponentSchema>) -> Result<usize> {
        if let Some(&idx) = self.component_index.get(schema.type_name()) {
            return Ok(idx);
        }
        let canonical = self
            .registry
            .get_component_by_type(schema.type_name())
            .ok_or(SimEcsError::ComponentNull)?;

        if self.bitflag == 0 {
            self.bitflag = 1;
            self.masks.push(vec![0; self.size]);
        }
        let bitflag = self.bitflag;
        let generation_id = self.masks.len() - 1;
        // 1 << 31 doubles to zero, flagging the wrap for the next register.
        self.bitflag = self.bitflag.wrapping_shl(1);

        let store = Store::new(&canonical, self.size);
        let idx = self.components.len();
        self.component_index
            .insert(canonical.type_name().to_string(), idx);
        self.components.push(RegisteredComponent {
            schema: canonical,
            generation_id,
            bitflag,
            store,
        });
        log::trace!(
            "registered component {} (generation {}, flag {:#x})",
            schema.type_name(),
            generation_id,
            bitflag
        );
        Ok(idx)
    }

    /// Registers a component with wire-specified mask coordinates; used by
    /// the deserializers, which must reproduce the encoder's layout.
    pub(crate) fn register_component_raw(
        &mut self,
        schema: Arc<ComponentSchema>,
        generation_id: usize,
        bitflag: u32,
    ) -> usize {
        while self.masks.len() <= generation_id {
            self.masks.push(vec![0; self.size]);
        }
        let store = Store::new(&schema, self.size);
        let idx = self.components.len();
        self.component_index
            .insert(schema.type_name().to_string(), idx);
        self.components.push(RegisteredComponent {
            schema,
            generation_id,
            bitflag,
            store,
        });
        idx
    }

    /// True iff the component's bit is set in the entity's mask row.
    pub fn has_component(&self, schema: &Arc<ComponentSchema>, eid: Eid) -> bool {
        match self.component_index.get(schema.type_name()) {
            Some(&ci) => {
                let comp = &self.components[ci];
                (eid as usize) < self.size
                    && self.masks[comp.generation_id][eid as usize] & comp.bitflag == comp.bitflag
            }
            None => false,
        }
    }

    /// Adds a component with defaults and overrides, resetting the row
    /// first. Equivalent to `add_component_with(..., true)`.
    pub fn add_component(
        &mut self,
        schema: &Arc<ComponentSchema>,
        eid: Eid,
        overrides: Option<Map<String, Value>>,
    ) -> Result<()> {
        self.add_component_with(schema, eid, overrides, true)
    }

    /// Adds a component to an entity.
    ///
    /// ORs the component's bitflag into the entity mask, optionally zeroes
    /// the row, validates the overrides, writes defaults and overrides into
    /// the columns, and re-evaluates every query referencing this
    /// component: newly-matching entities fire `init` immediately,
    /// newly-de-matched ones are queued for deferred removal and their
    /// `cleanup` hooks run after the transition loop in reverse-encounter
    /// order. A second add of the same component is a no-op.
    pub fn add_component_with(
        &mut self,
        schema: &Arc<ComponentSchema>,
        eid: Eid,
        overrides: Option<Map<String, Value>>,
        reset: bool,
    ) -> Result<()> {
        if eid == EID_UNSET {
            return Err(SimEcsError::EntityUndefined);
        }
        if !self.entities.has(eid) {
            return Err(SimEcsError::EntityMissing(eid));
        }
        let ci = self.ensure_registered(schema)?;
        let (generation_id, bitflag) = {
            let comp = &self.components[ci];
            (comp.generation_id, comp.bitflag)
        };
        if self.masks[generation_id][eid as usize] & bitflag == bitflag {
            return Ok(());
        }
        self.masks[generation_id][eid as usize] |= bitflag;

        if reset {
            self.components[ci].store.reset_for(eid);
        }

        let overrides = overrides.unwrap_or_default();
        let canonical = self.components[ci].schema.clone();
        if let Err(errors) = canonical.validator().validate(&overrides) {
            return Err(SimEcsError::Validation {
                component: canonical.type_name().to_string(),
                overrides,
                errors,
            });
        }

        for (col, prop) in canonical.properties().iter().enumerate() {
            // The reserved `type` key never names a column.
            let value = overrides
                .get(&prop.key)
                .or_else(|| (!prop.default.is_null()).then_some(&prop.default));
            if let Some(value) = value {
                self.components[ci].store.write_value(col, eid, value);
            }
        }

        self.run_query_transitions(eid, Some(canonical.type_name()));
        Ok(())
    }

    /// Removes a component: clears the bitflag and re-evaluates every
    /// registered query, firing `init`/`cleanup` transitions as on add.
    /// A no-op when the entity does not carry the component.
    pub fn remove_component(&mut self, schema: &Arc<ComponentSchema>, eid: Eid) -> Result<()> {
        if eid == EID_UNSET {
            return Err(SimEcsError::EntityUndefined);
        }
        if !self.entities.has(eid) {
            return Err(SimEcsError::EntityMissing(eid));
        }
        let Some(&ci) = self.component_index.get(schema.type_name()) else {
            return Ok(());
        };
        let comp = &self.components[ci];
        let (generation_id, bitflag) = (comp.generation_id, comp.bitflag);
        if self.masks[generation_id][eid as usize] & bitflag == 0 {
            return Ok(());
        }
        self.masks[generation_id][eid as usize] &= !bitflag;

        self.run_query_transitions(eid, None);
        Ok(())
    }

    /// Clears the component's bitflag without touching stores or queries.
    /// A low-level primitive: the entity may keep appearing in query
    /// results until the next add/remove on the same component.
    pub fn disable_component(&mut self, schema: &Arc<ComponentSchema>, eid: Eid) {
        if let Some(&ci) = self.component_index.get(schema.type_name()) {
            let comp = &self.components[ci];
            if (eid as usize) < self.size {
                self.masks[comp.generation_id][eid as usize] &= !comp.bitflag;
            }
        }
    }

    /// Re-evaluates query membership for one entity. With a component name
    /// the walk is limited to queries mentioning it (the add path); without
    /// one every registered query is re-evaluated (the remove path).
    fn run_query_transitions(&mut self, eid: Eid, component: Option<&str>) {
        let mut cleanups: Vec<Rc<dyn System>> = Vec::new();
        for qi in 0..self.queries.len() {
            if let Some(name) = component {
                if !self.queries[qi].component_names.iter().any(|n| n == name) {
                    continue;
                }
            }
            let key = self.queries[qi].key.clone();
            self.queries[qi].to_remove.remove(eid);
            if self.query_check(qi, eid) {
                if self.query_add(qi, eid) {
                    for system in self.systems_for_query(&key) {
                        system.init(self, eid);
                    }
                }
            } else {
                self.queries[qi].entered.remove(eid);
                if self.query_defer_remove(qi, eid) {
                    cleanups.extend(self.systems_for_query(&key));
                }
            }
        }
        for system in cleanups.into_iter().rev() {
            system.cleanup(self, eid);
        }
    }

    /// The component's column store in this world, if the component has
    /// been registered here.
    pub fn store(&self, schema: &Arc<ComponentSchema>) -> Option<&Store> {
        self.component_index
            .get(schema.type_name())
            .map(|&ci| &self.components[ci].store)
    }
}
