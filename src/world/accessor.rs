//! Narrow per-entity component views.
//!
//! The dynamic property access of the host-facing API becomes a pair of
//! accessor types: [`ComponentRef`] reads column values as JSON, and
//! [`ComponentMut`] also writes them. Both expose the `type` pseudo-field;
//! reading an unknown key returns absent, writing one fails.

use crate::error::{Result, SimEcsError};
use crate::schema::ComponentSchema;
use crate::storage::Store;
use crate::world::{Eid, World};
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct ComponentRef<'w> {
    store: &'w Store,
    schema: Arc<ComponentSchema>,
    eid: Eid,
}

pub struct ComponentMut<'w> {
    store: &'w mut Store,
    schema: Arc<ComponentSchema>,
    eid: Eid,
}

impl World {
    /// Read view of one entity's component.
    pub fn component(&self, schema: &Arc<ComponentSchema>, eid: Eid) -> Result<ComponentRef<'_>> {
        if !self.entities.has(eid) {
            return Err(SimEcsError::EntityMissing(eid));
        }
        let &ci = self
            .component_index
            .get(schema.type_name())
            .ok_or(SimEcsError::ComponentNull)?;
        let comp = &self.components[ci];
        Ok(ComponentRef {
            store: &comp.store,
            schema: comp.schema.clone(),
            eid,
        })
    }

    /// Write view of one entity's component.
    pub fn component_mut(
        &mut self,
        schema: &Arc<ComponentSchema>,
        eid: Eid,
    ) -> Result<ComponentMut<'_>> {
        if !self.entities.has(eid) {
            return Err(SimEcsError::EntityMissing(eid));
        }
        let &ci = self
            .component_index
            .get(schema.type_name())
            .ok_or(SimEcsError::ComponentNull)?;
        let comp = &mut self.components[ci];
        Ok(ComponentMut {
            schema: comp.schema.clone(),
            store: &mut comp.store,
            eid,
        })
    }
}

fn read_key(store: &Store, schema: &ComponentSchema, eid: Eid, key: &str) -> Option<Value> {
    if key == "type" {
        return Some(Value::String(schema.type_name().to_string()));
    }
    store.column_index(key).map(|col| store.read_value(col, eid))
}

fn all_keys<'a>(store: &'a Store) -> Vec<&'a str> {
    let mut keys: Vec<&str> = store.columns().iter().map(|c| c.key()).collect();
    keys.push("type");
    keys
}

impl ComponentRef<'_> {
    /// Reads one property; `type` yields the component's type name and an
    /// unknown key is absent. Boolean columns read as true/false.
    pub fn get(&self, key: &str) -> Option<Value> {
        read_key(self.store, &self.schema, self.eid, key)
    }

    pub fn keys(&self) -> Vec<&str> {
        all_keys(self.store)
    }

    pub fn type_name(&self) -> &str {
        self.schema.type_name()
    }

    /// The component's property map, without the `type` pseudo-field.
    pub fn to_object(&self) -> Map<String, Value> {
        self.store
            .columns()
            .iter()
            .enumerate()
            .map(|(col, c)| (c.key().to_string(), self.store.read_value(col, self.eid)))
            .collect()
    }
}

impl ComponentMut<'_> {
    pub fn get(&self, key: &str) -> Option<Value> {
        read_key(self.store, &self.schema, self.eid, key)
    }

    pub fn keys(&self) -> Vec<&str> {
        all_keys(self.store)
    }

    pub fn type_name(&self) -> &str {
        self.schema.type_name()
    }

    /// Writes one property. The `type` pseudo-field and unknown keys fail.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        let col = self
            .store
            .column_index(key)
            .ok_or_else(|| SimEcsError::UnknownProperty {
                component: self.schema.type_name().to_string(),
                key: key.to_string(),
            })?;
        self.store.write_value(col, self.eid, &value);
        Ok(())
    }
}
