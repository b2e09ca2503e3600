//! Process-level registration state.
//!
//! A [`Registry`] owns the component schemas, system definitions, and
//! memoized query instances shared by every world created from it. The
//! registry freezes when its first world is created: the freeze sorts
//! schemas by type name and assigns each its stable index, and any later
//! component definition fails with `DefineAfterFreeze`.
//!
//! A global default registry backs the module-scope API
//! ([`create_world`], [`define_query`], [`define_system`], ...); embedders
//! and tests can also build isolated registries with [`Registry::new`].

use crate::error::{Result, SimEcsError};
use crate::query::{query_key, QueryInstance};
use crate::schema::{ComponentSchema, SchemaParser};
use crate::system::{System, SystemDef};
use crate::world::World;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// Default entity capacity for worlds created without an explicit size.
pub const DEFAULT_WORLD_SIZE: usize = 10_000;

#[derive(Default)]
struct Inner {
    components: Vec<Arc<ComponentSchema>>,
    by_name: HashMap<String, usize>,
    frozen: bool,
    systems: Vec<Arc<SystemDef>>,
    run_list: Vec<Arc<SystemDef>>,
    draw_list: Vec<Arc<SystemDef>>,
    manual_list: Vec<Arc<SystemDef>>,
    queries: HashMap<String, Arc<QueryInstance>>,
}

pub struct Registry {
    inner: RwLock<Inner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Registers a component schema. Idempotent for an already-registered
    /// type name; fails with `DefineAfterFreeze` once a world exists.
    pub fn define_component(&self, schema: Arc<ComponentSchema>) -> Result<Arc<ComponentSchema>> {
        let mut inner = self.inner.write();
        if let Some(&idx) = inner.by_name.get(schema.type_name()) {
            return Ok(inner.components[idx].clone());
        }
        if inner.frozen {
            return Err(SimEcsError::DefineAfterFreeze(format!(
                "component {}",
                schema.type_name()
            )));
        }
        let idx = inner.components.len();
        inner.by_name.insert(schema.type_name().to_string(), idx);
        inner.components.push(schema.clone());
        log::debug!("defined component {}", schema.type_name());
        Ok(schema)
    }

    /// Registers every component described by a TOML table document.
    pub fn define_components_toml(&self, toml_str: &str) -> Result<Vec<Arc<ComponentSchema>>> {
        SchemaParser::from_string(toml_str)?
            .into_iter()
            .map(|schema| self.define_component(schema))
            .collect()
    }

    pub fn get_component_by_type(&self, type_name: &str) -> Option<Arc<ComponentSchema>> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(type_name)
            .map(|&idx| inner.components[idx].clone())
    }

    /// All registered schemas in canonical order (registration order before
    /// the freeze, sorted-by-name after).
    pub fn components(&self) -> Vec<Arc<ComponentSchema>> {
        self.inner.read().components.clone()
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.read().frozen
    }

    /// Freezes the schema set: sorts by type name and assigns each schema
    /// its stable index. Invoked by the first `create_world`; calling it
    /// again is a no-op.
    pub fn freeze(&self) {
        let mut inner = self.inner.write();
        if inner.frozen {
            return;
        }
        inner.components.sort_by(|a, b| a.type_name().cmp(b.type_name()));
        inner.by_name.clear();
        for (idx, schema) in inner.components.iter().enumerate() {
            schema.assign_index(idx);
        }
        let names: Vec<(String, usize)> = inner
            .components
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.type_name().to_string(), idx))
            .collect();
        inner.by_name.extend(names);
        inner.frozen = true;
        log::debug!("registry frozen with {} components", inner.components.len());
    }

    /// Returns the memoized query instance for a component set; the same
    /// instance is returned for any ordering of the same components.
    /// Unregistered schemas are registered on the way through.
    pub fn define_query(&self, components: &[&Arc<ComponentSchema>]) -> Result<Arc<QueryInstance>> {
        let mut owned = Vec::with_capacity(components.len());
        for schema in components {
            owned.push(self.define_component((*schema).clone())?);
        }
        Ok(self.query_for(&owned))
    }

    pub(crate) fn query_for(&self, components: &[Arc<ComponentSchema>]) -> Arc<QueryInstance> {
        let key = query_key(components);
        let mut inner = self.inner.write();
        if let Some(instance) = inner.queries.get(&key) {
            return instance.clone();
        }
        let mut sorted = components.to_vec();
        sorted.sort_by(|a, b| a.type_name().cmp(b.type_name()));
        let instance = Arc::new(QueryInstance {
            key: key.clone(),
            components: sorted,
        });
        inner.queries.insert(key, instance.clone());
        instance
    }

    /// Defines a system over its required components, capturing depth and
    /// draw-ness from a probe instance and re-partitioning the run lists.
    pub fn define_system<S: System + Default>(
        &self,
        components: &[&Arc<ComponentSchema>],
    ) -> Result<Arc<SystemDef>> {
        let mut owned = Vec::with_capacity(components.len());
        for schema in components {
            owned.push(self.define_component((*schema).clone())?);
        }
        // Memoize the query eagerly so worlds can bind it at creation.
        self.query_for(&owned);

        let def = Arc::new(SystemDef::new::<S>(owned));
        let mut inner = self.inner.write();
        inner.systems.retain(|d| d.type_id != def.type_id);
        inner.systems.push(def.clone());

        let mut ordered = inner.systems.clone();
        ordered.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.query_key.cmp(&b.query_key)));
        inner.manual_list = ordered.iter().filter(|d| d.is_manual()).cloned().collect();
        inner.run_list = ordered
            .iter()
            .filter(|d| !d.is_manual() && !d.draw)
            .cloned()
            .collect();
        inner.draw_list = ordered
            .iter()
            .filter(|d| !d.is_manual() && d.draw)
            .cloned()
            .collect();
        log::debug!("defined system {} (depth {})", def.name(), def.depth());
        Ok(def)
    }

    pub(crate) fn system_def(&self, type_id: TypeId) -> Option<Arc<SystemDef>> {
        let inner = self.inner.read();
        inner.systems.iter().find(|d| d.type_id == type_id).cloned()
    }

    pub(crate) fn all_systems(&self) -> Vec<Arc<SystemDef>> {
        self.inner.read().systems.clone()
    }

    pub(crate) fn run_list(&self) -> Vec<Arc<SystemDef>> {
        self.inner.read().run_list.clone()
    }

    pub(crate) fn draw_list(&self) -> Vec<Arc<SystemDef>> {
        self.inner.read().draw_list.clone()
    }

    /// Manual system definitions (depth < 0), in `(depth, key)` order.
    pub fn manual_systems(&self) -> Vec<Arc<SystemDef>> {
        self.inner.read().manual_list.clone()
    }

    /// Creates a world snapshotting this registry. The first world freezes
    /// the schema set.
    pub fn create_world(self: &Arc<Self>, size: Option<usize>) -> World {
        self.freeze();
        World::new(self.clone(), size.unwrap_or(DEFAULT_WORLD_SIZE))
    }
}

static GLOBAL: Lazy<Arc<Registry>> = Lazy::new(|| Arc::new(Registry::new()));

/// The process-wide default registry.
pub fn global() -> &'static Arc<Registry> {
    &GLOBAL
}

/// Creates a world from the global registry.
pub fn create_world(size: Option<usize>) -> World {
    global().create_world(size)
}

/// Runs the system `destroy` hooks and releases the world's stores.
pub fn delete_world(world: World) {
    world.free();
}

/// Registers a component schema with the global registry.
pub fn define_component(schema: Arc<ComponentSchema>) -> Result<Arc<ComponentSchema>> {
    global().define_component(schema)
}

/// Memoized query over the global registry.
pub fn define_query(components: &[&Arc<ComponentSchema>]) -> Result<Arc<QueryInstance>> {
    global().define_query(components)
}

/// Defines a system in the global registry.
pub fn define_system<S: System + Default>(
    components: &[&Arc<ComponentSchema>],
) -> Result<Arc<SystemDef>> {
    global().define_system::<S>(components)
}

/// Looks up a schema by type name in the global registry.
pub fn get_component_by_type(type_name: &str) -> Option<Arc<ComponentSchema>> {
    global().get_component_by_type(type_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ComponentBuilder, ElementType};

    #[test]
    fn freeze_sorts_and_indexes() -> Result<()> {
        let registry = Arc::new(Registry::new());
        let b = registry.define_component(ComponentBuilder::new("Beta").build())?;
        let a = registry.define_component(
            ComponentBuilder::new("Alpha")
                .scalar("x", ElementType::F64, 0.0)
                .build(),
        )?;
        registry.freeze();

        assert_eq!(a.index(), Some(0));
        assert_eq!(b.index(), Some(1));
        assert!(registry.is_frozen());

        let err = registry.define_component(ComponentBuilder::new("Gamma").build());
        assert!(matches!(err, Err(SimEcsError::DefineAfterFreeze(_))));
        // Re-registering a known type stays fine after the freeze.
        assert!(registry.define_component(ComponentBuilder::new("Alpha").build()).is_ok());
        Ok(())
    }

    #[test]
    fn queries_are_memoized_order_independent() -> Result<()> {
        let registry = Arc::new(Registry::new());
        let a = registry.define_component(ComponentBuilder::new("A").build())?;
        let b = registry.define_component(ComponentBuilder::new("B").build())?;

        let q1 = registry.define_query(&[&a, &b])?;
        let q2 = registry.define_query(&[&b, &a])?;
        assert!(Arc::ptr_eq(&q1, &q2));
        assert_eq!(q1.key(), "A|B");
        Ok(())
    }
}
