//! Entity lifecycle: allocation, removal, and id reuse.

use crate::error::{Result, SimEcsError};
use crate::system::System;
use crate::world::{Eid, World};
use std::rc::Rc;

impl World {
    /// Freed ids are reused only once enough of them have accumulated, so
    /// short-lived churn keeps allocating fresh ids.
    fn reuse_threshold(&self) -> usize {
        (self.size as f64 * 0.01).round() as usize
    }

    /// Allocates an entity id: pops a reusable id once the freed queue
    /// exceeds the reuse threshold, otherwise advances the cursor. Fails
    /// with `CapacityExceeded` when the world is full.
    pub fn add_entity(&mut self) -> Result<Eid> {
        let eid = if self.removed.len() > self.reuse_threshold() {
            self.removed.pop_front().expect("removed queue is non-empty")
        } else {
            let eid = self.entity_cursor;
            if eid as usize >= self.size {
                return Err(SimEcsError::CapacityExceeded {
                    eid,
                    size: self.size as u32,
                });
            }
            self.entity_cursor += 1;
            eid
        };
        self.entities.add(eid);
        log::trace!("added entity {}", eid);
        Ok(eid)
    }

    pub fn entity_exists(&self, eid: Eid) -> bool {
        self.entities.has(eid)
    }

    /// The next fresh id the cursor would allocate.
    pub fn entity_cursor(&self) -> Eid {
        self.entity_cursor
    }

    /// Removes an entity: queues it out of every query it is in, runs the
    /// collected `cleanup` hooks in reverse-encounter order, pushes the id
    /// onto the freed queue, and zeroes the entity's mask rows. Idempotent.
    pub fn remove_entity(&mut self, eid: Eid) {
        if !self.entities.has(eid) {
            return;
        }

        let mut cleanups: Vec<Rc<dyn System>> = Vec::new();
        for qi in 0..self.queries.len() {
            if !self.queries[qi].members.has(eid) {
                continue;
            }
            let key = self.queries[qi].key.clone();
            if self.query_defer_remove(qi, eid) {
                cleanups.extend(self.systems_for_query(&key));
            }
        }
        for system in cleanups.into_iter().rev() {
            system.cleanup(self, eid);
        }

        self.removed.push_back(eid);
        self.entities.remove(eid);
        for generation in &mut self.masks {
            generation[eid as usize] = 0;
        }
        log::trace!("removed entity {}", eid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use std::sync::Arc;

    fn world_of(size: usize) -> World {
        Arc::new(Registry::new()).create_world(Some(size))
    }

    #[test]
    fn allocates_monotonic_ids() -> Result<()> {
        let mut world = world_of(100);
        assert_eq!(world.add_entity()?, 0);
        assert_eq!(world.add_entity()?, 1);
        assert!(world.entity_exists(0));
        assert_eq!(world.entity_cursor(), 2);
        Ok(())
    }

    #[test]
    fn capacity_is_bounded() -> Result<()> {
        let mut world = world_of(2);
        world.add_entity()?;
        world.add_entity()?;
        assert!(matches!(
            world.add_entity(),
            Err(SimEcsError::CapacityExceeded { .. })
        ));
        Ok(())
    }

    #[test]
    fn reuse_kicks_in_past_threshold() -> Result<()> {
        // size 100 -> threshold round(1.0) = 1: reuse once |removed| > 1.
        let mut world = world_of(100);
        for _ in 0..10 {
            world.add_entity()?;
        }
        world.remove_entity(3);
        // One freed id is not enough yet.
        assert_eq!(world.add_entity()?, 10);
        world.remove_entity(5);
        world.remove_entity(7);
        // Oldest freed id comes back first.
        assert_eq!(world.add_entity()?, 3);
        Ok(())
    }

    #[test]
    fn remove_is_idempotent() -> Result<()> {
        let mut world = world_of(100);
        let eid = world.add_entity()?;
        world.remove_entity(eid);
        world.remove_entity(eid);
        assert!(!world.entity_exists(eid));
        assert_eq!(world.removed.len(), 1);
        Ok(())
    }
}
