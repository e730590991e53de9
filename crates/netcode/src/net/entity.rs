use std::collections::HashMap;

use glam::Vec3;

use super::protocol::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub position: Vec3,
    /// Euler angles in degrees.
    pub orientation: Vec3,
}

impl Transform {
    pub fn new(position: Vec3, orientation: Vec3) -> Self {
        Self {
            position,
            orientation,
        }
    }
}

/// A locally simulated object whose state is synchronized through snapshots.
pub trait NetEntity: Sized {
    fn transform(&self) -> Transform;
    fn set_transform(&mut self, transform: Transform);

    /// Releases whatever the entity owns outside the registry.
    fn destroy(self) {}
}

impl Snapshot {
    pub fn capture<E: NetEntity>(server_id: i32, entity: &E) -> Self {
        let transform = entity.transform();
        Self::new(server_id, transform.position, transform.orientation)
    }

    pub fn transform(&self) -> Transform {
        Transform::new(self.position, self.orientation)
    }

    pub fn apply<E: NetEntity>(&self, entity: &mut E) {
        entity.set_transform(self.transform());
    }
}

/// Entities keyed by server id. There is never more than one live entity per id.
#[derive(Debug)]
pub struct EntityRegistry<E: NetEntity> {
    entities: HashMap<i32, E>,
}

impl<E: NetEntity> Default for EntityRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: NetEntity> EntityRegistry<E> {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
        }
    }

    pub fn get(&self, server_id: i32) -> Option<&E> {
        self.entities.get(&server_id)
    }

    pub fn get_mut(&mut self, server_id: i32) -> Option<&mut E> {
        self.entities.get_mut(&server_id)
    }

    pub fn contains(&self, server_id: i32) -> bool {
        self.entities.contains_key(&server_id)
    }

    /// Installs `entity`, destroying the one previously registered under `server_id`.
    pub fn put(&mut self, server_id: i32, entity: E) -> bool {
        let replaced = self.kill(server_id);
        self.entities.insert(server_id, entity);
        replaced
    }

    pub fn kill(&mut self, server_id: i32) -> bool {
        match self.entities.remove(&server_id) {
            Some(entity) => {
                entity.destroy();
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        for (_, entity) in self.entities.drain() {
            entity.destroy();
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.entities.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &E)> + '_ {
        self.entities.iter().map(|(id, entity)| (*id, entity))
    }
}
