use glam::Vec3;

use fragnet::{InputBits, NetEntity, ServerGame, Snapshot, Transform};

#[derive(Debug, Default)]
pub struct Avatar {
    pub transform: Transform,
    pub input: InputBits,
}

impl NetEntity for Avatar {
    fn transform(&self) -> Transform {
        self.transform
    }

    fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }
}

/// Square arena centered on the origin. Players may not leave it or sink below the floor.
pub struct Arena {
    half_extent: f32,
}

impl Arena {
    pub fn new(size: f32) -> Self {
        Self {
            half_extent: size.abs() / 2.0,
        }
    }
}

impl ServerGame for Arena {
    type Entity = Avatar;

    fn spawn(&mut self, server_id: i32, player_name: &str) -> Avatar {
        log::debug!("Spawning avatar {} for {}", server_id, player_name);
        Avatar {
            transform: Transform::new(Vec3::new(0.0, 1.0, 0.0), Vec3::ZERO),
            input: InputBits::empty(),
        }
    }

    fn authorize(&mut self, _entity: &Avatar, snapshot: &mut Snapshot) {
        let bound = Vec3::new(self.half_extent, f32::MAX, self.half_extent);
        let floor = Vec3::new(-self.half_extent, 0.0, -self.half_extent);
        snapshot.position = snapshot.position.clamp(floor, bound);
    }

    fn on_input(&mut self, entity: &mut Avatar, input: InputBits) {
        entity.input = input;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_clamped_to_arena() {
        let mut arena = Arena::new(20.0);
        let avatar = arena.spawn(1, "alice");

        let mut snapshot = Snapshot::new(1, Vec3::new(15.0, -2.0, -3.0), Vec3::ZERO);
        arena.authorize(&avatar, &mut snapshot);
        assert_eq!(snapshot.position, Vec3::new(10.0, 0.0, -3.0));

        let mut inside = Snapshot::new(1, Vec3::new(1.0, 4.0, 2.0), Vec3::ZERO);
        arena.authorize(&avatar, &mut inside);
        assert_eq!(inside.position, Vec3::new(1.0, 4.0, 2.0));
    }
}
