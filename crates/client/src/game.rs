use std::time::Duration;

use glam::Vec3;

use fragnet::net::StartGame;
use fragnet::{ClientGame, DirectoryCommand, InputBits, NetEntity, Snapshot, Transform};

#[derive(Debug, Default)]
pub struct Avatar {
    pub transform: Transform,
}

impl NetEntity for Avatar {
    fn transform(&self) -> Transform {
        self.transform
    }

    fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }
}

/// Unit direction the held commands ask for. X is right, Z is forward.
pub fn movement(input: InputBits) -> Vec3 {
    let mut direction = Vec3::ZERO;
    if input.contains(InputBits::RIGHT) {
        direction.x += 1.0;
    }
    if input.contains(InputBits::LEFT) {
        direction.x -= 1.0;
    }
    if input.contains(InputBits::FORWARD) {
        direction.z += 1.0;
    }
    if input.contains(InputBits::BACKWARD) {
        direction.z -= 1.0;
    }
    direction.normalize_or_zero()
}

/// A player that holds the same commands for the whole session.
pub struct Walker {
    player: Avatar,
    script: InputBits,
    speed: f32,
    pub kicked: bool,
    pub roster: Vec<String>,
}

impl Walker {
    pub fn new(script: InputBits, speed: f32) -> Self {
        Self {
            player: Avatar {
                transform: Transform::new(Vec3::new(0.0, 1.0, 0.0), Vec3::ZERO),
            },
            script,
            speed,
            kicked: false,
            roster: Vec::new(),
        }
    }

    pub fn position(&self) -> Vec3 {
        self.player.transform.position
    }

    /// Moves the player ahead of the server.
    pub fn step(&mut self, dt: Duration) {
        self.player.transform.position += movement(self.script) * self.speed * dt.as_secs_f32();
    }
}

impl ClientGame for Walker {
    type Entity = Avatar;

    fn main_player(&mut self) -> &mut Avatar {
        &mut self.player
    }

    fn spawn(&mut self, snapshot: &Snapshot) -> Avatar {
        log::info!("Player {} appeared at {}", snapshot.server_id, snapshot.position);
        Avatar {
            transform: snapshot.transform(),
        }
    }

    fn local_input(&mut self) -> InputBits {
        self.script
    }

    fn on_connected(&mut self, server_id: i32) {
        log::info!("Playing as {}", server_id);
    }

    fn on_disconnected(&mut self) {
        self.kicked = true;
    }

    fn on_corrected(&mut self, snapshot: &Snapshot) {
        log::debug!("Corrected to {}", snapshot.position);
    }

    fn on_player_list(&mut self, players: &[String]) {
        log::info!("Lobby: {}", players.join(", "));
        self.roster = players.to_vec();
    }

    fn on_start_game(&mut self, start: &StartGame) {
        log::info!("Match {} started", start.lobby_name);
    }

    fn on_directory(&mut self, command: &DirectoryCommand) {
        log::info!("Directory: {}", command);
    }
}
