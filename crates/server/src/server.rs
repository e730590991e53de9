use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use fragnet::{ServerConfig, ServerEvent, ServerSession, UdpTransport};

use crate::simulation::Arena;

pub struct GameServer {
    session: ServerSession<Arena, UdpTransport>,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    running: Arc<AtomicBool>,
}

impl GameServer {
    pub fn new(
        bind_addr: &str,
        arena: Arena,
        tick_rate: u32,
        config: ServerConfig,
    ) -> io::Result<Self> {
        let session = ServerSession::bind(arena, bind_addr, config)?;
        let tick_duration = Duration::from_secs_f64(1.0 / tick_rate.max(1) as f64);

        Ok(Self {
            session,
            tick_duration,
            last_tick_time: Instant::now(),
            accumulator: Duration::ZERO,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.session.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn session_mut(&mut self) -> &mut ServerSession<Arena, UdpTransport> {
        &mut self.session
    }

    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            std::thread::sleep(Duration::from_millis(1));
        }
        self.session.shutdown();
        self.log_events();
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.accumulator += delta;

        if let Err(e) = self.session.poll_network() {
            log::error!("Network error: {}", e);
        }

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.session.update(self.tick_duration);
        }

        self.log_events();
    }

    fn log_events(&mut self) {
        for event in self.session.drain_events() {
            match event {
                ServerEvent::ClientConnected {
                    server_id,
                    addr,
                    player_name,
                } => {
                    log::info!("{} connected from {} as player {}", player_name, addr, server_id);
                }
                ServerEvent::ClientDisconnected {
                    server_id,
                    addr,
                    reason,
                } => {
                    log::info!("Player {} ({}) {}", server_id, addr, reason.as_str());
                }
                ServerEvent::ConnectionDenied { addr, reason } => {
                    log::warn!("Connection denied to {}: {}", addr, reason);
                }
                ServerEvent::LobbyJoined { server_id, lobby } => {
                    log::info!("Player {} joined {}", server_id, lobby);
                }
                ServerEvent::LobbyLeft { server_id, lobby } => {
                    log::info!("Player {} left {}", server_id, lobby);
                }
                ServerEvent::GameStarted { lobby, players } => {
                    log::info!("Match in {} started with {} players", lobby, players);
                }
                ServerEvent::ReliableExpired { key } => {
                    log::warn!("Gave up on {}", key);
                }
                ServerEvent::Directory { command } => {
                    log::info!("Directory: {}", command);
                }
                ServerEvent::Error { message } => {
                    log::error!("{}", message);
                }
            }
        }
    }
}
