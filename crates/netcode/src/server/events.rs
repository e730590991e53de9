use std::net::SocketAddr;

use crate::net::{DirectoryCommand, ReliableKey};

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected {
        server_id: i32,
        addr: SocketAddr,
        player_name: String,
    },
    ClientDisconnected {
        server_id: i32,
        addr: SocketAddr,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    LobbyJoined {
        server_id: i32,
        lobby: String,
    },
    LobbyLeft {
        server_id: i32,
        lobby: String,
    },
    GameStarted {
        lobby: String,
        players: usize,
    },
    ReliableExpired {
        key: ReliableKey,
    },
    Directory {
        command: DirectoryCommand,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
        }
    }
}
