use std::net::SocketAddr;
use std::time::Duration;

use crate::net::{DEFAULT_HISTORY_CAPACITY, RetryPolicy};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Zero broadcasts on every update.
    pub broadcast_period: Duration,
    pub reliable_period: Duration,
    /// Silence after which a client is evicted. `None` keeps clients until they leave.
    pub client_timeout: Option<Duration>,
    pub history_capacity: usize,
    pub max_clients: usize,
    /// Lobby joined when a JOIN_LOBBY names none.
    pub default_lobby: String,
    pub directory: Option<SocketAddr>,
    pub retry_policy: RetryPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            broadcast_period: Duration::ZERO,
            reliable_period: Duration::from_secs(1),
            client_timeout: Some(Duration::from_secs(5)),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            max_clients: 32,
            default_lobby: "default".to_string(),
            directory: None,
            retry_policy: RetryPolicy::unbounded(),
        }
    }
}
