use std::net::SocketAddr;
use std::time::Duration;

use crate::net::RetryPolicy;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub prediction_buffer_size: usize,
    pub snapshot_period: Duration,
    pub reliable_period: Duration,
    pub connect_retry_period: Duration,
    pub reconcile_tolerance: f32,
    pub directory: Option<SocketAddr>,
    pub retry_policy: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            prediction_buffer_size: 20,
            snapshot_period: Duration::from_millis(60),
            reliable_period: Duration::from_secs(1),
            connect_retry_period: Duration::from_secs(1),
            reconcile_tolerance: 0.0,
            directory: None,
            retry_policy: RetryPolicy::unbounded(),
        }
    }
}
