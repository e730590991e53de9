mod config;
mod events;
mod session;

pub use config::ServerConfig;
pub use events::{DisconnectReason, ServerEvent};
pub use session::{ClientInfo, ServerGame, ServerSession};
