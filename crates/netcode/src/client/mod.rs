mod config;
mod session;

pub use config::ClientConfig;
pub use session::{ClientGame, ClientSession, ConnectionState};
