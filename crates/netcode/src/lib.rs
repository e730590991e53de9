pub mod client;
pub mod net;
pub mod server;

pub use client::{ClientConfig, ClientGame, ClientSession, ConnectionState};
pub use net::{
    CodecError, DEFAULT_DIRECTORY_PORT, DEFAULT_PORT, DirectoryCommand, DirectoryVerb,
    EntityRegistry, InputBits, NetEntity, NetHost, Packet, PacketHeader, PacketType, Periodic,
    ReliableKey, ReliableRegistry, RetryPolicy, Snapshot, SnapshotHistory, Transform, Transport,
    UNASSIGNED_ID, UdpTransport, WorkQueue,
};
pub use server::{
    ClientInfo, DisconnectReason, ServerConfig, ServerEvent, ServerGame, ServerSession,
};
