mod codec;
mod directory;
mod dispatch;
mod entity;
mod history;
mod protocol;
mod queue;
mod reliable;
mod schedule;
mod sequence;
mod transport;

pub use codec::{CodecError, FrameReader, FrameWriter, LIST_DELIMITER, MAX_PACKET_SIZE};
pub use directory::{DirectoryCommand, DirectoryError, DirectoryVerb, FIELD_SEPARATOR};
pub use dispatch::{Dispatcher, NetHost, PacketHandler, Route, dispatch};
pub use entity::{EntityRegistry, NetEntity, Transform};
pub use history::{DEFAULT_HISTORY_CAPACITY, Reconcile, SnapshotHistory};
pub(crate) use protocol::decode_or_log;
pub use protocol::{
    Connect, DEFAULT_DIRECTORY_PORT, DEFAULT_PORT, Disconnect, HEADER_SIZE, InputBits, JoinLobby,
    LeaveLobby, Packet, PacketHeader, PacketType, Payload, PlayerInput, RefreshPlayerList,
    Snapshot, StartGame, UNASSIGNED_ID,
};
pub use queue::{Work, WorkQueue};
pub use reliable::{PendingReliable, ReliableKey, ReliableRegistry, RetryPolicy};
pub use schedule::Periodic;
pub use sequence::{SequenceFilter, sequence_greater_than};
pub use transport::{NetworkStats, ReceiverHandle, RecordingTransport, Transport, UdpTransport};
