use std::fmt;
use std::net::SocketAddr;

use bitflags::bitflags;
use bytes::Bytes;
use glam::Vec3;

use super::codec::{CodecError, FrameReader, FrameWriter};

pub const DEFAULT_PORT: u16 = 9001;
pub const DEFAULT_DIRECTORY_PORT: u16 = 8484;
pub const HEADER_SIZE: usize = 8;
/// Server id carried before the server has assigned one, and in a refused connection.
pub const UNASSIGNED_ID: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum PacketType {
    Connect = 0,
    Snapshot = 1,
    PlayerInput = 2,
    Disconnect = 3,
    JoinLobby = 4,
    LeaveLobby = 5,
    StartGame = 6,
    RefreshPlayerList = 7,
}

impl PacketType {
    pub const ALL: [PacketType; 8] = [
        PacketType::Connect,
        PacketType::Snapshot,
        PacketType::PlayerInput,
        PacketType::Disconnect,
        PacketType::JoinLobby,
        PacketType::LeaveLobby,
        PacketType::StartGame,
        PacketType::RefreshPlayerList,
    ];

    pub fn tag(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl TryFrom<u32> for PacketType {
    type Error = CodecError;

    fn try_from(tag: u32) -> Result<Self, Self::Error> {
        PacketType::ALL
            .into_iter()
            .find(|ty| ty.tag() == tag)
            .ok_or(CodecError::UnknownPacketType(tag))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    pub seqno: u32,
}

impl PacketHeader {
    pub fn new(packet_type: PacketType, seqno: u32) -> Self {
        Self { packet_type, seqno }
    }

    pub fn write(&self, writer: &mut FrameWriter) {
        writer.put_u32(self.packet_type.tag());
        writer.put_u32(self.seqno);
    }

    pub fn read(reader: &mut FrameReader<'_>) -> Result<Self, CodecError> {
        let packet_type = PacketType::try_from(reader.get_u32()?)?;
        let seqno = reader.get_u32()?;
        Ok(Self { packet_type, seqno })
    }

    /// Reads only the common header of a frame.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        Self::read(&mut FrameReader::new(data))
    }
}

/// A typed payload. Fields are written in declaration order after the header.
pub trait Payload: Sized {
    const TYPE: PacketType;

    fn write(&self, writer: &mut FrameWriter) -> Result<(), CodecError>;
    fn read(reader: &mut FrameReader<'_>) -> Result<Self, CodecError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet<P> {
    pub seqno: u32,
    pub payload: P,
}

impl<P: Payload> Packet<P> {
    pub fn new(seqno: u32, payload: P) -> Self {
        Self { seqno, payload }
    }

    pub fn header(&self) -> PacketHeader {
        PacketHeader::new(P::TYPE, self.seqno)
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let mut writer = FrameWriter::new();
        self.header().write(&mut writer);
        self.payload.write(&mut writer)?;
        writer.finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut reader = FrameReader::new(data);
        let header = PacketHeader::read(&mut reader)?;
        if header.packet_type != P::TYPE {
            return Err(CodecError::UnexpectedType {
                expected: P::TYPE,
                found: header.packet_type,
            });
        }
        let payload = P::read(&mut reader)?;
        Ok(Self {
            seqno: header.seqno,
            payload,
        })
    }
}

/// Decodes a frame a handler was routed, logging and dropping it when malformed.
pub(crate) fn decode_or_log<P: Payload>(addr: SocketAddr, data: &[u8]) -> Option<Packet<P>> {
    match Packet::<P>::decode(data) {
        Ok(packet) => Some(packet),
        Err(e) => {
            log::warn!("Dropping {:?} from {}: {}", P::TYPE, addr, e);
            None
        }
    }
}

bitflags! {
    /// Commands are named after actions rather than keys so bindings can differ per client.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InputBits: u32 {
        const FORWARD = 1 << 0;
        const BACKWARD = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const PRIMARY_WEAPON = 1 << 4;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub server_id: i32,
    pub player_name: String,
}

impl Payload for Connect {
    const TYPE: PacketType = PacketType::Connect;

    fn write(&self, writer: &mut FrameWriter) -> Result<(), CodecError> {
        writer.put_i32(self.server_id);
        writer.put_text(&self.player_name)
    }

    fn read(reader: &mut FrameReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            server_id: reader.get_i32()?,
            player_name: reader.get_text()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub server_id: i32,
    pub player_name: String,
}

impl Payload for Disconnect {
    const TYPE: PacketType = PacketType::Disconnect;

    fn write(&self, writer: &mut FrameWriter) -> Result<(), CodecError> {
        writer.put_i32(self.server_id);
        writer.put_text(&self.player_name)
    }

    fn read(reader: &mut FrameReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            server_id: reader.get_i32()?,
            player_name: reader.get_text()?,
        })
    }
}

/// Observable state of one entity. `orientation` holds Euler angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Snapshot {
    pub server_id: i32,
    pub position: Vec3,
    pub orientation: Vec3,
}

impl Snapshot {
    pub fn new(server_id: i32, position: Vec3, orientation: Vec3) -> Self {
        Self {
            server_id,
            position,
            orientation,
        }
    }
}

impl Payload for Snapshot {
    const TYPE: PacketType = PacketType::Snapshot;

    fn write(&self, writer: &mut FrameWriter) -> Result<(), CodecError> {
        writer.put_i32(self.server_id);
        writer.put_vec3(self.position);
        writer.put_vec3(self.orientation);
        Ok(())
    }

    fn read(reader: &mut FrameReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            server_id: reader.get_i32()?,
            position: reader.get_vec3()?,
            orientation: reader.get_vec3()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerInput {
    pub server_id: i32,
    pub input: InputBits,
}

impl Payload for PlayerInput {
    const TYPE: PacketType = PacketType::PlayerInput;

    fn write(&self, writer: &mut FrameWriter) -> Result<(), CodecError> {
        writer.put_i32(self.server_id);
        writer.put_u32(self.input.bits());
        Ok(())
    }

    fn read(reader: &mut FrameReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            server_id: reader.get_i32()?,
            input: InputBits::from_bits_retain(reader.get_u32()?),
        })
    }
}

fn write_optional_text(writer: &mut FrameWriter, value: Option<&str>) -> Result<(), CodecError> {
    match value {
        Some(text) => {
            writer.put_u8(1);
            writer.put_text(text)
        }
        None => {
            writer.put_u8(0);
            Ok(())
        }
    }
}

fn read_optional_text(reader: &mut FrameReader<'_>) -> Result<Option<String>, CodecError> {
    match reader.get_u8()? {
        0 => Ok(None),
        _ => reader.get_text().map(Some),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinLobby {
    pub player_name: String,
    pub lobby_name: Option<String>,
}

impl Payload for JoinLobby {
    const TYPE: PacketType = PacketType::JoinLobby;

    fn write(&self, writer: &mut FrameWriter) -> Result<(), CodecError> {
        writer.put_text(&self.player_name)?;
        write_optional_text(writer, self.lobby_name.as_deref())
    }

    fn read(reader: &mut FrameReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            player_name: reader.get_text()?,
            lobby_name: read_optional_text(reader)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveLobby {
    pub player_name: String,
    pub lobby_name: Option<String>,
}

impl Payload for LeaveLobby {
    const TYPE: PacketType = PacketType::LeaveLobby;

    fn write(&self, writer: &mut FrameWriter) -> Result<(), CodecError> {
        writer.put_text(&self.player_name)?;
        write_optional_text(writer, self.lobby_name.as_deref())
    }

    fn read(reader: &mut FrameReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            player_name: reader.get_text()?,
            lobby_name: read_optional_text(reader)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartGame {
    pub lobby_name: String,
    pub server_id: i32,
    pub host_ip: String,
    pub host_port: u32,
}

impl Payload for StartGame {
    const TYPE: PacketType = PacketType::StartGame;

    fn write(&self, writer: &mut FrameWriter) -> Result<(), CodecError> {
        writer.put_text(&self.lobby_name)?;
        writer.put_i32(self.server_id);
        writer.put_text(&self.host_ip)?;
        writer.put_u32(self.host_port);
        Ok(())
    }

    fn read(reader: &mut FrameReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            lobby_name: reader.get_text()?,
            server_id: reader.get_i32()?,
            host_ip: reader.get_text()?,
            host_port: reader.get_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefreshPlayerList {
    pub players: Vec<String>,
}

impl Payload for RefreshPlayerList {
    const TYPE: PacketType = PacketType::RefreshPlayerList;

    fn write(&self, writer: &mut FrameWriter) -> Result<(), CodecError> {
        writer.put_list(&self.players)
    }

    fn read(reader: &mut FrameReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            players: reader.get_list()?,
        })
    }
}
