use std::collections::HashMap;
use std::net::SocketAddr;

use super::codec::CodecError;
use super::protocol::{PacketHeader, PacketType};

/// Handlers receive the whole frame and decode their own payload.
pub type PacketHandler<C> = fn(&mut C, SocketAddr, &[u8]);

pub enum Route<C> {
    Directory,
    Malformed(CodecError),
    Handler(PacketHeader, PacketHandler<C>),
    Unhandled(PacketHeader),
}

pub struct Dispatcher<C> {
    handlers: HashMap<PacketType, PacketHandler<C>>,
    directory: Option<SocketAddr>,
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Dispatcher<C> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            directory: None,
        }
    }

    pub fn register(&mut self, packet_type: PacketType, handler: PacketHandler<C>) {
        if self.handlers.insert(packet_type, handler).is_some() {
            log::debug!("Replaced handler for {:?}", packet_type);
        }
    }

    pub fn unregister(&mut self, packet_type: PacketType) -> bool {
        self.handlers.remove(&packet_type).is_some()
    }

    pub fn is_registered(&self, packet_type: PacketType) -> bool {
        self.handlers.contains_key(&packet_type)
    }

    pub fn set_directory(&mut self, addr: Option<SocketAddr>) {
        self.directory = addr;
    }

    pub fn directory(&self) -> Option<SocketAddr> {
        self.directory
    }

    pub fn route(&self, addr: SocketAddr, data: &[u8]) -> Route<C> {
        if self.directory == Some(addr) {
            return Route::Directory;
        }

        match PacketHeader::decode(data) {
            Ok(header) => match self.handlers.get(&header.packet_type) {
                Some(handler) => Route::Handler(header, *handler),
                None => Route::Unhandled(header),
            },
            Err(e) => Route::Malformed(e),
        }
    }
}

/// Owner of a [`Dispatcher`]; supplies the admission policy and the fallback sinks.
pub trait NetHost: Sized {
    fn dispatcher(&self) -> &Dispatcher<Self>;

    fn should_discard(&self, _addr: SocketAddr, _header: &PacketHeader) -> bool {
        false
    }

    fn on_directory_frame(&mut self, addr: SocketAddr, frame: &[u8]) {
        log::debug!("Ignoring {} byte directory frame from {}", frame.len(), addr);
    }

    fn on_unhandled(&mut self, addr: SocketAddr, header: PacketHeader, _frame: &[u8]) {
        log::warn!("No handler for {:?} from {}", header.packet_type, addr);
    }
}

pub fn dispatch<C: NetHost>(ctx: &mut C, addr: SocketAddr, data: &[u8]) {
    match ctx.dispatcher().route(addr, data) {
        Route::Directory => ctx.on_directory_frame(addr, data),
        Route::Malformed(e) => {
            log::warn!("Dropping malformed frame from {}: {}", addr, e);
        }
        Route::Handler(header, handler) => {
            if ctx.should_discard(addr, &header) {
                log::debug!("Discarded {:?} from {}", header.packet_type, addr);
                return;
            }
            handler(ctx, addr, data);
        }
        Route::Unhandled(header) => {
            if ctx.should_discard(addr, &header) {
                log::debug!("Discarded {:?} from {}", header.packet_type, addr);
                return;
            }
            ctx.on_unhandled(addr, header, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::{Connect, Packet, Snapshot};

    #[derive(Default)]
    struct Host {
        dispatcher: Dispatcher<Host>,
        blocked: Option<SocketAddr>,
        calls: Vec<&'static str>,
    }

    impl NetHost for Host {
        fn dispatcher(&self) -> &Dispatcher<Self> {
            &self.dispatcher
        }

        fn should_discard(&self, addr: SocketAddr, _header: &PacketHeader) -> bool {
            self.blocked == Some(addr)
        }

        fn on_directory_frame(&mut self, _addr: SocketAddr, _frame: &[u8]) {
            self.calls.push("directory");
        }

        fn on_unhandled(&mut self, _addr: SocketAddr, _header: PacketHeader, _frame: &[u8]) {
            self.calls.push("fallback");
        }
    }

    fn on_snapshot(host: &mut Host, _addr: SocketAddr, data: &[u8]) {
        if Packet::<Snapshot>::decode(data).is_ok() {
            host.calls.push("snapshot");
        }
    }

    fn on_snapshot_again(host: &mut Host, _addr: SocketAddr, _data: &[u8]) {
        host.calls.push("snapshot-2");
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 7000))
    }

    fn snapshot_frame() -> Vec<u8> {
        Packet::new(1, Snapshot::default()).encode().unwrap().to_vec()
    }

    #[test]
    fn test_registered_handler_invoked() {
        let mut host = Host::default();
        host.dispatcher.register(PacketType::Snapshot, on_snapshot);

        dispatch(&mut host, peer(), &snapshot_frame());
        assert_eq!(host.calls, vec!["snapshot"]);
    }

    #[test]
    fn test_register_overwrites() {
        let mut host = Host::default();
        host.dispatcher.register(PacketType::Snapshot, on_snapshot);
        host.dispatcher.register(PacketType::Snapshot, on_snapshot_again);

        dispatch(&mut host, peer(), &snapshot_frame());
        assert_eq!(host.calls, vec!["snapshot-2"]);
    }

    #[test]
    fn test_unregistered_goes_to_fallback() {
        let mut host = Host::default();
        host.dispatcher.register(PacketType::Snapshot, on_snapshot);
        assert!(host.dispatcher.unregister(PacketType::Snapshot));

        dispatch(&mut host, peer(), &snapshot_frame());
        let connect = Packet::new(
            0,
            Connect {
                server_id: 1,
                player_name: "a".to_string(),
            },
        );
        dispatch(&mut host, peer(), &connect.encode().unwrap());
        assert_eq!(host.calls, vec!["fallback", "fallback"]);
    }

    #[test]
    fn test_directory_frames_bypass_decoding() {
        let mut host = Host::default();
        host.dispatcher.set_directory(Some(peer()));
        host.dispatcher.register(PacketType::Snapshot, on_snapshot);

        dispatch(&mut host, peer(), b"slack lobby");
        dispatch(&mut host, peer(), &snapshot_frame());
        assert_eq!(host.calls, vec!["directory", "directory"]);
    }

    #[test]
    fn test_should_discard_drops() {
        let mut host = Host {
            blocked: Some(peer()),
            ..Default::default()
        };
        host.dispatcher.register(PacketType::Snapshot, on_snapshot);

        dispatch(&mut host, peer(), &snapshot_frame());
        let other = SocketAddr::from(([127, 0, 0, 1], 7001));
        dispatch(&mut host, other, &snapshot_frame());
        assert_eq!(host.calls, vec!["snapshot"]);
    }

    #[test]
    fn test_malformed_frame_dropped() {
        let mut host = Host::default();
        host.dispatcher.register(PacketType::Snapshot, on_snapshot);

        dispatch(&mut host, peer(), &[1, 0, 0]);
        dispatch(&mut host, peer(), &[200, 0, 0, 0, 0, 0, 0, 0]);
        assert!(host.calls.is_empty());

        // a valid header with a short payload reaches the handler, which rejects it
        dispatch(&mut host, peer(), &snapshot_frame()[..10]);
        assert!(host.calls.is_empty());
    }
}
