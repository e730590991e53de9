use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;

use crate::net::{
    CodecError, Connect, DirectoryCommand, DirectoryVerb, Disconnect, Dispatcher, EntityRegistry,
    InputBits, JoinLobby, LIST_DELIMITER, LeaveLobby, NetEntity, NetHost, NetworkStats, Packet,
    PacketHandler, PacketHeader, PacketType, Payload, Periodic, PlayerInput, ReceiverHandle,
    RefreshPlayerList, ReliableKey, ReliableRegistry, SequenceFilter, Snapshot, SnapshotHistory,
    StartGame, Transport, UNASSIGNED_ID, UdpTransport, WorkQueue, decode_or_log, dispatch,
};

use super::config::ServerConfig;
use super::events::{DisconnectReason, ServerEvent};

/// The embedding game as seen by the server session.
pub trait ServerGame {
    type Entity: NetEntity;

    fn spawn(&mut self, server_id: i32, player_name: &str) -> Self::Entity;

    /// Last chance to overrule a client-reported snapshot before it is applied and recorded.
    fn authorize(&mut self, _entity: &Self::Entity, _snapshot: &mut Snapshot) {}

    fn on_input(&mut self, _entity: &mut Self::Entity, _input: InputBits) {}

    fn on_directory(&mut self, _command: &DirectoryCommand) {}

    fn on_event(&mut self, _addr: SocketAddr, _header: PacketHeader, _frame: &[u8]) {}
}

#[derive(Debug)]
struct ConnectedClient {
    server_id: i32,
    player_name: String,
    lobby: Option<String>,
    history: SnapshotHistory<Snapshot>,
    silence: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientInfo {
    pub server_id: i32,
    pub addr: SocketAddr,
    pub player_name: String,
    pub lobby: Option<String>,
    pub last_seqno: Option<u32>,
    pub silence: Duration,
}

type Task<G, T> = fn(&mut ServerSession<G, T>);

pub struct ServerSession<G: ServerGame, T: Transport> {
    game: G,
    transport: T,
    config: ServerConfig,
    dispatcher: Dispatcher<ServerSession<G, T>>,
    queue: WorkQueue<ServerSession<G, T>>,
    reliable: ReliableRegistry,
    clients: HashMap<SocketAddr, ConnectedClient>,
    entities: EntityRegistry<G::Entity>,
    input_filter: SequenceFilter<SocketAddr>,
    next_server_id: i32,
    seqno: u32,
    broadcast_timer: Periodic<Task<G, T>>,
    reliable_timer: Periodic<Task<G, T>>,
    pending_events: VecDeque<ServerEvent>,
}

fn start_key(addr: SocketAddr) -> ReliableKey {
    ReliableKey::new(PacketType::StartGame, addr)
}

impl<G: ServerGame, T: Transport> ServerSession<G, T> {
    pub fn new(game: G, transport: T, config: ServerConfig) -> Self {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(PacketType::Connect, Self::handle_connect as PacketHandler<Self>);
        dispatcher.register(PacketType::Snapshot, Self::handle_snapshot as PacketHandler<Self>);
        dispatcher.register(PacketType::PlayerInput, Self::handle_input as PacketHandler<Self>);
        dispatcher.register(PacketType::Disconnect, Self::handle_disconnect as PacketHandler<Self>);
        dispatcher.register(PacketType::JoinLobby, Self::handle_join_lobby as PacketHandler<Self>);
        dispatcher.register(
            PacketType::LeaveLobby,
            Self::handle_leave_lobby as PacketHandler<Self>,
        );
        dispatcher.register(PacketType::StartGame, Self::handle_start_ack as PacketHandler<Self>);
        dispatcher.set_directory(config.directory);

        let broadcast_timer =
            Periodic::new(Self::broadcast_snapshots as Task<G, T>, config.broadcast_period);
        let reliable_timer =
            Periodic::new(Self::resend_reliable as Task<G, T>, config.reliable_period);

        Self {
            game,
            transport,
            dispatcher,
            queue: WorkQueue::new(),
            reliable: ReliableRegistry::with_policy(config.retry_policy),
            clients: HashMap::new(),
            entities: EntityRegistry::new(),
            input_filter: SequenceFilter::new(),
            next_server_id: 1,
            seqno: 0,
            broadcast_timer,
            reliable_timer,
            pending_events: VecDeque::new(),
            config,
        }
    }

    pub fn game(&self) -> &G {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut G {
        &mut self.game
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn queue(&self) -> WorkQueue<Self> {
        self.queue.clone()
    }

    pub fn entities(&self) -> &EntityRegistry<G::Entity> {
        &self.entities
    }

    pub fn reliable(&self) -> &ReliableRegistry {
        &self.reliable
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_connected(&self, addr: SocketAddr) -> bool {
        self.clients.contains_key(&addr)
    }

    pub fn history(&self, addr: SocketAddr) -> Option<&SnapshotHistory<Snapshot>> {
        self.clients.get(&addr).map(|client| &client.history)
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        let mut infos: Vec<ClientInfo> = self
            .clients
            .iter()
            .map(|(addr, client)| ClientInfo {
                server_id: client.server_id,
                addr: *addr,
                player_name: client.player_name.clone(),
                lobby: client.lobby.clone(),
                last_seqno: client.history.latest().map(|packet| packet.seqno),
                silence: client.silence,
            })
            .collect();
        infos.sort_by_key(|info| info.server_id);
        infos
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    /// Runs one simulation tick: queued network work, the timers, then liveness.
    pub fn update(&mut self, dt: Duration) -> usize {
        let queue = self.queue.clone();
        let processed = queue.drain(self);

        if let Some(broadcast) = self.broadcast_timer.due(dt) {
            broadcast(self);
        }
        if let Some(resend) = self.reliable_timer.due(dt) {
            resend(self);
        }
        self.check_liveness(dt);

        self.seqno = self.seqno.wrapping_add(1);
        processed
    }

    /// Sends every client the latest snapshot of every player, each under the seqno its owner
    /// gave it.
    pub fn broadcast_snapshots(&mut self) {
        let mut frames = Vec::with_capacity(self.clients.len());
        for client in self.clients.values() {
            let Some(latest) = client.history.latest() else {
                continue;
            };
            match latest.encode() {
                Ok(frame) => frames.push(frame),
                Err(e) => log::warn!("Failed to encode snapshot of {}: {}", client.server_id, e),
            }
        }
        if frames.is_empty() {
            return;
        }

        let addrs: Vec<SocketAddr> = self.clients.keys().copied().collect();
        for addr in addrs {
            for frame in &frames {
                self.transport.send_to(addr, frame);
            }
        }
    }

    /// Tells every member of `lobby` to start the match on `host_ip:host_port`. An empty host
    /// keeps the match on this server. Resent until each client echoes it.
    ///
    /// Each member's snapshot history and input order start over with the new match.
    pub fn start_game(
        &mut self,
        lobby: &str,
        host_ip: &str,
        host_port: u16,
    ) -> Result<usize, CodecError> {
        let members: Vec<(SocketAddr, i32)> = self
            .clients
            .iter()
            .filter(|(_, client)| client.lobby.as_deref() == Some(lobby))
            .map(|(addr, client)| (*addr, client.server_id))
            .collect();

        for (addr, server_id) in &members {
            if let Some(client) = self.clients.get_mut(addr) {
                client.history.clear();
            }
            self.input_filter.forget(addr);

            let packet = Packet::new(
                self.seqno,
                StartGame {
                    lobby_name: lobby.to_string(),
                    server_id: *server_id,
                    host_ip: host_ip.to_string(),
                    host_port: u32::from(host_port),
                },
            );
            let key = start_key(*addr);
            self.reliable.add(key.clone(), *addr, &packet)?;
            self.reliable.send_now(&key, &mut self.transport);
        }

        log::info!("Starting match in lobby {} with {} players", lobby, members.len());
        self.pending_events.push_back(ServerEvent::GameStarted {
            lobby: lobby.to_string(),
            players: members.len(),
        });
        Ok(members.len())
    }

    pub fn kick(&mut self, server_id: i32) -> bool {
        let addr = self
            .clients
            .iter()
            .find(|(_, client)| client.server_id == server_id)
            .map(|(addr, _)| *addr);

        match addr {
            Some(addr) => {
                self.remove_client(addr, DisconnectReason::Kicked);
                true
            }
            None => false,
        }
    }

    pub fn shutdown(&mut self) {
        let addrs: Vec<SocketAddr> = self.clients.keys().copied().collect();
        for addr in addrs {
            self.remove_client(addr, DisconnectReason::Kicked);
        }
        self.reliable.clear();
        self.queue.clear();
    }

    pub fn send_directory(&mut self, command: &DirectoryCommand) -> bool {
        let Some(directory) = self.dispatcher.directory() else {
            log::warn!("No directory configured for {}", command);
            return false;
        };
        self.reliable
            .send_directory(directory, command, &mut self.transport);
        true
    }

    fn send<P: Payload>(&mut self, addr: SocketAddr, packet: &Packet<P>) {
        match packet.encode() {
            Ok(frame) => self.transport.send_to(addr, &frame),
            Err(e) => log::warn!("Failed to encode {:?}: {}", P::TYPE, e),
        }
    }

    fn broadcast<P: Payload>(&mut self, packet: &Packet<P>) {
        let frame = match packet.encode() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Failed to encode {:?}: {}", P::TYPE, e);
                return;
            }
        };
        for addr in self.clients.keys() {
            self.transport.send_to(*addr, &frame);
        }
    }

    fn resend_reliable(&mut self) {
        for key in self.reliable.resend(&mut self.transport) {
            self.pending_events
                .push_back(ServerEvent::ReliableExpired { key });
        }
    }

    fn check_liveness(&mut self, dt: Duration) {
        for client in self.clients.values_mut() {
            client.silence = client.silence.saturating_add(dt);
            client.history.advance_ack_timer(dt);
        }

        let Some(timeout) = self.config.client_timeout else {
            return;
        };
        let timed_out: Vec<SocketAddr> = self
            .clients
            .iter()
            .filter(|(_, client)| client.silence >= timeout)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in timed_out {
            self.remove_client(addr, DisconnectReason::Timeout);
        }
    }

    /// Tears down everything owned by `addr` and tells the remaining clients it left.
    fn remove_client(&mut self, addr: SocketAddr, reason: DisconnectReason) {
        let Some(client) = self.clients.remove(&addr) else {
            return;
        };

        self.entities.kill(client.server_id);
        self.reliable.remove_destination(addr);
        self.queue.discard_from(&addr);
        self.input_filter.forget(&addr);

        let packet = Packet::new(
            self.seqno,
            Disconnect {
                server_id: client.server_id,
                player_name: client.player_name.clone(),
            },
        );
        if reason == DisconnectReason::Kicked {
            self.send(addr, &packet);
        }
        self.broadcast(&packet);

        if let Some(lobby) = &client.lobby {
            self.refresh_roster(lobby);
        }

        log::info!(
            "Player {} ({}) {}",
            client.server_id,
            client.player_name,
            reason.as_str()
        );
        self.pending_events
            .push_back(ServerEvent::ClientDisconnected {
                server_id: client.server_id,
                addr,
                reason,
            });
    }

    /// Sends the member names of `lobby` to each of its members.
    fn refresh_roster(&mut self, lobby: &str) {
        let mut members: Vec<(i32, SocketAddr, &str)> = self
            .clients
            .iter()
            .filter(|(_, client)| client.lobby.as_deref() == Some(lobby))
            .map(|(addr, client)| (client.server_id, *addr, client.player_name.as_str()))
            .collect();
        members.sort_by_key(|(server_id, _, _)| *server_id);

        let players = members
            .iter()
            .filter(|(_, _, name)| !name.is_empty())
            .map(|(_, _, name)| name.to_string())
            .collect();
        let addrs: Vec<SocketAddr> = members.iter().map(|(_, addr, _)| *addr).collect();

        let packet = Packet::new(self.seqno, RefreshPlayerList { players });
        let frame = match packet.encode() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Failed to encode roster of {}: {}", lobby, e);
                return;
            }
        };
        for addr in addrs {
            self.transport.send_to(addr, &frame);
        }
    }

    fn handle_connect(&mut self, addr: SocketAddr, data: &[u8]) {
        let Some(packet) = decode_or_log::<Connect>(addr, data) else {
            return;
        };
        let player_name = packet.payload.player_name;

        if let Some(client) = self.clients.get_mut(&addr) {
            client.silence = Duration::ZERO;
            let ack = Packet::new(
                self.seqno,
                Connect {
                    server_id: client.server_id,
                    player_name: client.player_name.clone(),
                },
            );
            log::debug!("Re-acknowledging connect from {}", addr);
            self.send(addr, &ack);
            return;
        }

        if self.clients.len() >= self.config.max_clients {
            self.refuse(addr, player_name, "server full");
            return;
        }
        // rosters are '|'-joined
        if player_name.contains(LIST_DELIMITER) {
            self.refuse(addr, player_name, "invalid player name");
            return;
        }

        let server_id = self.next_server_id;
        self.next_server_id += 1;

        let entity = self.game.spawn(server_id, &player_name);
        self.entities.put(server_id, entity);
        self.clients.insert(
            addr,
            ConnectedClient {
                server_id,
                player_name: player_name.clone(),
                lobby: None,
                history: SnapshotHistory::new(self.config.history_capacity),
                silence: Duration::ZERO,
            },
        );

        let ack = Packet::new(
            self.seqno,
            Connect {
                server_id,
                player_name: player_name.clone(),
            },
        );
        self.send(addr, &ack);

        log::info!("Player {} ({}) connected from {}", server_id, player_name, addr);
        self.pending_events.push_back(ServerEvent::ClientConnected {
            server_id,
            addr,
            player_name,
        });
    }

    fn refuse(&mut self, addr: SocketAddr, player_name: String, reason: &str) {
        log::warn!("Refusing {} ({}): {}", addr, player_name, reason);
        let refusal = Packet::new(
            self.seqno,
            Disconnect {
                server_id: UNASSIGNED_ID,
                player_name,
            },
        );
        self.send(addr, &refusal);
        self.pending_events.push_back(ServerEvent::ConnectionDenied {
            addr,
            reason: reason.to_string(),
        });
    }

    fn handle_snapshot(&mut self, addr: SocketAddr, data: &[u8]) {
        let Some(packet) = decode_or_log::<Snapshot>(addr, data) else {
            return;
        };
        let Some(client) = self.clients.get_mut(&addr) else {
            return;
        };
        client.silence = Duration::ZERO;

        let mut snapshot = packet.payload;
        if snapshot.server_id != client.server_id {
            log::warn!(
                "{} sent a snapshot for player {}, owns {}",
                addr,
                snapshot.server_id,
                client.server_id
            );
            return;
        }
        if client.history.is_stale(packet.seqno) {
            log::debug!(
                "Snapshot {} from {} older than {}",
                packet.seqno,
                addr,
                client.history.seqno()
            );
            return;
        }

        if let Some(entity) = self.entities.get_mut(snapshot.server_id) {
            self.game.authorize(entity, &mut snapshot);
            snapshot.apply(entity);
        }
        client.history.record(Packet::new(packet.seqno, snapshot));
    }

    fn handle_input(&mut self, addr: SocketAddr, data: &[u8]) {
        let Some(packet) = decode_or_log::<PlayerInput>(addr, data) else {
            return;
        };
        let Some(client) = self.clients.get_mut(&addr) else {
            return;
        };
        client.silence = Duration::ZERO;

        if packet.payload.server_id != client.server_id {
            log::warn!("{} sent input for player {}", addr, packet.payload.server_id);
            return;
        }
        if !self.input_filter.accept(addr, packet.seqno) {
            log::debug!("Input {} from {} received out of order", packet.seqno, addr);
            return;
        }

        if let Some(entity) = self.entities.get_mut(client.server_id) {
            self.game.on_input(entity, packet.payload.input);
        }
    }

    fn handle_disconnect(&mut self, addr: SocketAddr, data: &[u8]) {
        let Some(packet) = decode_or_log::<Disconnect>(addr, data) else {
            return;
        };
        let owner = self.clients.get(&addr).map(|client| client.server_id);
        if owner != Some(packet.payload.server_id) {
            log::warn!("{} tried to disconnect player {}", addr, packet.payload.server_id);
            return;
        }
        self.remove_client(addr, DisconnectReason::Graceful);
    }

    fn handle_join_lobby(&mut self, addr: SocketAddr, data: &[u8]) {
        let Some(packet) = decode_or_log::<JoinLobby>(addr, data) else {
            return;
        };
        let lobby = packet
            .payload
            .lobby_name
            .clone()
            .unwrap_or_else(|| self.config.default_lobby.clone());
        let Some(client) = self.clients.get_mut(&addr) else {
            return;
        };
        client.silence = Duration::ZERO;

        let server_id = client.server_id;
        let previous = client.lobby.replace(lobby.clone());
        self.send(addr, &packet);

        if previous.as_deref() == Some(lobby.as_str()) {
            return;
        }
        if let Some(previous) = previous {
            self.refresh_roster(&previous);
        }
        self.refresh_roster(&lobby);

        log::info!("Player {} joined lobby {}", server_id, lobby);
        self.pending_events
            .push_back(ServerEvent::LobbyJoined { server_id, lobby });
    }

    fn handle_leave_lobby(&mut self, addr: SocketAddr, data: &[u8]) {
        let Some(packet) = decode_or_log::<LeaveLobby>(addr, data) else {
            return;
        };
        let Some(client) = self.clients.get_mut(&addr) else {
            return;
        };
        client.silence = Duration::ZERO;

        let server_id = client.server_id;
        let previous = client.lobby.take();
        self.send(addr, &packet);

        if let Some(lobby) = previous {
            self.refresh_roster(&lobby);
            log::info!("Player {} left lobby {}", server_id, lobby);
            self.pending_events
                .push_back(ServerEvent::LobbyLeft { server_id, lobby });
        }
    }

    fn handle_start_ack(&mut self, addr: SocketAddr, data: &[u8]) {
        if decode_or_log::<StartGame>(addr, data).is_none() {
            return;
        }
        if let Some(client) = self.clients.get_mut(&addr) {
            client.silence = Duration::ZERO;
        }
        if self.reliable.remove(&start_key(addr)) {
            log::debug!("{} acknowledged match start", addr);
        }
    }
}

impl<G: ServerGame + 'static, T: Transport + 'static> ServerSession<G, T> {
    /// Queues a received frame as if it had come off the socket.
    pub fn receive(&self, addr: SocketAddr, frame: &[u8]) {
        let frame = Bytes::copy_from_slice(frame);
        self.queue
            .push_from(addr, move |session: &mut Self| dispatch(session, addr, &frame));
    }
}

impl<G: ServerGame + 'static> ServerSession<G, UdpTransport> {
    pub fn bind<A: ToSocketAddrs>(game: G, addr: A, config: ServerConfig) -> io::Result<Self> {
        let transport = UdpTransport::bind(addr)?;
        Ok(Self::new(game, transport, config))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn stats(&self) -> NetworkStats {
        self.transport.stats()
    }

    pub fn poll_network(&mut self) -> io::Result<usize> {
        let queue = self.queue.clone();
        self.transport.poll(&queue)
    }

    pub fn spawn_receiver(&self) -> io::Result<ReceiverHandle> {
        self.transport.spawn_receiver(self.queue.clone())
    }
}

impl<G: ServerGame, T: Transport> NetHost for ServerSession<G, T> {
    fn dispatcher(&self) -> &Dispatcher<Self> {
        &self.dispatcher
    }

    fn should_discard(&self, addr: SocketAddr, header: &PacketHeader) -> bool {
        header.packet_type != PacketType::Connect && !self.clients.contains_key(&addr)
    }

    fn on_directory_frame(&mut self, addr: SocketAddr, frame: &[u8]) {
        let command = match DirectoryCommand::parse(frame) {
            Ok(command) => command,
            Err(e) => {
                self.pending_events.push_back(ServerEvent::Error {
                    message: format!("Bad directory frame from {}: {}", addr, e),
                });
                return;
            }
        };

        if self.reliable.acknowledge_directory(&command) {
            log::debug!("Directory acknowledged {}", command);
        }

        // the directory forwards lobby registrations to the hosting server
        if command.verb == DirectoryVerb::RegisterLobby {
            let ack =
                DirectoryCommand::new(DirectoryVerb::RegisterLobbyAck, command.argument.clone());
            self.transport.send_to(addr, &ack.to_frame());
        }

        self.game.on_directory(&command);
        self.pending_events
            .push_back(ServerEvent::Directory { command });
    }

    fn on_unhandled(&mut self, addr: SocketAddr, header: PacketHeader, frame: &[u8]) {
        if let Some(client) = self.clients.get_mut(&addr) {
            client.silence = Duration::ZERO;
        }
        self.game.on_event(addr, header, frame);
    }
}
