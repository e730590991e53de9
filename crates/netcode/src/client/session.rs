use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;

use crate::net::{
    CodecError, Connect, DirectoryCommand, DirectoryVerb, Disconnect, Dispatcher, EntityRegistry,
    InputBits, JoinLobby, LeaveLobby, NetEntity, NetHost, Packet, PacketHandler, PacketHeader,
    PacketType, Payload, Periodic, PlayerInput, ReceiverHandle, RefreshPlayerList, ReliableKey,
    ReliableRegistry, SequenceFilter, Snapshot, SnapshotHistory, StartGame, Transport,
    UNASSIGNED_ID, UdpTransport, WorkQueue, decode_or_log, dispatch, sequence_greater_than,
};

use super::config::ClientConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// The embedding game as seen by the client session.
pub trait ClientGame {
    type Entity: NetEntity;

    /// The locally controlled player. Sampled for prediction, snapped on correction.
    fn main_player(&mut self) -> &mut Self::Entity;

    /// Creates the local stand-in for a remote player seen for the first time.
    fn spawn(&mut self, snapshot: &Snapshot) -> Self::Entity;

    fn local_input(&mut self) -> InputBits {
        InputBits::empty()
    }

    fn on_connected(&mut self, _server_id: i32) {}

    fn on_disconnected(&mut self) {}

    fn on_corrected(&mut self, _snapshot: &Snapshot) {}

    fn on_player_list(&mut self, _players: &[String]) {}

    fn on_start_game(&mut self, _start: &StartGame) {}

    fn on_directory(&mut self, _command: &DirectoryCommand) {}

    fn on_reliable_expired(&mut self, key: &ReliableKey) {
        log::warn!("Reliable message {} was never acknowledged", key);
    }

    fn on_event(&mut self, _addr: SocketAddr, _header: PacketHeader, _frame: &[u8]) {}
}

type Task<G, T> = fn(&mut ClientSession<G, T>);

pub struct ClientSession<G: ClientGame, T: Transport> {
    game: G,
    transport: T,
    config: ClientConfig,
    dispatcher: Dispatcher<ClientSession<G, T>>,
    queue: WorkQueue<ClientSession<G, T>>,
    reliable: ReliableRegistry,
    history: SnapshotHistory<Snapshot>,
    entities: EntityRegistry<G::Entity>,
    snapshot_filter: SequenceFilter<i32>,
    state: ConnectionState,
    server: Option<SocketAddr>,
    player_name: String,
    main_player_id: Option<i32>,
    seqno: u32,
    match_seqno: u32,
    connect_frame: Option<Bytes>,
    connect_timer: Periodic<Task<G, T>>,
    snapshot_timer: Periodic<Task<G, T>>,
    reliable_timer: Periodic<Task<G, T>>,
    corrections: u64,
}

fn lobby_key(kind: PacketType, player_name: &str) -> ReliableKey {
    ReliableKey::new(kind, player_name)
}

impl<G: ClientGame, T: Transport> ClientSession<G, T> {
    pub fn new(game: G, transport: T, config: ClientConfig) -> Self {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(PacketType::Connect, Self::handle_connect as PacketHandler<Self>);
        dispatcher.register(PacketType::Snapshot, Self::handle_snapshot as PacketHandler<Self>);
        dispatcher.register(PacketType::Disconnect, Self::handle_disconnect as PacketHandler<Self>);
        dispatcher.register(PacketType::JoinLobby, Self::handle_join_lobby as PacketHandler<Self>);
        dispatcher.register(
            PacketType::LeaveLobby,
            Self::handle_leave_lobby as PacketHandler<Self>,
        );
        dispatcher.register(PacketType::StartGame, Self::handle_start_game as PacketHandler<Self>);
        dispatcher.register(
            PacketType::RefreshPlayerList,
            Self::handle_player_list as PacketHandler<Self>,
        );
        dispatcher.set_directory(config.directory);

        let history = SnapshotHistory::new(config.prediction_buffer_size)
            .with_tolerance(config.reconcile_tolerance);
        let reliable_timer =
            Periodic::new(Self::resend_reliable as Task<G, T>, config.reliable_period);

        Self {
            game,
            transport,
            dispatcher,
            queue: WorkQueue::new(),
            reliable: ReliableRegistry::with_policy(config.retry_policy),
            history,
            entities: EntityRegistry::new(),
            snapshot_filter: SequenceFilter::new(),
            state: ConnectionState::Disconnected,
            server: None,
            player_name: String::new(),
            main_player_id: None,
            seqno: 0,
            match_seqno: 0,
            connect_frame: None,
            connect_timer: Periodic::idle(),
            snapshot_timer: Periodic::idle(),
            reliable_timer,
            corrections: 0,
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

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn queue(&self) -> WorkQueue<Self> {
        self.queue.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn server(&self) -> Option<SocketAddr> {
        self.server
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    pub fn main_player_id(&self) -> Option<i32> {
        self.main_player_id
    }

    pub fn seqno(&self) -> u32 {
        self.seqno
    }

    pub fn history(&self) -> &SnapshotHistory<Snapshot> {
        &self.history
    }

    pub fn entities(&self) -> &EntityRegistry<G::Entity> {
        &self.entities
    }

    pub fn reliable(&self) -> &ReliableRegistry {
        &self.reliable
    }

    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    pub fn is_sending_snapshots(&self) -> bool {
        !self.snapshot_timer.is_idle()
    }

    /// Starts the connect handshake. The CONNECT is repeated every retry period until the
    /// server acknowledges it.
    pub fn connect(&mut self, server: SocketAddr, player_name: &str) -> Result<(), CodecError> {
        let packet = Packet::new(
            self.seqno,
            Connect {
                server_id: UNASSIGNED_ID,
                player_name: player_name.to_string(),
            },
        );
        let frame = packet.encode()?;

        log::info!("Connecting to {} as {}", server, player_name);
        self.server = Some(server);
        self.player_name = player_name.to_string();
        self.main_player_id = None;
        self.state = ConnectionState::Connecting;

        self.transport.send_to(server, &frame);
        self.connect_frame = Some(frame);
        self.connect_timer =
            Periodic::new(Self::retry_connect as Task<G, T>, self.config.connect_retry_period);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let (Some(server), Some(server_id)) = (self.server, self.main_player_id) {
            let packet = Packet::new(
                self.seqno,
                Disconnect {
                    server_id,
                    player_name: self.player_name.clone(),
                },
            );
            self.send(server, &packet);
            log::info!("Disconnected from {}", server);
        }
        self.reset();
        self.server = None;
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.main_player_id = None;
        self.connect_frame = None;
        self.connect_timer = Periodic::idle();
        self.snapshot_timer = Periodic::idle();
        self.seqno = 0;
        self.match_seqno = 0;
        self.history.clear();
        self.entities.clear();
        self.reliable.clear();
        self.snapshot_filter.clear();
        self.queue.clear();
    }

    /// Seqnos keep counting from where the previous run stopped. Echoes of the main player
    /// older than the first seqno of this run are ignored.
    pub fn begin_snapshots(&mut self) {
        log::debug!("Sending snapshots every {:?}", self.config.snapshot_period);
        self.match_seqno = self.seqno;
        self.snapshot_timer =
            Periodic::new(Self::snapshot_tick as Task<G, T>, self.config.snapshot_period);
    }

    pub fn stop_snapshots(&mut self) {
        self.snapshot_timer = Periodic::idle();
        self.history.clear();
    }

    /// Tears down the match: remote entities are destroyed and prediction stops.
    pub fn end_match(&mut self) {
        self.stop_snapshots();
        self.entities.clear();
    }

    pub fn join_lobby(&mut self, lobby: Option<&str>) -> Result<(), CodecError> {
        let key = lobby_key(PacketType::JoinLobby, &self.player_name);
        self.reliable.remove(&lobby_key(PacketType::LeaveLobby, &self.player_name));
        let packet = Packet::new(
            self.seqno,
            JoinLobby {
                player_name: self.player_name.clone(),
                lobby_name: lobby.map(str::to_string),
            },
        );
        self.send_reliable(key, &packet)
    }

    pub fn leave_lobby(&mut self, lobby: Option<&str>) -> Result<(), CodecError> {
        let key = lobby_key(PacketType::LeaveLobby, &self.player_name);
        self.reliable.remove(&lobby_key(PacketType::JoinLobby, &self.player_name));
        let packet = Packet::new(
            self.seqno,
            LeaveLobby {
                player_name: self.player_name.clone(),
                lobby_name: lobby.map(str::to_string),
            },
        );
        self.send_reliable(key, &packet)
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

    /// Runs one simulation tick: queued network work first, then the timers.
    pub fn update(&mut self, dt: Duration) -> usize {
        let queue = self.queue.clone();
        let processed = queue.drain(self);

        if let Some(retry) = self.connect_timer.due(dt) {
            retry(self);
        }
        if let Some(tick) = self.snapshot_timer.due(dt) {
            tick(self);
        }
        if let Some(resend) = self.reliable_timer.due(dt) {
            resend(self);
        }
        self.history.advance_ack_timer(dt);

        processed
    }

    fn next_seqno(&mut self) -> u32 {
        let seqno = self.seqno;
        self.seqno = self.seqno.wrapping_add(1);
        seqno
    }

    fn send<P: Payload>(&mut self, addr: SocketAddr, packet: &Packet<P>) {
        match packet.encode() {
            Ok(frame) => self.transport.send_to(addr, &frame),
            Err(e) => log::warn!("Failed to encode {:?}: {}", P::TYPE, e),
        }
    }

    fn send_reliable<P: Payload>(
        &mut self,
        key: ReliableKey,
        packet: &Packet<P>,
    ) -> Result<(), CodecError> {
        let Some(server) = self.server else {
            log::warn!("Not connected, dropping {:?}", P::TYPE);
            return Ok(());
        };
        self.reliable.add(key.clone(), server, packet)?;
        self.reliable.send_now(&key, &mut self.transport);
        Ok(())
    }

    fn retry_connect(&mut self) {
        if let (Some(server), Some(frame)) = (self.server, &self.connect_frame) {
            log::debug!("Retrying connect to {}", server);
            self.transport.send_to(server, frame);
        }
    }

    fn resend_reliable(&mut self) {
        for key in self.reliable.resend(&mut self.transport) {
            self.game.on_reliable_expired(&key);
        }
    }

    fn snapshot_tick(&mut self) {
        let (Some(server), Some(server_id)) = (self.server, self.main_player_id) else {
            return;
        };

        let seqno = self.next_seqno();
        let snapshot = Snapshot::capture(server_id, &*self.game.main_player());
        let packet = Packet::new(seqno, snapshot);
        self.history.record(packet.clone());
        self.send(server, &packet);

        let input = PlayerInput {
            server_id,
            input: self.game.local_input(),
        };
        self.send(server, &Packet::new(seqno, input));
    }

    fn handle_connect(&mut self, addr: SocketAddr, data: &[u8]) {
        let Some(packet) = decode_or_log::<Connect>(addr, data) else {
            return;
        };
        if self.connect_frame.take().is_none() {
            log::debug!("Duplicate connect ack from {}", addr);
            return;
        }

        let server_id = packet.payload.server_id;
        self.connect_timer = Periodic::idle();
        self.state = ConnectionState::Connected;
        self.main_player_id = Some(server_id);
        log::info!("Connected to {} as player {}", addr, server_id);
        self.game.on_connected(server_id);
    }

    fn handle_snapshot(&mut self, addr: SocketAddr, data: &[u8]) {
        let Some(packet) = decode_or_log::<Snapshot>(addr, data) else {
            return;
        };
        let server_id = packet.payload.server_id;

        if !self.snapshot_filter.accept(server_id, packet.seqno) {
            log::debug!(
                "Snapshot {} for player {} received out of order",
                packet.seqno,
                server_id
            );
            return;
        }

        if Some(server_id) == self.main_player_id {
            if self.snapshot_timer.is_idle()
                || sequence_greater_than(self.match_seqno, packet.seqno)
            {
                log::debug!("Snapshot {} predates the current match", packet.seqno);
                return;
            }
            if !self.history.reconcile(&packet) {
                log::debug!("Out of sync with the server at seqno {}, correcting", packet.seqno);
                packet.payload.apply(self.game.main_player());
                self.corrections += 1;
                self.game.on_corrected(&packet.payload);
            }
            return;
        }

        match self.entities.get_mut(server_id) {
            Some(entity) => packet.payload.apply(entity),
            None => {
                log::info!("Spawning player {}", server_id);
                let entity = self.game.spawn(&packet.payload);
                self.entities.put(server_id, entity);
            }
        }
    }

    fn handle_disconnect(&mut self, addr: SocketAddr, data: &[u8]) {
        let Some(packet) = decode_or_log::<Disconnect>(addr, data) else {
            return;
        };
        let server_id = packet.payload.server_id;

        if self.state == ConnectionState::Connecting && server_id == UNASSIGNED_ID {
            log::warn!("Connection refused by {}", addr);
            self.reset();
            self.game.on_disconnected();
            return;
        }

        if Some(server_id) == self.main_player_id {
            log::info!("Disconnected by {}", addr);
            self.reset();
            self.game.on_disconnected();
            return;
        }

        self.snapshot_filter.forget(&server_id);
        if self.entities.kill(server_id) {
            log::info!("Player {} ({}) left", server_id, packet.payload.player_name);
        }
    }

    fn handle_join_lobby(&mut self, addr: SocketAddr, data: &[u8]) {
        let Some(packet) = decode_or_log::<JoinLobby>(addr, data) else {
            return;
        };
        if self
            .reliable
            .remove(&lobby_key(PacketType::JoinLobby, &packet.payload.player_name))
        {
            log::debug!("Lobby join acknowledged by {}", addr);
        }
    }

    fn handle_leave_lobby(&mut self, addr: SocketAddr, data: &[u8]) {
        let Some(packet) = decode_or_log::<LeaveLobby>(addr, data) else {
            return;
        };
        if self
            .reliable
            .remove(&lobby_key(PacketType::LeaveLobby, &packet.payload.player_name))
        {
            log::debug!("Lobby leave acknowledged by {}", addr);
        }
    }

    fn handle_start_game(&mut self, addr: SocketAddr, data: &[u8]) {
        let Some(packet) = decode_or_log::<StartGame>(addr, data) else {
            return;
        };
        // echo back so the sender stops resending
        self.send(addr, &packet);

        let start = packet.payload;
        if !start.host_ip.is_empty() {
            match resolve_host(&start.host_ip, start.host_port) {
                Some(host) => self.server = Some(host),
                None => {
                    log::warn!("Cannot resolve match host {}:{}", start.host_ip, start.host_port);
                    return;
                }
            }
        }
        if start.server_id != UNASSIGNED_ID {
            self.main_player_id = Some(start.server_id);
        }

        if self.snapshot_timer.is_idle() {
            log::info!("Match {} starting", start.lobby_name);
            self.begin_snapshots();
        }
        self.game.on_start_game(&start);
    }

    fn handle_player_list(&mut self, addr: SocketAddr, data: &[u8]) {
        let Some(packet) = decode_or_log::<RefreshPlayerList>(addr, data) else {
            return;
        };
        self.game.on_player_list(&packet.payload.players);
    }
}

fn resolve_host(host_ip: &str, host_port: u32) -> Option<SocketAddr> {
    let port = u16::try_from(host_port).ok()?;
    (host_ip, port).to_socket_addrs().ok()?.next()
}

impl<G: ClientGame + 'static, T: Transport + 'static> ClientSession<G, T> {
    /// Queues a received frame as if it had come off the socket.
    pub fn receive(&self, addr: SocketAddr, frame: &[u8]) {
        let frame = Bytes::copy_from_slice(frame);
        self.queue
            .push_from(addr, move |session: &mut Self| dispatch(session, addr, &frame));
    }
}

impl<G: ClientGame + 'static> ClientSession<G, UdpTransport> {
    pub fn bind<A: ToSocketAddrs>(game: G, addr: A, config: ClientConfig) -> io::Result<Self> {
        let transport = UdpTransport::bind(addr)?;
        Ok(Self::new(game, transport, config))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn poll_network(&mut self) -> io::Result<usize> {
        let queue = self.queue.clone();
        self.transport.poll(&queue)
    }

    pub fn spawn_receiver(&self) -> io::Result<ReceiverHandle> {
        self.transport.spawn_receiver(self.queue.clone())
    }
}

impl<G: ClientGame, T: Transport> NetHost for ClientSession<G, T> {
    fn dispatcher(&self) -> &Dispatcher<Self> {
        &self.dispatcher
    }

    fn should_discard(&self, addr: SocketAddr, _header: &PacketHeader) -> bool {
        self.server != Some(addr)
    }

    fn on_directory_frame(&mut self, addr: SocketAddr, frame: &[u8]) {
        let command = match DirectoryCommand::parse(frame) {
            Ok(command) => command,
            Err(e) => {
                log::warn!("Bad directory frame from {}: {}", addr, e);
                return;
            }
        };

        if self.reliable.acknowledge_directory(&command) {
            log::debug!("Directory acknowledged {}", command);
        }

        if command.verb == DirectoryVerb::Invite {
            let fields = command.argument_fields();
            if fields.len() >= 2 {
                let ack = DirectoryCommand::from_fields(DirectoryVerb::InviteAck, &fields[..2]);
                self.transport.send_to(addr, &ack.to_frame());
            }
        }

        self.game.on_directory(&command);
    }

    fn on_unhandled(&mut self, addr: SocketAddr, header: PacketHeader, frame: &[u8]) {
        self.game.on_event(addr, header, frame);
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::net::{RecordingTransport, Transform};

    #[derive(Debug, Default)]
    struct Body {
        transform: Transform,
    }

    impl NetEntity for Body {
        fn transform(&self) -> Transform {
            self.transform
        }

        fn set_transform(&mut self, transform: Transform) {
            self.transform = transform;
        }
    }

    #[derive(Default)]
    struct TestGame {
        player: Body,
        connected: Option<i32>,
        disconnected: usize,
        corrected: usize,
        players: Vec<String>,
        directory: Vec<DirectoryCommand>,
    }

    impl ClientGame for TestGame {
        type Entity = Body;

        fn main_player(&mut self) -> &mut Body {
            &mut self.player
        }

        fn spawn(&mut self, snapshot: &Snapshot) -> Body {
            Body {
                transform: snapshot.transform(),
            }
        }

        fn local_input(&mut self) -> InputBits {
            InputBits::FORWARD
        }

        fn on_connected(&mut self, server_id: i32) {
            self.connected = Some(server_id);
        }

        fn on_disconnected(&mut self) {
            self.disconnected += 1;
        }

        fn on_corrected(&mut self, _snapshot: &Snapshot) {
            self.corrected += 1;
        }

        fn on_player_list(&mut self, players: &[String]) {
            self.players = players.to_vec();
        }

        fn on_directory(&mut self, command: &DirectoryCommand) {
            self.directory.push(command.clone());
        }
    }

    type Session = ClientSession<TestGame, RecordingTransport>;

    const TICK: Duration = Duration::from_millis(60);
    const SECOND: Duration = Duration::from_secs(1);

    fn server() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9001))
    }

    fn directory() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 8484))
    }

    fn frame<P: Payload>(seqno: u32, payload: P) -> Bytes {
        Packet::new(seqno, payload).encode().unwrap()
    }

    fn sent_types(session: &mut Session) -> Vec<PacketType> {
        session
            .transport_mut()
            .take()
            .into_iter()
            .map(|(_, frame)| PacketHeader::decode(&frame).unwrap().packet_type)
            .collect()
    }

    fn connected(server_id: i32) -> Session {
        let mut session = Session::new(
            TestGame::default(),
            RecordingTransport::new(),
            ClientConfig::default(),
        );
        session.connect(server(), "alice").unwrap();
        session.receive(
            server(),
            &frame(
                0,
                Connect {
                    server_id,
                    player_name: "alice".to_string(),
                },
            ),
        );
        session.update(Duration::ZERO);
        session.transport_mut().take();
        session
    }

    #[test]
    fn test_connect_retries_until_acked() {
        let mut session = Session::new(
            TestGame::default(),
            RecordingTransport::new(),
            ClientConfig::default(),
        );
        session.connect(server(), "alice").unwrap();
        assert_eq!(session.state(), ConnectionState::Connecting);

        session.update(SECOND);
        session.update(SECOND);
        assert_eq!(sent_types(&mut session), vec![PacketType::Connect; 3]);

        session.receive(
            server(),
            &frame(
                0,
                Connect {
                    server_id: 4,
                    player_name: "alice".to_string(),
                },
            ),
        );
        session.update(SECOND);
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.main_player_id(), Some(4));
        assert_eq!(session.game().connected, Some(4));

        session.update(SECOND);
        assert!(session.transport().sent().is_empty());
    }

    #[test]
    fn test_connection_refused() {
        let mut session = Session::new(
            TestGame::default(),
            RecordingTransport::new(),
            ClientConfig::default(),
        );
        session.connect(server(), "alice").unwrap();
        session.receive(
            server(),
            &frame(
                0,
                Disconnect {
                    server_id: UNASSIGNED_ID,
                    player_name: "alice".to_string(),
                },
            ),
        );
        session.update(Duration::ZERO);

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.game().disconnected, 1);
    }

    #[test]
    fn test_snapshot_and_input_share_seqno() {
        let mut session = connected(2);
        session.game_mut().player.transform.position = Vec3::new(1.0, 2.0, 3.0);
        session.begin_snapshots();

        session.update(TICK);
        session.update(TICK);

        let sent = session.transport_mut().take();
        assert_eq!(sent.len(), 4);
        let snapshot = Packet::<Snapshot>::decode(&sent[2].1).unwrap();
        let input = Packet::<PlayerInput>::decode(&sent[3].1).unwrap();
        assert_eq!(snapshot.seqno, 1);
        assert_eq!(input.seqno, 1);
        assert_eq!(snapshot.payload.server_id, 2);
        assert_eq!(snapshot.payload.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(input.payload.input, InputBits::FORWARD);
        assert_eq!(session.history().seqno(), 1);

        session.stop_snapshots();
        assert_eq!(session.seqno(), 2);
        assert!(session.history().is_empty());
        session.update(TICK);
        assert!(session.transport().sent().is_empty());
    }

    #[test]
    fn test_matching_echo_keeps_prediction() {
        let mut session = connected(2);
        session.game_mut().player.transform.position = Vec3::new(5.0, 0.0, 0.0);
        session.begin_snapshots();
        session.update(TICK);

        // the player keeps moving before the echo arrives
        session.game_mut().player.transform.position = Vec3::new(6.0, 0.0, 0.0);
        session.receive(
            server(),
            &frame(0, Snapshot::new(2, Vec3::new(5.0, 0.0, 0.0), Vec3::ZERO)),
        );
        session.update(Duration::ZERO);

        assert_eq!(session.corrections(), 0);
        assert_eq!(session.game().player.transform.position, Vec3::new(6.0, 0.0, 0.0));
    }

    #[test]
    fn test_mismatch_snaps_main_player() {
        let mut session = connected(2);
        session.game_mut().player.transform.position = Vec3::new(5.0, 0.0, 0.0);
        session.begin_snapshots();
        session.update(TICK);

        let corrected = Vec3::new(4.0, 0.0, 0.0);
        session.receive(server(), &frame(0, Snapshot::new(2, corrected, Vec3::ZERO)));
        session.update(Duration::ZERO);

        assert_eq!(session.corrections(), 1);
        assert_eq!(session.game().corrected, 1);
        assert_eq!(session.game().player.transform.position, corrected);
        assert_eq!(session.history().get(0).unwrap().payload.position, corrected);
    }

    #[test]
    fn test_rematch_keeps_counting_and_ignores_old_echoes() {
        let mut session = connected(2);
        let first = Vec3::new(1.0, 0.0, 0.0);
        session.game_mut().player.transform.position = first;
        session.begin_snapshots();
        for _ in 0..3 {
            session.update(TICK);
        }

        session.end_match();
        // echo of the last snapshot of the first match, still in flight
        session.receive(server(), &frame(2, Snapshot::new(2, first, Vec3::ZERO)));
        session.update(Duration::ZERO);

        let second = Vec3::new(7.0, 0.0, 0.0);
        session.game_mut().player.transform.position = second;
        session.begin_snapshots();
        session.transport_mut().take();
        session.update(TICK);

        let sent = session.transport_mut().take();
        assert_eq!(Packet::<Snapshot>::decode(&sent[0].1).unwrap().seqno, 3);

        session.receive(server(), &frame(2, Snapshot::new(2, first, Vec3::ZERO)));
        session.receive(server(), &frame(3, Snapshot::new(2, second, Vec3::ZERO)));
        session.update(Duration::ZERO);

        assert_eq!(session.corrections(), 0);
        assert_eq!(session.game().player.transform.position, second);
    }

    #[test]
    fn test_remote_players_spawn_and_leave() {
        let mut session = connected(2);
        let a = Vec3::new(1.0, 0.0, 0.0);
        let b = Vec3::new(2.0, 0.0, 0.0);

        session.receive(server(), &frame(5, Snapshot::new(7, a, Vec3::ZERO)));
        session.receive(server(), &frame(3, Snapshot::new(7, b, Vec3::ZERO)));
        session.update(Duration::ZERO);

        assert_eq!(session.entities().len(), 1);
        assert_eq!(session.entities().get(7).unwrap().transform.position, a);

        session.receive(
            server(),
            &frame(
                0,
                Disconnect {
                    server_id: 7,
                    player_name: "bob".to_string(),
                },
            ),
        );
        session.update(Duration::ZERO);
        assert!(session.entities().is_empty());
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_frames_from_strangers_discarded() {
        let mut session = connected(2);
        let stranger = SocketAddr::from(([127, 0, 0, 1], 9999));
        session.receive(stranger, &frame(0, Snapshot::new(7, Vec3::ONE, Vec3::ZERO)));
        session.update(Duration::ZERO);

        assert!(session.entities().is_empty());
    }

    #[test]
    fn test_kicked_resets_session() {
        let mut session = connected(2);
        session.begin_snapshots();
        session.receive(
            server(),
            &frame(
                0,
                Disconnect {
                    server_id: 2,
                    player_name: "alice".to_string(),
                },
            ),
        );
        session.update(Duration::ZERO);

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.main_player_id(), None);
        assert!(!session.is_sending_snapshots());
        assert_eq!(session.game().disconnected, 1);
    }

    #[test]
    fn test_join_lobby_resent_until_acked() {
        let mut session = connected(2);
        session.join_lobby(Some("dust")).unwrap();
        session.update(SECOND);
        session.update(SECOND);
        assert_eq!(sent_types(&mut session), vec![PacketType::JoinLobby; 3]);

        session.receive(
            server(),
            &frame(
                0,
                JoinLobby {
                    player_name: "alice".to_string(),
                    lobby_name: Some("dust".to_string()),
                },
            ),
        );
        session.update(SECOND);
        assert!(session.reliable().is_empty());
        assert!(session.transport().sent().is_empty());
    }

    #[test]
    fn test_leave_lobby_withdraws_join() {
        let mut session = connected(2);
        session.join_lobby(None).unwrap();
        session.leave_lobby(None).unwrap();

        let keys: Vec<_> = session.reliable().keys().cloned().collect();
        assert_eq!(keys, vec![ReliableKey::new(PacketType::LeaveLobby, "alice")]);
    }

    #[test]
    fn test_start_game_acked_and_snapshots_begin() {
        let mut session = connected(2);
        let start = StartGame {
            lobby_name: "dust".to_string(),
            server_id: 2,
            host_ip: String::new(),
            host_port: 0,
        };
        session.receive(server(), &frame(0, start.clone()));
        session.update(Duration::ZERO);

        let sent = session.transport_mut().take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, server());
        assert_eq!(Packet::<StartGame>::decode(&sent[0].1).unwrap().payload, start);
        assert!(session.is_sending_snapshots());
        assert_eq!(session.server(), Some(server()));
    }

    #[test]
    fn test_start_game_switches_host() {
        let mut session = connected(2);
        session.receive(
            server(),
            &frame(
                0,
                StartGame {
                    lobby_name: "dust".to_string(),
                    server_id: 9,
                    host_ip: "127.0.0.1".to_string(),
                    host_port: 9100,
                },
            ),
        );
        session.update(Duration::ZERO);

        assert_eq!(session.server(), Some(SocketAddr::from(([127, 0, 0, 1], 9100))));
        assert_eq!(session.main_player_id(), Some(9));
    }

    #[test]
    fn test_player_list_forwarded() {
        let mut session = connected(2);
        session.receive(
            server(),
            &frame(
                0,
                RefreshPlayerList {
                    players: vec!["alice".to_string(), "bob".to_string()],
                },
            ),
        );
        session.update(Duration::ZERO);
        assert_eq!(session.game().players, vec!["alice", "bob"]);
    }

    #[test]
    fn test_directory_invite_answered() {
        let config = ClientConfig {
            directory: Some(directory()),
            ..Default::default()
        };
        let mut session = Session::new(TestGame::default(), RecordingTransport::new(), config);
        session.receive(directory(), b"pinvi bob:alice");
        session.update(Duration::ZERO);

        assert_eq!(
            session.transport().sent(),
            &[(directory(), Bytes::from_static(b"piack bob:alice"))]
        );
        assert_eq!(session.game().directory.len(), 1);
    }

    #[test]
    fn test_directory_request_withdrawn_by_ack() {
        let config = ClientConfig {
            directory: Some(directory()),
            ..Default::default()
        };
        let mut session = Session::new(TestGame::default(), RecordingTransport::new(), config);
        let join =
            DirectoryCommand::from_fields(DirectoryVerb::JoinLobby, &["alice", "EU", "dust"]);
        assert!(session.send_directory(&join));
        assert_eq!(session.reliable().len(), 1);

        session.receive(directory(), b"pjack alice:127.0.0.1:9001");
        session.update(Duration::ZERO);
        assert!(session.reliable().is_empty());
    }
}
