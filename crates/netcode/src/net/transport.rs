use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;

use super::codec::MAX_PACKET_SIZE;
use super::dispatch::{NetHost, dispatch};
use super::queue::WorkQueue;

const RECEIVER_IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Best-effort datagram output. Implementations log failures instead of returning them.
pub trait Transport {
    fn send_to(&mut self, addr: SocketAddr, frame: &[u8]);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_failures: u64,
}

/// Live counters shared between the transport and its receiver thread.
#[derive(Debug, Default)]
struct NetworkCounters {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    send_failures: AtomicU64,
}

impl NetworkCounters {
    fn record_received(&self, size: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(size as u64, Ordering::Relaxed);
    }

    fn record_sent(&self, size: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(size as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> NetworkStats {
        NetworkStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    counters: Arc<NetworkCounters>,
    recv_buffer: [u8; MAX_PACKET_SIZE],
}

impl UdpTransport {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            counters: Arc::new(NetworkCounters::default()),
            recv_buffer: [0u8; MAX_PACKET_SIZE],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Counters so far, including datagrams taken by a receiver thread.
    pub fn stats(&self) -> NetworkStats {
        self.counters.snapshot()
    }

    /// Moves every datagram currently waiting on the socket into `queue`, one unit of
    /// work per datagram. Never blocks.
    pub fn poll<C: NetHost + 'static>(&mut self, queue: &WorkQueue<C>) -> io::Result<usize> {
        let mut received = 0;

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    self.counters.record_received(size);
                    enqueue_frame(queue, addr, Bytes::copy_from_slice(&self.recv_buffer[..size]));
                    received += 1;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port-unreachable from an earlier send surfaces here on some platforms
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(received)
    }

    /// Runs the receive loop on its own thread. Each datagram becomes queued work; nothing
    /// else is touched from that thread. Do not also call [`UdpTransport::poll`].
    pub fn spawn_receiver<C: NetHost + 'static>(
        &self,
        queue: WorkQueue<C>,
    ) -> io::Result<ReceiverHandle> {
        let socket = self.socket.try_clone()?;
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let counters = Arc::clone(&self.counters);

        let thread = thread::Builder::new()
            .name(format!("udp-recv-{}", self.local_addr))
            .spawn(move || {
                let mut buffer = [0u8; MAX_PACKET_SIZE];
                while flag.load(Ordering::SeqCst) {
                    match socket.recv_from(&mut buffer) {
                        Ok((size, addr)) => {
                            counters.record_received(size);
                            enqueue_frame(&queue, addr, Bytes::copy_from_slice(&buffer[..size]));
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(RECEIVER_IDLE_SLEEP);
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => {}
                        Err(e) => {
                            log::warn!("Receive failed: {}", e);
                            thread::sleep(RECEIVER_IDLE_SLEEP);
                        }
                    }
                }
                log::debug!("Receiver thread stopped");
            })?;

        Ok(ReceiverHandle {
            running,
            thread: Some(thread),
        })
    }
}

impl Transport for UdpTransport {
    fn send_to(&mut self, addr: SocketAddr, frame: &[u8]) {
        match self.socket.send_to(frame, addr) {
            Ok(bytes) => self.counters.record_sent(bytes),
            Err(e) => {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("Send to {} failed: {}", addr, e);
            }
        }
    }
}

fn enqueue_frame<C: NetHost + 'static>(queue: &WorkQueue<C>, addr: SocketAddr, frame: Bytes) {
    queue.push_from(addr, move |ctx: &mut C| dispatch(ctx, addr, &frame));
}

pub struct ReceiverHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReceiverHandle {
    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Receiver thread panicked");
            }
        }
    }
}

impl Drop for ReceiverHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Transport that keeps every frame instead of sending it. Useful for driving a session
/// without sockets.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Vec<(SocketAddr, Bytes)>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> &[(SocketAddr, Bytes)] {
        &self.sent
    }

    pub fn sent_to(&self, addr: SocketAddr) -> impl Iterator<Item = &Bytes> + '_ {
        self.sent
            .iter()
            .filter(move |(to, _)| *to == addr)
            .map(|(_, frame)| frame)
    }

    pub fn take(&mut self) -> Vec<(SocketAddr, Bytes)> {
        std::mem::take(&mut self.sent)
    }
}

impl Transport for RecordingTransport {
    fn send_to(&mut self, addr: SocketAddr, frame: &[u8]) {
        self.sent.push((addr, Bytes::copy_from_slice(frame)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::dispatch::Dispatcher;
    use crate::net::protocol::PacketHeader;

    #[derive(Default)]
    struct Sink {
        dispatcher: Dispatcher<Sink>,
        frames: Vec<(SocketAddr, Vec<u8>)>,
    }

    impl NetHost for Sink {
        fn dispatcher(&self) -> &Dispatcher<Self> {
            &self.dispatcher
        }

        fn on_directory_frame(&mut self, addr: SocketAddr, frame: &[u8]) {
            self.frames.push((addr, frame.to_vec()));
        }

        fn on_unhandled(&mut self, addr: SocketAddr, _header: PacketHeader, frame: &[u8]) {
            self.frames.push((addr, frame.to_vec()));
        }
    }

    fn wait_for_frames(transport: &mut UdpTransport, queue: &WorkQueue<Sink>, count: usize) {
        let start = std::time::Instant::now();
        while queue.len() < count && start.elapsed() < Duration::from_millis(500) {
            transport.poll(queue).unwrap();
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_poll_enqueues_without_dispatching() {
        let mut receiver = UdpTransport::bind("127.0.0.1:0").unwrap();
        let mut sender = UdpTransport::bind("127.0.0.1:0").unwrap();
        let queue = WorkQueue::<Sink>::new();

        let frame = crate::net::protocol::Packet::new(
            1,
            crate::net::protocol::Snapshot::default(),
        )
        .encode()
        .unwrap();
        sender.send_to(receiver.local_addr(), &frame);
        wait_for_frames(&mut receiver, &queue, 1);

        let mut sink = Sink::default();
        assert!(sink.frames.is_empty());
        assert_eq!(queue.drain(&mut sink), 1);
        assert_eq!(sink.frames.len(), 1);
        assert_eq!(sink.frames[0].0, sender.local_addr());
        assert_eq!(sink.frames[0].1, frame.to_vec());
        assert_eq!(sender.stats().packets_sent, 1);
        assert_eq!(receiver.stats().packets_received, 1);
    }

    #[test]
    fn test_receiver_thread_counts_frames() {
        let receiver = UdpTransport::bind("127.0.0.1:0").unwrap();
        let mut sender = UdpTransport::bind("127.0.0.1:0").unwrap();
        let queue = WorkQueue::<Sink>::new();
        let mut handle = receiver.spawn_receiver(queue.clone()).unwrap();

        sender.send_to(receiver.local_addr(), b"one");
        sender.send_to(receiver.local_addr(), b"three");
        let start = std::time::Instant::now();
        while queue.len() < 2 && start.elapsed() < Duration::from_millis(500) {
            thread::sleep(Duration::from_millis(1));
        }
        handle.stop();

        let stats = receiver.stats();
        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.bytes_received, 8);
        assert_eq!(sender.stats().bytes_sent, 8);
    }

    #[test]
    fn test_recording_transport() {
        let mut transport = RecordingTransport::new();
        let a = SocketAddr::from(([127, 0, 0, 1], 5000));
        let b = SocketAddr::from(([127, 0, 0, 1], 5001));
        transport.send_to(a, b"one");
        transport.send_to(b, b"two");
        transport.send_to(a, b"three");

        assert_eq!(transport.sent_to(a).count(), 2);
        assert_eq!(transport.take().len(), 3);
        assert!(transport.sent().is_empty());
    }
}
