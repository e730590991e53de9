use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

use super::codec::CodecError;
use super::directory::DirectoryCommand;
use super::protocol::{Packet, Payload};
use super::transport::Transport;

/// Identifies one outstanding (message kind, subject) pair, e.g. `"JoinLobby:alice"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReliableKey(String);

impl ReliableKey {
    pub fn new(kind: impl fmt::Display, subject: impl fmt::Display) -> Self {
        Self(format!("{}:{}", kind, subject))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReliableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ReliableKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for ReliableKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReliable {
    pub destination: SocketAddr,
    pub frame: Bytes,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries until the entry is removed.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self { max_attempts: None }
    }

    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
        }
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Control messages awaiting acknowledgment, resent on every [`ReliableRegistry::resend`].
#[derive(Debug, Default)]
pub struct ReliableRegistry {
    pending: BTreeMap<ReliableKey, PendingReliable>,
    policy: RetryPolicy,
}

impl ReliableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            pending: BTreeMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Encodes `packet` once and stores it; a pending entry under the same key is replaced.
    pub fn add<P: Payload>(
        &mut self,
        key: ReliableKey,
        destination: SocketAddr,
        packet: &Packet<P>,
    ) -> Result<(), CodecError> {
        let frame = packet.encode()?;
        self.add_frame(key, destination, frame);
        Ok(())
    }

    pub fn add_frame(&mut self, key: ReliableKey, destination: SocketAddr, frame: Bytes) {
        let entry = PendingReliable {
            destination,
            frame,
            attempts: 0,
        };
        if self.pending.insert(key.clone(), entry).is_some() {
            log::debug!("Replaced pending reliable message {}", key);
        }
    }

    pub fn remove(&mut self, key: &ReliableKey) -> bool {
        self.pending.remove(key).is_some()
    }

    pub fn is_pending(&self, key: &ReliableKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn get(&self, key: &ReliableKey) -> Option<&PendingReliable> {
        self.pending.get(key)
    }

    /// Sends one pending entry immediately, outside the resend cadence.
    pub fn send_now<T: Transport>(&mut self, key: &ReliableKey, transport: &mut T) -> bool {
        match self.pending.get_mut(key) {
            Some(entry) => {
                transport.send_to(entry.destination, &entry.frame);
                entry.attempts += 1;
                true
            }
            None => false,
        }
    }

    /// Sends every pending frame once. Entries that ran out of attempts are dropped and their
    /// keys returned.
    pub fn resend<T: Transport>(&mut self, transport: &mut T) -> Vec<ReliableKey> {
        let policy = self.policy;
        let mut expired = Vec::new();

        self.pending.retain(|key, entry| {
            if policy.exhausted(entry.attempts) {
                log::warn!(
                    "Giving up on {} to {} after {} attempts",
                    key,
                    entry.destination,
                    entry.attempts
                );
                expired.push(key.clone());
                return false;
            }
            transport.send_to(entry.destination, &entry.frame);
            entry.attempts += 1;
            true
        });

        expired
    }

    /// Sends a directory command, tracking it until acknowledged when the verb expects an ack.
    pub fn send_directory<T: Transport>(
        &mut self,
        directory: SocketAddr,
        command: &DirectoryCommand,
        transport: &mut T,
    ) {
        if command.verb.expects_ack() {
            let key = command.reliable_key();
            self.add_frame(key.clone(), directory, command.to_frame());
            self.send_now(&key, transport);
        } else {
            transport.send_to(directory, &command.to_frame());
        }
    }

    /// Withdraws the request an incoming directory ack answers.
    pub fn acknowledge_directory(&mut self, ack: &DirectoryCommand) -> bool {
        ack.verb.is_ack() && self.remove(&ack.reliable_key())
    }

    pub fn remove_destination(&mut self, destination: SocketAddr) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, entry| entry.destination != destination);
        before - self.pending.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ReliableKey> + '_ {
        self.pending.keys()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::{JoinLobby, PacketType};
    use crate::net::transport::RecordingTransport;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn join(name: &str) -> Packet<JoinLobby> {
        Packet::new(
            0,
            JoinLobby {
                player_name: name.to_string(),
                lobby_name: Some("dust".to_string()),
            },
        )
    }

    #[test]
    fn test_resends_every_period_until_removed() {
        let mut registry = ReliableRegistry::new();
        let mut transport = RecordingTransport::new();
        let key = ReliableKey::new(PacketType::JoinLobby.tag(), "alice");
        let packet = join("alice");
        registry.add(key.clone(), addr(9001), &packet).unwrap();

        for _ in 0..5 {
            assert!(registry.resend(&mut transport).is_empty());
        }
        let expected = packet.encode().unwrap();
        assert_eq!(transport.sent().len(), 5);
        assert!(transport.sent_to(addr(9001)).all(|frame| *frame == expected));

        assert!(registry.remove(&key));
        transport.take();
        for _ in 0..5 {
            registry.resend(&mut transport);
        }
        assert!(transport.sent().is_empty());
        assert!(!registry.is_pending(&key));
    }

    #[test]
    fn test_key_collision_overwrites() {
        let mut registry = ReliableRegistry::new();
        let mut transport = RecordingTransport::new();
        let key = ReliableKey::from("join:alice");
        registry.add_frame(key.clone(), addr(1), Bytes::from_static(b"first"));
        registry.add_frame(key.clone(), addr(2), Bytes::from_static(b"second"));

        registry.resend(&mut transport);
        assert_eq!(registry.len(), 1);
        assert_eq!(transport.sent(), &[(addr(2), Bytes::from_static(b"second"))]);
    }

    #[test]
    fn test_bounded_policy_expires() {
        let mut registry = ReliableRegistry::with_policy(RetryPolicy::bounded(3));
        let mut transport = RecordingTransport::new();
        let key = ReliableKey::new("stlob", "EU:dust");
        registry.add_frame(key.clone(), addr(8484), Bytes::from_static(b"stlob EU:dust"));

        for _ in 0..3 {
            assert!(registry.resend(&mut transport).is_empty());
        }
        assert_eq!(registry.resend(&mut transport), vec![key.clone()]);
        assert_eq!(transport.sent().len(), 3);
        assert!(!registry.is_pending(&key));
    }

    #[test]
    fn test_send_now_counts_attempt() {
        let mut registry = ReliableRegistry::new();
        let mut transport = RecordingTransport::new();
        let key = ReliableKey::from("connect");
        registry.add_frame(key.clone(), addr(1), Bytes::from_static(b"c"));

        assert!(registry.send_now(&key, &mut transport));
        assert!(!registry.send_now(&ReliableKey::from("other"), &mut transport));
        assert_eq!(registry.get(&key).unwrap().attempts, 1);
        assert_eq!(transport.sent().len(), 1);
    }

    #[test]
    fn test_directory_request_withdrawn_by_ack() {
        use crate::net::directory::DirectoryVerb;

        let mut registry = ReliableRegistry::new();
        let mut transport = RecordingTransport::new();
        let join =
            DirectoryCommand::from_fields(DirectoryVerb::JoinLobby, &["alice", "EU", "dust"]);
        registry.send_directory(addr(8484), &join, &mut transport);

        let update = DirectoryCommand::new(DirectoryVerb::LobbyUpdate, "EU:dust:3");
        registry.send_directory(addr(8484), &update, &mut transport);

        assert_eq!(transport.sent().len(), 2);
        assert_eq!(registry.len(), 1);

        let ack = DirectoryCommand::parse(b"pjack alice:9001").unwrap();
        assert!(registry.acknowledge_directory(&ack));
        assert!(registry.is_empty());
        assert!(!registry.acknowledge_directory(&join));
    }

    #[test]
    fn test_remove_destination() {
        let mut registry = ReliableRegistry::new();
        registry.add_frame(ReliableKey::from("a"), addr(1), Bytes::from_static(b"a"));
        registry.add_frame(ReliableKey::from("b"), addr(2), Bytes::from_static(b"b"));
        registry.add_frame(ReliableKey::from("c"), addr(1), Bytes::from_static(b"c"));

        assert_eq!(registry.remove_destination(addr(1)), 2);
        assert_eq!(registry.keys().collect::<Vec<_>>(), vec![&ReliableKey::from("b")]);
    }
}
