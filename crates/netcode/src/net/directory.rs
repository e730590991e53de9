use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use super::reliable::ReliableKey;

pub const FIELD_SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory frame is not valid utf-8")]
    InvalidUtf8,
    #[error("directory frame too short: {0:?}")]
    TooShort(String),
    #[error("unknown directory verb {0:?}")]
    UnknownVerb(String),
}

/// Five-letter commands understood by the directory (master) server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectoryVerb {
    RegisterServer,
    RegisterServerAck,
    RegisterLobby,
    RegisterLobbyAck,
    CloseLobby,
    CloseLobbyAck,
    LobbyUpdate,
    ListServers,
    ListServersAck,
    ListServersError,
    ListLobbies,
    ListLobbiesAck,
    JoinLobby,
    JoinLobbyAck,
    QuitLobby,
    QuitLobbyAck,
    Invite,
    InviteAck,
    Clear,
}

impl DirectoryVerb {
    pub const ALL: [DirectoryVerb; 19] = [
        DirectoryVerb::RegisterServer,
        DirectoryVerb::RegisterServerAck,
        DirectoryVerb::RegisterLobby,
        DirectoryVerb::RegisterLobbyAck,
        DirectoryVerb::CloseLobby,
        DirectoryVerb::CloseLobbyAck,
        DirectoryVerb::LobbyUpdate,
        DirectoryVerb::ListServers,
        DirectoryVerb::ListServersAck,
        DirectoryVerb::ListServersError,
        DirectoryVerb::ListLobbies,
        DirectoryVerb::ListLobbiesAck,
        DirectoryVerb::JoinLobby,
        DirectoryVerb::JoinLobbyAck,
        DirectoryVerb::QuitLobby,
        DirectoryVerb::QuitLobbyAck,
        DirectoryVerb::Invite,
        DirectoryVerb::InviteAck,
        DirectoryVerb::Clear,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DirectoryVerb::RegisterServer => "stser",
            DirectoryVerb::RegisterServerAck => "ssack",
            DirectoryVerb::RegisterLobby => "stlob",
            DirectoryVerb::RegisterLobbyAck => "slack",
            DirectoryVerb::CloseLobby => "close",
            DirectoryVerb::CloseLobbyAck => "clack",
            DirectoryVerb::LobbyUpdate => "lobup",
            DirectoryVerb::ListServers => "pslis",
            DirectoryVerb::ListServersAck => "psack",
            DirectoryVerb::ListServersError => "pserr",
            DirectoryVerb::ListLobbies => "pllis",
            DirectoryVerb::ListLobbiesAck => "plack",
            DirectoryVerb::JoinLobby => "pjoin",
            DirectoryVerb::JoinLobbyAck => "pjack",
            DirectoryVerb::QuitLobby => "pquit",
            DirectoryVerb::QuitLobbyAck => "pqack",
            DirectoryVerb::Invite => "pinvi",
            DirectoryVerb::InviteAck => "piack",
            DirectoryVerb::Clear => "clear",
        }
    }

    /// The request an acknowledgment answers. `None` for verbs that are not acks.
    pub fn acknowledges(self) -> Option<DirectoryVerb> {
        match self {
            DirectoryVerb::RegisterServerAck => Some(DirectoryVerb::RegisterServer),
            DirectoryVerb::RegisterLobbyAck => Some(DirectoryVerb::RegisterLobby),
            DirectoryVerb::CloseLobbyAck => Some(DirectoryVerb::CloseLobby),
            DirectoryVerb::ListServersAck | DirectoryVerb::ListServersError => {
                Some(DirectoryVerb::ListServers)
            }
            DirectoryVerb::ListLobbiesAck => Some(DirectoryVerb::ListLobbies),
            DirectoryVerb::JoinLobbyAck => Some(DirectoryVerb::JoinLobby),
            DirectoryVerb::QuitLobbyAck => Some(DirectoryVerb::QuitLobby),
            DirectoryVerb::InviteAck => Some(DirectoryVerb::Invite),
            _ => None,
        }
    }

    pub fn is_ack(self) -> bool {
        self.acknowledges().is_some()
    }

    /// Requests the directory answers with an ack; these are tracked until it arrives.
    pub fn expects_ack(self) -> bool {
        DirectoryVerb::ALL
            .into_iter()
            .any(|verb| verb.acknowledges() == Some(self))
    }

    // Leading argument fields that identify the subject of a request. Acks do not always echo
    // the full request argument, so only this prefix is used to pair them.
    fn subject_fields(self) -> Option<usize> {
        match self {
            DirectoryVerb::ListServers | DirectoryVerb::ListLobbies => Some(0),
            DirectoryVerb::RegisterServer | DirectoryVerb::JoinLobby | DirectoryVerb::QuitLobby => {
                Some(1)
            }
            DirectoryVerb::Invite => Some(2),
            _ => None,
        }
    }
}

impl fmt::Display for DirectoryVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DirectoryVerb {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DirectoryVerb::ALL
            .into_iter()
            .find(|verb| verb.as_str() == s)
            .ok_or_else(|| DirectoryError::UnknownVerb(s.to_string()))
    }
}

/// A `"<verb> <argument>"` text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryCommand {
    pub verb: DirectoryVerb,
    pub argument: String,
}

impl DirectoryCommand {
    pub fn new(verb: DirectoryVerb, argument: impl Into<String>) -> Self {
        Self {
            verb,
            argument: argument.into(),
        }
    }

    pub fn from_fields(verb: DirectoryVerb, fields: &[&str]) -> Self {
        Self::new(verb, fields.join(":"))
    }

    pub fn parse(frame: &[u8]) -> Result<Self, DirectoryError> {
        let text = std::str::from_utf8(frame).map_err(|_| DirectoryError::InvalidUtf8)?;
        let text = text.trim_end_matches(['\0', '\r', '\n']);

        let verb = text
            .get(..5)
            .ok_or_else(|| DirectoryError::TooShort(text.to_string()))?;
        let verb = verb.parse::<DirectoryVerb>()?;

        let argument = text.get(5..).unwrap_or_default();
        let argument = argument.strip_prefix(' ').unwrap_or(argument);

        Ok(Self::new(verb, argument))
    }

    pub fn to_frame(&self) -> Bytes {
        Bytes::from(self.to_string())
    }

    pub fn argument_fields(&self) -> Vec<&str> {
        if self.argument.is_empty() {
            return Vec::new();
        }
        self.argument.split(FIELD_SEPARATOR).collect()
    }

    /// Key under which this request, or the request this ack answers, is tracked for resend.
    pub fn reliable_key(&self) -> ReliableKey {
        let request = self.verb.acknowledges().unwrap_or(self.verb);
        let subject = match request.subject_fields() {
            Some(count) => self
                .argument_fields()
                .into_iter()
                .take(count)
                .collect::<Vec<_>>()
                .join(":"),
            None => self.argument.clone(),
        };
        ReliableKey::new(request.as_str(), subject)
    }
}

impl fmt::Display for DirectoryCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.argument.is_empty() {
            write!(f, "{}", self.verb)
        } else {
            write!(f, "{} {}", self.verb, self.argument)
        }
    }
}
