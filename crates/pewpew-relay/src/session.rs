//! Session and player records.
//!
//! A [`Session`] is one live transport connection. It moves through
//! Connected → Registered → Disconnected and carries a [`Player`] once the
//! client has signed up.

use std::fmt;
use std::num::ParseIntError;

use serde::{Deserialize, Serialize};

/// Opaque connection identifier assigned by the transport layer.
///
/// Serialized as a decimal string so clients can treat it like any other
/// socket id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0.to_string()
    }
}

impl TryFrom<String> for SessionId {
    type Error = ParseIntError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse().map(SessionId)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport connected, no player attached yet.
    Connected,
    /// Sign-up succeeded; the session is a member of the default group.
    Registered,
    /// Terminal. The session is being removed from the registry.
    Disconnected,
}

/// A logical game participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Globally unique player identifier.
    pub id: String,
    /// The session that owns this player.
    pub socket_id: SessionId,
    /// Display name as supplied by the client.
    pub name: String,
}

/// One live transport connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Registry key.
    pub id: SessionId,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Set exactly once, on successful sign-up.
    pub player: Option<Player>,
}

impl Session {
    /// Create a freshly connected session with no player.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::Connected,
            player: None,
        }
    }

    /// Whether a player has been attached.
    pub fn is_registered(&self) -> bool {
        self.state == SessionState::Registered
    }
}
