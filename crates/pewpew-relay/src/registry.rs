//! In-memory table of live sessions keyed by [`SessionId`].

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::session::{Player, Session, SessionId, SessionState};

/// Errors returned by [`Registry`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No session exists for the given id.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    /// A session with this id is already registered.
    #[error("duplicate session {0}")]
    DuplicateSession(SessionId),
    /// The session already has a player attached.
    #[error("session {0} is already registered")]
    AlreadyRegistered(SessionId),
}

/// Active sessions. Not synchronized; the owner serializes access.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<SessionId, Session>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new session in the `Connected` state.
    pub fn put(&mut self, id: SessionId) -> Result<&Session, RegistryError> {
        match self.sessions.entry(id) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateSession(id)),
            Entry::Vacant(slot) => Ok(&*slot.insert(Session::new(id))),
        }
    }

    /// Look up a session.
    pub fn get(&self, id: SessionId) -> Result<&Session, RegistryError> {
        self.sessions
            .get(&id)
            .ok_or(RegistryError::UnknownSession(id))
    }

    /// Remove a session. Removing an absent id is a no-op.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id).map(|mut session| {
            session.state = SessionState::Disconnected;
            session
        })
    }

    /// Attach a player and move the session to `Registered`.
    pub fn attach_player(
        &mut self,
        id: SessionId,
        player: Player,
    ) -> Result<&Player, RegistryError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(RegistryError::UnknownSession(id))?;

        if session.player.is_some() {
            return Err(RegistryError::AlreadyRegistered(id));
        }

        session.state = SessionState::Registered;
        Ok(&*session.player.insert(player))
    }

    /// Whether a session with this id exists.
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the registry holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of sessions with an attached player.
    pub fn registered_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_registered()).count()
    }
}
