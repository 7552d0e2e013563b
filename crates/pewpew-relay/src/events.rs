//! Inbound and outbound relay events and the fan-out policy table.
//!
//! In-game payloads are opaque [`serde_json::Value`]s: the relay forwards
//! them without looking inside.

use serde_json::{Value, json};

use crate::session::Player;

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// Client asks to register a player.
pub const SIGNUP: &str = "signup";
/// Movement / state update.
pub const PLAYER_UPDATE: &str = "player-update";
/// Sword swing.
pub const PLAYER_USE_SWORD: &str = "player-use-sword";
/// A hit landed on another player.
pub const PLAYER_HIT: &str = "player-hit";
/// Sign-up succeeded (sent to the new player).
pub const JOINED_SUCCESSFULLY: &str = "joined-successfully";
/// A new player joined (sent to everyone else).
pub const PLAYER_JOINED: &str = "player-joined";
/// Sign-up was rejected.
pub const SIGNUP_FAILED: &str = "signup-failed";

// ---------------------------------------------------------------------------
// Fan-out policy
// ---------------------------------------------------------------------------

/// Who receives an event, relative to the session that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fanout {
    /// Only the originating session.
    Sender,
    /// Every group member except the originating session.
    Others,
    /// The originating session and every other group member.
    Everyone,
}

/// Every kind of event the relay emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `joined-successfully`
    SignupSuccess,
    /// `signup-failed`
    SignupFailed,
    /// `player-joined`
    PlayerJoined,
    /// `player-update`
    PlayerUpdate,
    /// `player-use-sword`
    PlayerUseSword,
    /// `player-hit`
    PlayerHit,
    /// Reply to a custom request.
    Reply,
}

impl EventKind {
    /// The dispatch policy for this kind of event.
    ///
    /// `player-use-sword` is echoed back to its sender; the other in-game
    /// events are not.
    pub fn fanout(self) -> Fanout {
        match self {
            EventKind::SignupSuccess => Fanout::Sender,
            EventKind::SignupFailed => Fanout::Sender,
            EventKind::PlayerJoined => Fanout::Others,
            EventKind::PlayerUpdate => Fanout::Others,
            EventKind::PlayerUseSword => Fanout::Everyone,
            EventKind::PlayerHit => Fanout::Others,
            EventKind::Reply => Fanout::Sender,
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Reasons an inbound event cannot be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// The payload does not have the shape this event requires.
    #[error("malformed {event} payload: {reason}")]
    MalformedPayload {
        /// Event name.
        event: String,
        /// What was wrong.
        reason: String,
    },
}

/// An event received from a client.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// `signup{name}`; a bare string payload is taken as the name.
    Signup {
        /// Requested display name.
        name: String,
    },
    /// `player-update{..}`
    PlayerUpdate(Value),
    /// `player-use-sword{..}`
    PlayerUseSword(Value),
    /// `player-hit{..}`
    PlayerHit(Value),
    /// Anything else; resolved against the router's request handlers.
    Request {
        /// Event name.
        name: String,
        /// Raw payload.
        data: Value,
    },
}

impl InboundEvent {
    /// Interpret an event name and payload.
    pub fn parse(name: &str, data: Value) -> Result<Self, EventError> {
        match name {
            SIGNUP => Ok(InboundEvent::Signup {
                name: signup_name(data)?,
            }),
            PLAYER_UPDATE => Ok(InboundEvent::PlayerUpdate(data)),
            PLAYER_USE_SWORD => Ok(InboundEvent::PlayerUseSword(data)),
            PLAYER_HIT => Ok(InboundEvent::PlayerHit(data)),
            other => Ok(InboundEvent::Request {
                name: other.to_string(),
                data,
            }),
        }
    }

    /// The wire name of this event.
    pub fn name(&self) -> &str {
        match self {
            InboundEvent::Signup { .. } => SIGNUP,
            InboundEvent::PlayerUpdate(_) => PLAYER_UPDATE,
            InboundEvent::PlayerUseSword(_) => PLAYER_USE_SWORD,
            InboundEvent::PlayerHit(_) => PLAYER_HIT,
            InboundEvent::Request { name, .. } => name.as_str(),
        }
    }
}

fn signup_name(data: Value) -> Result<String, EventError> {
    let malformed = |reason: &str| EventError::MalformedPayload {
        event: SIGNUP.to_string(),
        reason: reason.to_string(),
    };

    match data {
        Value::String(name) => Ok(name),
        Value::Object(mut fields) => match fields.remove("name") {
            Some(Value::String(name)) => Ok(name),
            Some(_) => Err(malformed("`name` must be a string")),
            None => Err(malformed("missing `name`")),
        },
        _ => Err(malformed("expected an object with a `name`")),
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// An event the relay sends to one or more sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    /// What kind of event this is; decides the fan-out.
    pub kind: EventKind,
    /// Wire name.
    pub name: String,
    /// Payload.
    pub data: Value,
}

impl OutboundEvent {
    /// `joined-successfully{Player}`
    pub fn joined_successfully(player: &Player) -> Self {
        Self::player_event(EventKind::SignupSuccess, JOINED_SUCCESSFULLY, player)
    }

    /// `player-joined{Player}`
    pub fn player_joined(player: &Player) -> Self {
        Self::player_event(EventKind::PlayerJoined, PLAYER_JOINED, player)
    }

    /// `signup-failed{reason}`
    pub fn signup_failed(reason: impl Into<String>) -> Self {
        let reason: String = reason.into();
        Self {
            kind: EventKind::SignupFailed,
            name: SIGNUP_FAILED.to_string(),
            data: json!({ "reason": reason }),
        }
    }

    /// Re-broadcast of an in-game event, payload untouched. `None` for
    /// events that are not relayed.
    pub fn relay(event: InboundEvent) -> Option<Self> {
        let (kind, name, data) = match event {
            InboundEvent::PlayerUpdate(data) => (EventKind::PlayerUpdate, PLAYER_UPDATE, data),
            InboundEvent::PlayerUseSword(data) => {
                (EventKind::PlayerUseSword, PLAYER_USE_SWORD, data)
            }
            InboundEvent::PlayerHit(data) => (EventKind::PlayerHit, PLAYER_HIT, data),
            InboundEvent::Signup { .. } | InboundEvent::Request { .. } => return None,
        };
        Some(Self {
            kind,
            name: name.to_string(),
            data,
        })
    }

    /// Reply to a custom request.
    pub fn reply(name: impl Into<String>, data: Value) -> Self {
        Self {
            kind: EventKind::Reply,
            name: name.into(),
            data,
        }
    }

    fn player_event(kind: EventKind, name: &str, player: &Player) -> Self {
        Self {
            kind,
            name: name.to_string(),
            data: json!(player),
        }
    }
}
