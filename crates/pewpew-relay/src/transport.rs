//! The relay's outbound seam to the transport layer.

use crate::events::OutboundEvent;
use crate::session::SessionId;

/// A single delivery attempt failed. Never fatal; fan-out swallows it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The session has no live connection (already disconnected or unknown).
    #[error("session {0} is not connected")]
    Disconnected(SessionId),
    /// The session's outbound queue is full (slow peer).
    #[error("outbound queue for session {0} is full")]
    QueueFull(SessionId),
    /// The event could not be encoded for the wire.
    #[error("failed to encode event for session {session}: {reason}")]
    Encode {
        /// Intended recipient.
        session: SessionId,
        /// Encoder error message.
        reason: String,
    },
}

/// Delivers events to individual sessions.
///
/// Implementations must not block: enqueue and return. Sending to a session
/// that has already gone away returns an error rather than panicking.
pub trait Transport: Send + Sync {
    /// Unicast `event` to `session`.
    fn send_to(&self, session: SessionId, event: &OutboundEvent) -> Result<(), DeliveryError>;

    /// Send `event` to each of `sessions`, returning the failed deliveries.
    /// Transports that encode events should override this to encode once.
    fn send_to_all(&self, sessions: &[SessionId], event: &OutboundEvent) -> Vec<DeliveryError> {
        sessions
            .iter()
            .filter_map(|&session| self.send_to(session, event).err())
            .collect()
    }
}
