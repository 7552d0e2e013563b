//! Broadcast routing: resolve recipient sets and deliver events.
//!
//! The [`BroadcastRouter`] never mutates the registry or group membership.
//! It is handed a membership snapshot (see [`recipients`]) and passes the
//! whole recipient list to the [`Transport`] in one call. Custom
//! request/response events are dispatched to [`RequestHandler`]s
//! registered by event name.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::events::{Fanout, OutboundEvent};
use crate::groups::GroupMembership;
use crate::session::SessionId;
use crate::transport::Transport;

/// Example request event answered with a unicast reply.
pub const HELLO: &str = "hello";
/// Reply to [`HELLO`].
pub const HELLO_REPLY: &str = "hello-reply";

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Handles a custom request. The returned event, if any, is sent back to the
/// requesting session only.
pub trait RequestHandler: Send + Sync {
    /// Build a reply for `sender`.
    fn handle(&self, sender: SessionId, data: &Value) -> Option<OutboundEvent>;
}

/// Blanket implementation for closures.
impl<F> RequestHandler for F
where
    F: Fn(SessionId, &Value) -> Option<OutboundEvent> + Send + Sync,
{
    fn handle(&self, sender: SessionId, data: &Value) -> Option<OutboundEvent> {
        self(sender, data)
    }
}

/// Answers `hello{message}` with `hello-reply{message: "hello, <message>"}`.
pub fn hello_handler(_sender: SessionId, data: &Value) -> Option<OutboundEvent> {
    let message = data
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| data.as_str())
        .unwrap_or_default();
    Some(OutboundEvent::reply(
        HELLO_REPLY,
        json!({ "message": format!("hello, {message}") }),
    ))
}

// ---------------------------------------------------------------------------
// Recipient resolution
// ---------------------------------------------------------------------------

/// Resolve who receives an event with the given fan-out policy.
///
/// `Everyone` always includes the sender, whether or not it is a member of
/// `group` yet.
pub fn recipients(
    groups: &GroupMembership,
    group: &str,
    sender: SessionId,
    fanout: Fanout,
) -> Vec<SessionId> {
    match fanout {
        Fanout::Sender => vec![sender],
        Fanout::Others => groups.members_excluding(group, sender).into_iter().collect(),
        Fanout::Everyone => {
            let mut all = vec![sender];
            all.extend(groups.members_excluding(group, sender));
            all
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients the transport accepted the event for.
    pub delivered: usize,
    /// Recipients whose delivery failed (dropped silently).
    pub failed: usize,
}

/// Delivers events and owns the custom request handlers.
pub struct BroadcastRouter {
    transport: Arc<dyn Transport>,
    handlers: HashMap<String, Box<dyn RequestHandler>>,
}

impl BroadcastRouter {
    /// Create a router with no request handlers.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a custom request event name.
    pub fn register<H: RequestHandler + 'static>(&mut self, name: impl Into<String>, handler: H) {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    /// The handler registered for `name`.
    pub fn handler(&self, name: &str) -> Option<&dyn RequestHandler> {
        self.handlers.get(name).map(|h| h.as_ref())
    }

    /// Send `event` to each recipient. A failed delivery never stops the
    /// others and is only logged.
    pub fn deliver<I>(&self, recipients: I, event: &OutboundEvent) -> DeliveryReport
    where
        I: IntoIterator<Item = SessionId>,
    {
        let recipients: Vec<SessionId> = recipients.into_iter().collect();
        if recipients.is_empty() {
            return DeliveryReport::default();
        }
        let failures = self.transport.send_to_all(&recipients, event);
        for e in &failures {
            tracing::debug!("Dropped {}: {e}", event.name);
        }
        DeliveryReport {
            delivered: recipients.len().saturating_sub(failures.len()),
            failed: failures.len(),
        }
    }
}
