//! Test doubles shared by the unit tests.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::events::OutboundEvent;
use crate::session::SessionId;
use crate::transport::{DeliveryError, Transport};

/// Records every delivered event; can be told to fail for chosen sessions.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(SessionId, OutboundEvent)>>,
    failing: Mutex<HashSet<SessionId>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, id: SessionId) {
        self.failing.lock().unwrap().insert(id);
    }

    /// Events delivered to `id`, oldest first.
    pub fn received(&self, id: SessionId) -> Vec<OutboundEvent> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| *to == id)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Names of the events delivered to `id`, oldest first.
    pub fn received_names(&self, id: SessionId) -> Vec<String> {
        self.received(id).into_iter().map(|e| e.name).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Transport for RecordingTransport {
    fn send_to(&self, session: SessionId, event: &OutboundEvent) -> Result<(), DeliveryError> {
        if self.failing.lock().unwrap().contains(&session) {
            return Err(DeliveryError::Disconnected(session));
        }
        self.sent.lock().unwrap().push((session, event.clone()));
        Ok(())
    }
}
