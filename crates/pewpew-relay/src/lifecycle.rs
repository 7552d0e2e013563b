//! Session lifecycle: Connected → Registered → Disconnected.
//!
//! [`Relay`] is the single owner of the [`Registry`] and the
//! [`GroupMembership`] table. Both sit behind one lock so they can never be
//! observed out of step. Every transition goes through here; the router only
//! ever sees snapshots.
//!
//! The identity generator is called with the lock released, on the blocking
//! pool, so a slow generator only delays the sign-up that needs it.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::events::{EventError, EventKind, InboundEvent, OutboundEvent, SIGNUP};
use crate::groups::{DEFAULT_GROUP, GroupMembership};
use crate::identity::{IdentityGenerationFailed, IdentityGenerator};
use crate::registry::{Registry, RegistryError};
use crate::router::{
    BroadcastRouter, DeliveryReport, HELLO, RequestHandler, hello_handler, recipients,
};
use crate::session::{Player, Session, SessionId, SessionState};
use crate::transport::Transport;

/// Behavioural switches for a [`Relay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    /// Group every registered session joins.
    pub default_group: String,
    /// Drop in-game events from sessions that have not signed up.
    pub require_registration: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            default_group: DEFAULT_GROUP.to_string(),
            require_registration: false,
        }
    }
}

/// Why a sign-up was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignupError {
    /// Unknown session, or a player is already attached.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The identity generator failed.
    #[error(transparent)]
    Identity(#[from] IdentityGenerationFailed),
}

/// Why an inbound event was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The sending session is unknown to the registry.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// In-game event from a session that has not signed up.
    #[error("session {session} must sign up before sending {event}")]
    NotRegistered {
        /// Sender.
        session: SessionId,
        /// Rejected event name.
        event: String,
    },
    /// No request handler for this event name.
    #[error("no handler for event {0}")]
    UnknownEvent(String),
    /// Payload had the wrong shape.
    #[error(transparent)]
    Event(#[from] EventError),
    /// Sign-up failed.
    #[error(transparent)]
    Signup(#[from] SignupError),
}

/// Point-in-time counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Live sessions.
    pub sessions: usize,
    /// Sessions with a player attached.
    pub registered: usize,
    /// Non-empty groups.
    pub groups: usize,
}

#[derive(Default)]
struct RelayState {
    registry: Registry,
    groups: GroupMembership,
}

/// The connection/session core.
pub struct Relay {
    state: Mutex<RelayState>,
    router: BroadcastRouter,
    ids: Arc<dyn IdentityGenerator>,
    options: RelayOptions,
}

impl Relay {
    /// Create a relay that delivers through `transport` and names players
    /// with `ids`. The `hello` request handler is registered by default.
    pub fn new(
        transport: Arc<dyn Transport>,
        ids: Arc<dyn IdentityGenerator>,
        options: RelayOptions,
    ) -> Self {
        let mut router = BroadcastRouter::new(transport);
        router.register(HELLO, hello_handler);
        Self {
            state: Mutex::new(RelayState::default()),
            router,
            ids,
            options,
        }
    }

    /// Register a custom request/response handler. Replaces any handler
    /// already registered under `name`.
    pub fn register_request<H: RequestHandler + 'static>(
        &mut self,
        name: impl Into<String>,
        handler: H,
    ) {
        self.router.register(name, handler);
    }

    /// The options this relay was built with.
    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    // -----------------------------------------------------------------------
    // Transport callbacks
    // -----------------------------------------------------------------------

    /// A transport connection opened. Creates the session in `Connected`.
    pub async fn on_connect(&self, id: SessionId) -> Result<(), RegistryError> {
        let result = self.state.lock().await.registry.put(id).map(|_| ());
        match &result {
            Ok(()) => tracing::info!("Session {id} connected"),
            Err(e) => tracing::warn!("Ignoring connect: {e}"),
        }
        result
    }

    /// A transport connection closed. Leaves every group and drops the
    /// session. Safe to call for unknown or already removed sessions.
    pub async fn on_disconnect(&self, id: SessionId) -> Option<Session> {
        let (removed, left) = {
            let mut state = self.state.lock().await;
            let left = state.groups.leave_all(id);
            (state.registry.remove(id), left)
        };

        match &removed {
            Some(session) => match &session.player {
                Some(player) => tracing::info!(
                    "Session {id} disconnected, removed player '{}' (id={}) from {:?}",
                    player.name,
                    player.id,
                    left
                ),
                None => tracing::info!("Session {id} disconnected before signing up"),
            },
            None => tracing::debug!("Duplicate disconnect for session {id} ignored"),
        }
        removed
    }

    /// An event arrived from `id`. Errors are logged and the event dropped;
    /// nothing here can fail the caller.
    pub async fn on_event(&self, id: SessionId, name: &str, data: Value) {
        if let Err(e) = self.dispatch(id, name, data).await {
            match &e {
                DispatchError::Registry(RegistryError::UnknownSession(_))
                | DispatchError::Signup(SignupError::Registry(RegistryError::UnknownSession(_))) => {
                    tracing::warn!("Dropping {name} from session {id}: {e}")
                }
                DispatchError::Signup(SignupError::Identity(_)) => {
                    tracing::error!("Sign-up for session {id} failed: {e}")
                }
                _ => tracing::debug!("Dropping {name} from session {id}: {e}"),
            }
        }
    }

    /// Route one inbound event according to the fan-out table.
    ///
    /// Rejected sign-ups are answered with `signup-failed` before the error
    /// is returned.
    pub async fn dispatch(
        &self,
        id: SessionId,
        name: &str,
        data: Value,
    ) -> Result<(), DispatchError> {
        let event = match InboundEvent::parse(name, data) {
            Ok(event) => event,
            Err(e) => {
                if name == SIGNUP {
                    self.router
                        .deliver([id], &OutboundEvent::signup_failed(e.to_string()));
                }
                return Err(e.into());
            }
        };

        match event {
            InboundEvent::Signup { name } => {
                let result = self.signup(id, name).await;
                if let Err(e) = &result
                    && !matches!(e, SignupError::Registry(RegistryError::UnknownSession(_)))
                {
                    self.router
                        .deliver([id], &OutboundEvent::signup_failed(e.to_string()));
                }
                result.map(|_| ()).map_err(DispatchError::from)
            }
            InboundEvent::Request { name, data } => self.request(id, &name, &data).await,
            game_event => {
                let event_name = game_event.name().to_string();
                let outbound = OutboundEvent::relay(game_event)
                    .ok_or_else(|| DispatchError::UnknownEvent(event_name.clone()))?;
                self.broadcast(id, &outbound).await.map(|report| {
                    tracing::trace!(
                        "{event_name} from {id}: delivered {}, dropped {}",
                        report.delivered,
                        report.failed
                    );
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Connected → Registered.
    ///
    /// On success the new player has been told `joined-successfully` and
    /// every other group member `player-joined`. On failure the session is
    /// left exactly as it was.
    pub async fn signup(&self, id: SessionId, name: String) -> Result<Player, SignupError> {
        {
            let state = self.state.lock().await;
            if state.registry.get(id)?.player.is_some() {
                return Err(RegistryError::AlreadyRegistered(id).into());
            }
        }

        let player = Player {
            id: self.generate_id().await?,
            socket_id: id,
            name,
        };

        let others = {
            let mut state = self.state.lock().await;
            // Re-checked here: a concurrent sign-up may have won while the
            // lock was released.
            state.registry.attach_player(id, player.clone())?;
            state.groups.join(&self.options.default_group, id);
            let group = &self.options.default_group;

            // Queued before the lock is released so no game event relayed
            // to the new member can overtake its confirmation.
            let own = recipients(&state.groups, group, id, EventKind::SignupSuccess.fanout());
            self.router
                .deliver(own, &OutboundEvent::joined_successfully(&player));
            recipients(&state.groups, group, id, EventKind::PlayerJoined.fanout())
        };

        tracing::info!(
            "Player '{}' (id={}) registered on session {id}",
            player.name,
            player.id
        );

        self.router
            .deliver(others, &OutboundEvent::player_joined(&player));
        Ok(player)
    }

    async fn generate_id(&self) -> Result<String, IdentityGenerationFailed> {
        let ids = Arc::clone(&self.ids);
        tokio::task::spawn_blocking(move || ids.new_id())
            .await
            .map_err(|e| IdentityGenerationFailed(format!("generator task failed: {e}")))?
    }

    /// Fan an in-game event out from `id`, after checking the sender may
    /// send it. The membership snapshot is taken under the lock; delivery
    /// happens after it is released.
    async fn broadcast(
        &self,
        id: SessionId,
        event: &OutboundEvent,
    ) -> Result<DeliveryReport, DispatchError> {
        let targets = {
            let state = self.state.lock().await;
            let session = state.registry.get(id)?;
            if self.options.require_registration && session.state != SessionState::Registered {
                return Err(DispatchError::NotRegistered {
                    session: id,
                    event: event.name.clone(),
                });
            }
            recipients(
                &state.groups,
                &self.options.default_group,
                id,
                event.kind.fanout(),
            )
        };
        Ok(self.router.deliver(targets, event))
    }

    async fn request(&self, id: SessionId, name: &str, data: &Value) -> Result<(), DispatchError> {
        self.state.lock().await.registry.get(id)?;

        let handler = self
            .router
            .handler(name)
            .ok_or_else(|| DispatchError::UnknownEvent(name.to_string()))?;

        if let Some(reply) = handler.handle(id, data) {
            let targets = {
                let state = self.state.lock().await;
                recipients(
                    &state.groups,
                    &self.options.default_group,
                    id,
                    reply.kind.fanout(),
                )
            };
            self.router.deliver(targets, &reply);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// A copy of the session record, if it is live.
    pub async fn session(&self, id: SessionId) -> Option<Session> {
        self.state.lock().await.registry.get(id).ok().cloned()
    }

    /// Snapshot of a group's members.
    pub async fn members(&self, group: &str) -> HashSet<SessionId> {
        self.state.lock().await.groups.members(group)
    }

    /// Groups a session currently belongs to.
    pub async fn groups_of(&self, id: SessionId) -> Vec<String> {
        self.state.lock().await.groups.groups_of(id)
    }

    /// Current counters.
    pub async fn stats(&self) -> RelayStats {
        let state = self.state.lock().await;
        RelayStats {
            sessions: state.registry.len(),
            registered: state.registry.registered_count(),
            groups: state.groups.group_count(),
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
