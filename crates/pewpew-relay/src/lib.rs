//! Connection/session core for the pewpew game relay: which sessions are
//! live, which players they represent, which groups they belong to, and who
//! receives each event.

pub mod events;
pub mod groups;
pub mod identity;
pub mod lifecycle;
pub mod registry;
pub mod router;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use events::{EventError, EventKind, Fanout, InboundEvent, OutboundEvent};
pub use groups::{DEFAULT_GROUP, GroupMembership};
pub use identity::{CommandGenerator, IdentityGenerationFailed, IdentityGenerator, UuidGenerator};
pub use lifecycle::{DispatchError, Relay, RelayOptions, RelayStats, SignupError};
pub use registry::{Registry, RegistryError};
pub use router::{BroadcastRouter, DeliveryReport, RequestHandler};
pub use session::{Player, Session, SessionId, SessionState};
pub use transport::{DeliveryError, Transport};
