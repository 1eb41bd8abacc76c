//! Application layer of the controller.
//!
//! # Sub-modules
//!
//! - **`channel`** – The client half of the authenticated call wrapper and
//!   the [`CallTransport`](channel::CallTransport) seam it sends through.
//!
//! - **`session`** – [`PeerSession`](session::PeerSession): the typed device
//!   operations of one peer, plus the factory that opens sessions.
//!
//! - **`registry`** – [`SessionRegistry`](registry::SessionRegistry): turns
//!   discovered peer addresses into sessions and device events, and routes
//!   connect/disconnect commands to the right session.
//!
//! Nothing here opens a socket; the TCP transport and the UDP requester live
//! in `infrastructure`.

pub mod channel;
pub mod registry;
pub mod session;

pub use channel::{AuthenticatedChannel, CallTransport};
pub use registry::{DeviceEvents, RegistryConfig, RegistryError, SessionRegistry};
pub use session::{PeerSession, SessionFactory};
