//! VNC console bridging: socket discovery, WebSocket upgrade, byte proxying.
//!
//! A console request at `GET /v1/vnc` is served by a [`Session`], which finds
//! the VM's socket with a [`SocketLocator`], dials it, upgrades the request
//! through the [`ConnectionUpgrader`] and hands both endpoints to a
//! [`ProxyEngine`] until either side goes away.

pub mod engine;
pub mod handler;
pub mod locator;
pub mod session;
pub mod upgrade;

pub use engine::{Direction, ProxyEngine, StreamOutcome};
pub use locator::{SocketLocation, SocketLocator};
pub use session::{Session, SessionState};
pub use upgrade::ConnectionUpgrader;
