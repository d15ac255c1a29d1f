//! Shared application state injected into all Axum handlers.

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::vnc::{ConnectionUpgrader, SocketLocator};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Finds the VM's VNC socket for each console request.
    pub locator: SocketLocator,
    /// Handshake settings for console connections.
    pub upgrader: ConnectionUpgrader,
    /// Fired on server shutdown; every session holds a child of it.
    pub shutdown: CancellationToken,
    /// Upgraded sessions still streaming; waited on after the server stops.
    pub sessions: TaskTracker,
}

impl AppState {
    /// Builds the state around a socket locator and a shutdown token.
    #[must_use]
    pub fn new(locator: SocketLocator, shutdown: CancellationToken) -> Self {
        Self {
            locator,
            upgrader: ConnectionUpgrader::default(),
            shutdown,
            sessions: TaskTracker::new(),
        }
    }
}
