//! HTTP to WebSocket upgrade for console connections.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::HeaderMap;
use axum::http::header::SEC_WEBSOCKET_PROTOCOL;

use crate::error::SidecarError;

/// Subprotocol VNC clients must advertise.
pub const VNC_SUBPROTOCOL: &str = "plain.kubevirt.io";

/// Read and write buffer size for upgraded connections.
pub const BUFFER_SIZE: usize = 10 * 1024;

/// Validates and configures WebSocket upgrades.
///
/// Origins are not checked: the sidecar sits behind the cluster's API
/// server and is never reachable from the internet directly.
#[derive(Debug, Clone)]
pub struct ConnectionUpgrader {
    subprotocol: &'static str,
    buffer_size: usize,
}

impl Default for ConnectionUpgrader {
    fn default() -> Self {
        Self {
            subprotocol: VNC_SUBPROTOCOL,
            buffer_size: BUFFER_SIZE,
        }
    }
}

impl ConnectionUpgrader {
    /// Subprotocol required from clients.
    #[must_use]
    pub const fn subprotocol(&self) -> &'static str {
        self.subprotocol
    }

    /// Buffer size used for the socket and reads from the backend.
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Checks the handshake and returns an upgrade ready for `on_upgrade`.
    ///
    /// # Errors
    ///
    /// Returns [`SidecarError::Upgrade`] if axum rejected the handshake or the
    /// client did not offer the required subprotocol.
    pub fn prepare(
        &self,
        headers: &HeaderMap,
        upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    ) -> Result<WebSocketUpgrade, SidecarError> {
        let upgrade = upgrade.map_err(|rejection| SidecarError::Upgrade(rejection.body_text()))?;

        if !offers_subprotocol(headers, self.subprotocol) {
            return Err(SidecarError::Upgrade(format!(
                "client did not offer subprotocol {}",
                self.subprotocol
            )));
        }

        Ok(upgrade
            .protocols([self.subprotocol])
            .read_buffer_size(self.buffer_size)
            .write_buffer_size(self.buffer_size))
    }
}

/// Returns `true` if any `Sec-WebSocket-Protocol` header lists `protocol`.
#[must_use]
pub fn offers_subprotocol(headers: &HeaderMap, protocol: &str) -> bool {
    headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim() == protocol)
}
