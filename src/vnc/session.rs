//! Per-request console session state machine.
//!
//! A session moves strictly forward:
//!
//! ```text
//! Init -> SocketResolved -> Dialed -> Upgraded -> Streaming -> Cancelling -> Closed
//! ```
//!
//! Any failure before streaming jumps straight to `Closed`. A session is
//! driven once and never resumed.

use std::fmt;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::engine::ProxyEngine;
use super::locator::{SocketLocation, SocketLocator};
use super::upgrade::ConnectionUpgrader;
use crate::error::SidecarError;

/// Lifecycle position of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Request accepted, nothing resolved yet.
    Init,
    /// Backend socket path found.
    SocketResolved,
    /// Backend socket connected.
    Dialed,
    /// Client handshake accepted.
    Upgraded,
    /// Bytes flowing in both directions.
    Streaming,
    /// One direction finished, connections being torn down.
    Cancelling,
    /// Session over.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::SocketResolved => "socket_resolved",
            Self::Dialed => "dialed",
            Self::Upgraded => "upgraded",
            Self::Streaming => "streaming",
            Self::Cancelling => "cancelling",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One proxied console connection.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    state: SessionState,
    history: Vec<SessionState>,
    cancel: CancellationToken,
}

impl Session {
    /// Starts a session in [`SessionState::Init`].
    ///
    /// Pass a child of the server's shutdown token so that shutting the
    /// server down ends the session too.
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Init,
            history: vec![SessionState::Init],
            cancel,
        }
    }

    /// Session identifier used in logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Every state entered so far, oldest first.
    #[must_use]
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = %self.state, to = %next, "session state changed");
        self.state = next;
        self.history.push(next);
    }

    fn fail(&mut self, err: SidecarError) -> SidecarError {
        tracing::warn!(state = %self.state, error = %err, "session failed");
        self.transition(SessionState::Closed);
        err
    }

    /// Finds the backend socket for this VM.
    ///
    /// # Errors
    ///
    /// Returns [`SidecarError::SocketResolution`] and closes the session if no
    /// VM directory is found.
    pub async fn resolve(
        &mut self,
        locator: &SocketLocator,
    ) -> Result<SocketLocation, SidecarError> {
        match locator.resolve().await {
            Ok(location) => {
                self.transition(SessionState::SocketResolved);
                Ok(location)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Connects to the backend socket.
    ///
    /// # Errors
    ///
    /// Returns [`SidecarError::Dial`] and closes the session if the socket
    /// cannot be connected.
    pub async fn dial(
        &mut self,
        location: &SocketLocation,
    ) -> Result<UnixStream, SidecarError> {
        let path = location.socket_path();
        match UnixStream::connect(&path).await {
            Ok(stream) => {
                tracing::debug!(path = %path.display(), "dialed VNC socket");
                self.transition(SessionState::Dialed);
                Ok(stream)
            }
            Err(source) => Err(self.fail(SidecarError::Dial { path, source })),
        }
    }

    /// Resolves and dials the backend in one step.
    ///
    /// # Errors
    ///
    /// See [`Session::resolve`] and [`Session::dial`].
    pub async fn connect(
        &mut self,
        locator: &SocketLocator,
    ) -> Result<UnixStream, SidecarError> {
        let location = self.resolve(locator).await?;
        self.dial(&location).await
    }

    /// Validates the client handshake.
    ///
    /// On failure the caller still owns the dialed backend and must drop it.
    ///
    /// # Errors
    ///
    /// Returns [`SidecarError::Upgrade`] and closes the session if the
    /// handshake is invalid.
    pub fn upgrade(
        &mut self,
        upgrader: &ConnectionUpgrader,
        headers: &HeaderMap,
        upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    ) -> Result<WebSocketUpgrade, SidecarError> {
        match upgrader.prepare(headers, upgrade) {
            Ok(upgrade) => {
                self.transition(SessionState::Upgraded);
                Ok(upgrade)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Proxies bytes between the client and the backend until either ends.
    ///
    /// Returns after both connections are closed, leaving the session in
    /// [`SessionState::Closed`].
    ///
    /// # Errors
    ///
    /// Returns the first direction's [`SidecarError::Stream`] failure.
    pub async fn stream<S>(
        &mut self,
        client: WebSocket,
        backend: S,
        chunk_size: usize,
    ) -> Result<(), SidecarError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.transition(SessionState::Streaming);

        let engine =
            ProxyEngine::new(client, backend, self.cancel.clone()).with_chunk_size(chunk_size);
        let cancel = self.cancel.clone();
        let (result, ()) = tokio::join!(engine.run(), async {
            cancel.cancelled().await;
            self.transition(SessionState::Cancelling);
        });

        self.transition(SessionState::Closed);
        match &result {
            Ok(()) => tracing::info!("VNC session ended"),
            Err(e) => tracing::warn!(error = %e, "VNC session ended with error"),
        }
        result
    }
}
