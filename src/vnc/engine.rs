//! Bidirectional byte pump between a WebSocket client and a backend socket.
//!
//! [`ProxyEngine::run`] spawns one copy task per direction. Both report a
//! [`StreamOutcome`] on a channel of capacity two. The first outcome cancels
//! the session; a teardown task then takes the connection halves back from
//! the copy tasks and closes each connection once. Only the first outcome
//! decides the session result.

use std::fmt;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::upgrade::BUFFER_SIZE;
use crate::error::{SidecarError, StreamError};

/// Number of outcomes a session produces, one per direction.
pub const RESULT_CHANNEL_CAPACITY: usize = 2;

/// Direction of a copy task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// WebSocket client to backend socket.
    ClientToServer,
    /// Backend socket to WebSocket client.
    ServerToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientToServer => f.write_str("client->server"),
            Self::ServerToClient => f.write_str("server->client"),
        }
    }
}

/// Result of one finished copy task.
#[derive(Debug)]
pub struct StreamOutcome {
    /// Direction the task was copying.
    pub direction: Direction,
    /// Payload bytes moved before the task ended.
    pub bytes: u64,
    /// How the task ended.
    pub result: Result<(), StreamError>,
}

impl StreamOutcome {
    /// Returns `true` if the direction ended without an error.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.result.is_ok()
    }

    /// Converts the outcome into the session result it stands for.
    ///
    /// # Errors
    ///
    /// Returns [`SidecarError::Stream`] tagged with this outcome's direction
    /// if the copy failed.
    pub fn into_result(self) -> Result<(), SidecarError> {
        let direction = self.direction;
        self.result
            .map_err(|source| SidecarError::Stream { direction, source })
    }
}

/// Owns both endpoints of one console session while bytes flow.
#[derive(Debug)]
pub struct ProxyEngine<S> {
    client: WebSocket,
    server: S,
    cancel: CancellationToken,
    chunk_size: usize,
}

impl<S> ProxyEngine<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Creates an engine over an upgraded client socket and a dialed backend.
    ///
    /// `cancel` is fired by the engine when the first direction finishes;
    /// firing it from outside stops the session early.
    #[must_use]
    pub fn new(client: WebSocket, server: S, cancel: CancellationToken) -> Self {
        Self {
            client,
            server,
            cancel,
            chunk_size: BUFFER_SIZE,
        }
    }

    /// Overrides the maximum size of a single backend read.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Streams until either side ends, then closes both connections.
    ///
    /// Returns once both copy tasks have finished and both connections have
    /// been closed.
    ///
    /// # Errors
    ///
    /// Returns the error of whichever direction finished first; the other
    /// direction's outcome is discarded.
    pub async fn run(self) -> Result<(), SidecarError> {
        let Self {
            client,
            server,
            cancel,
            chunk_size,
        } = self;

        let (client_tx, client_rx) = client.split();
        let (server_rx, server_tx) = tokio::io::split(server);
        let (results_tx, mut results_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);

        let to_server = tokio::spawn(
            stream_to_server(client_rx, server_tx, cancel.clone(), results_tx.clone())
                .in_current_span(),
        );
        let to_client = tokio::spawn(
            stream_to_client(server_rx, client_tx, chunk_size, cancel.clone(), results_tx)
                .in_current_span(),
        );
        let closer =
            tokio::spawn(teardown(cancel.clone(), to_server, to_client).in_current_span());

        let first = results_rx.recv().await;
        cancel.cancel();
        let second = results_rx.recv().await;

        if let Err(e) = closer.await {
            tracing::warn!(error = %e, "teardown task failed");
        }

        settle(first, second)
    }
}

/// Picks the session result from the outcomes in completion order.
fn settle(
    first: Option<StreamOutcome>,
    second: Option<StreamOutcome>,
) -> Result<(), SidecarError> {
    let Some(first) = first else {
        return Err(SidecarError::Internal(
            "copy tasks ended without reporting an outcome".to_string(),
        ));
    };

    tracing::debug!(
        direction = %first.direction,
        bytes = first.bytes,
        clean = first.is_clean(),
        "first direction finished"
    );
    if let Some(second) = second {
        tracing::debug!(
            direction = %second.direction,
            bytes = second.bytes,
            clean = second.is_clean(),
            "second direction finished"
        );
    }

    first.into_result()
}

fn report(results: &mpsc::Sender<StreamOutcome>, outcome: StreamOutcome) {
    if let Err(e) = results.try_send(outcome) {
        tracing::debug!(error = %e, "outcome dropped, session no longer listening");
    }
}

async fn stream_to_server<S>(
    mut client_rx: SplitStream<WebSocket>,
    mut server_tx: WriteHalf<S>,
    cancel: CancellationToken,
    results: mpsc::Sender<StreamOutcome>,
) -> (SplitStream<WebSocket>, WriteHalf<S>)
where
    S: AsyncWrite,
{
    let mut bytes = 0;
    let result = tokio::select! {
        () = cancel.cancelled() => Err(StreamError::Cancelled),
        result = copy_to_server(&mut client_rx, &mut server_tx, &mut bytes) => result,
    };
    report(
        &results,
        StreamOutcome {
            direction: Direction::ClientToServer,
            bytes,
            result,
        },
    );
    (client_rx, server_tx)
}

async fn stream_to_client<S>(
    mut server_rx: ReadHalf<S>,
    mut client_tx: SplitSink<WebSocket, Message>,
    chunk_size: usize,
    cancel: CancellationToken,
    results: mpsc::Sender<StreamOutcome>,
) -> (ReadHalf<S>, SplitSink<WebSocket, Message>)
where
    S: AsyncRead,
{
    let mut bytes = 0;
    let result = tokio::select! {
        () = cancel.cancelled() => Err(StreamError::Cancelled),
        result = copy_to_client(&mut server_rx, &mut client_tx, chunk_size, &mut bytes) => result,
    };
    report(
        &results,
        StreamOutcome {
            direction: Direction::ServerToClient,
            bytes,
            result,
        },
    );
    (server_rx, client_tx)
}

/// Writes client message payloads to the backend verbatim.
///
/// Text and binary frames are both forwarded as raw bytes. A close frame or
/// the end of the message stream is a clean finish.
async fn copy_to_server<W>(
    client_rx: &mut SplitStream<WebSocket>,
    server_tx: &mut W,
    bytes: &mut u64,
) -> Result<(), StreamError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = client_rx.next().await {
        let written = match message? {
            Message::Binary(data) => {
                server_tx.write_all(&data).await?;
                data.len()
            }
            Message::Text(text) => {
                let payload = text.as_str().as_bytes();
                server_tx.write_all(payload).await?;
                payload.len()
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        server_tx.flush().await?;
        *bytes += written as u64;
    }
    Ok(())
}

/// Forwards each backend read to the client as one binary message.
///
/// The backend hanging up is reported as [`StreamError::BackendClosed`].
async fn copy_to_client<R>(
    server_rx: &mut R,
    client_tx: &mut SplitSink<WebSocket, Message>,
    chunk_size: usize,
    bytes: &mut u64,
) -> Result<(), StreamError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let mut chunk = Vec::with_capacity(chunk_size);
        let read = server_rx.read_buf(&mut chunk).await?;
        if read == 0 {
            return Err(StreamError::BackendClosed);
        }
        client_tx.send(Message::Binary(chunk.into())).await?;
        *bytes += read as u64;
    }
}

/// Waits for cancellation, then closes each connection exactly once.
///
/// Halves held by a copy task that panicked were dropped with it, which
/// already closed them. Close failures mean the peer went first and are
/// not errors.
async fn teardown<S>(
    cancel: CancellationToken,
    to_server: JoinHandle<(SplitStream<WebSocket>, WriteHalf<S>)>,
    to_client: JoinHandle<(ReadHalf<S>, SplitSink<WebSocket, Message>)>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    cancel.cancelled().await;

    match to_client.await {
        Ok((_server_rx, mut client_tx)) => {
            if let Err(e) = client_tx.close().await {
                tracing::debug!(error = %e, "client connection already closed");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, direction = %Direction::ServerToClient, "copy task failed");
        }
    }

    match to_server.await {
        Ok((_client_rx, mut server_tx)) => {
            if let Err(e) = server_tx.shutdown().await {
                tracing::debug!(error = %e, "backend connection already closed");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, direction = %Direction::ClientToServer, "copy task failed");
        }
    }

    tracing::debug!("session connections closed");
}
