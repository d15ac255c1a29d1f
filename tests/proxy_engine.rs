//! Tests for `ProxyEngine` result aggregation and teardown.
//!
//! The engine runs behind a bare route with an in-memory duplex pipe as its
//! backend, so each test controls both ends directly.

#![allow(clippy::panic)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_test::{assert_err, assert_ok};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use vnc_sidecar::error::{SidecarError, StreamError};
use vnc_sidecar::vnc::{Direction, ProxyEngine};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;
type EngineResult = Result<(), SidecarError>;
type Slot = Arc<Mutex<Option<(DuplexStream, CancellationToken, oneshot::Sender<EngineResult>)>>>;

struct Harness {
    client: Client,
    backend: DuplexStream,
    cancel: CancellationToken,
    result: oneshot::Receiver<EngineResult>,
}

fn engine_upgrade(ws: WebSocketUpgrade, slot: &Slot) -> Response {
    let taken = slot.lock().ok().and_then(|mut guard| guard.take());
    let Some((backend, cancel, done)) = taken else {
        return StatusCode::CONFLICT.into_response();
    };
    ws.on_upgrade(move |socket| async move {
        let result = ProxyEngine::new(socket, backend, cancel).run().await;
        let _ = done.send(result);
    })
}

async fn start() -> Harness {
    let (engine_side, backend) = tokio::io::duplex(64 * 1024);
    let cancel = CancellationToken::new();
    let (done, result) = oneshot::channel();
    let slot: Slot = Arc::new(Mutex::new(Some((engine_side, cancel.clone(), done))));

    let app = Router::new().route(
        "/engine",
        get(move |ws: WebSocketUpgrade| {
            let slot = Arc::clone(&slot);
            async move { engine_upgrade(ws, &slot) }
        }),
    );

    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        panic!("failed to bind listener");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("listener has no address");
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let client = match connect_async(format!("ws://{addr}/engine")).await {
        Ok((client, _)) => client,
        Err(e) => panic!("upgrade failed: {e}"),
    };

    Harness {
        client,
        backend,
        cancel,
        result,
    }
}

async fn within<F: Future>(future: F) -> F::Output {
    match tokio::time::timeout(Duration::from_secs(5), future).await {
        Ok(output) => output,
        Err(_) => panic!("timed out"),
    }
}

async fn session_result(result: oneshot::Receiver<EngineResult>) -> EngineResult {
    match within(result).await {
        Ok(result) => result,
        Err(_) => panic!("engine task dropped its result"),
    }
}

#[tokio::test]
async fn copies_both_directions() {
    let mut harness = start().await;

    assert_ok!(harness.client.send(Message::binary(b"abc".to_vec())).await);
    let mut buf = [0u8; 3];
    assert_ok!(within(harness.backend.read_exact(&mut buf)).await);
    assert_eq!(&buf, b"abc");

    assert_ok!(harness.backend.write_all(b"xyz").await);
    match within(harness.client.next()).await {
        Some(Ok(Message::Binary(data))) => assert_eq!(data.to_vec(), b"xyz".to_vec()),
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn backend_hangup_is_stream_error() {
    let mut harness = start().await;

    drop(harness.backend);

    let err = assert_err!(session_result(harness.result).await);
    let SidecarError::Stream { direction, source } = err else {
        panic!("expected a stream error");
    };
    assert_eq!(direction, Direction::ServerToClient);
    assert!(matches!(source, StreamError::BackendClosed));

    loop {
        match within(harness.client.next()).await {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
            Some(Ok(Message::Binary(data))) => panic!("unexpected data: {data:?}"),
            Some(Ok(_)) => {}
        }
    }
}

#[tokio::test]
async fn client_close_is_clean() {
    let mut harness = start().await;

    assert_ok!(harness.client.close(None).await);

    assert_ok!(session_result(harness.result).await);

    let mut buf = [0u8; 8];
    let read = within(harness.backend.read(&mut buf)).await;
    assert!(matches!(read, Ok(0)));
}

#[tokio::test]
async fn external_cancel_reports_cancelled() {
    let harness = start().await;

    harness.cancel.cancel();

    let err = assert_err!(session_result(harness.result).await);
    assert!(matches!(
        err,
        SidecarError::Stream {
            source: StreamError::Cancelled,
            ..
        }
    ));
}

#[tokio::test]
async fn reports_exactly_one_error_when_both_sides_drop() {
    let Harness {
        client,
        backend,
        result,
        ..
    } = start().await;

    drop(client);
    drop(backend);

    let err = assert_err!(session_result(result).await);
    assert!(matches!(err, SidecarError::Stream { .. }));
}
