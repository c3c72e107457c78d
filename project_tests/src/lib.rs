//! # Mock Live Timing Feed
//!
//! An in-process WebSocket server speaking just enough of the feed protocol
//! for integration tests. Connections are served one at a time. Every text
//! frame the client sends is recorded, and the test drives the server side
//! through [`MockFeedServer::send`], [`MockFeedServer::close`] and
//! [`MockFeedServer::drop_connection`].

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

pub const HANDSHAKE: &str = "{\"protocol\":\"json\",\"version\":1}\u{1e}";
pub const PONG: &str = "{\"type\":6}\u{1e}";

enum ServerAction {
    Send(String),
    Close(u16, String),
    Drop,
}

/// What the server saw of one upgrade request.
#[derive(Debug, Clone, Default)]
pub struct UpgradeRequest {
    pub path_and_query: String,
    pub user_agent: Option<String>,
}

#[derive(Default)]
struct Recorded {
    received: Vec<String>,
    close_frames: Vec<(u16, String)>,
    requests: Vec<UpgradeRequest>,
}

pub struct MockFeedServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    recorded: Arc<Mutex<Recorded>>,
    actions: mpsc::UnboundedSender<ServerAction>,
    task: JoinHandle<()>,
}

impl MockFeedServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let accepted = Arc::new(AtomicUsize::new(0));
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let (actions, actions_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(accept_loop(listener, actions_rx, accepted.clone(), recorded.clone()));

        Ok(Self {
            addr,
            accepted,
            recorded,
            actions,
            task,
        })
    }

    /// Endpoint without the group parameter.
    pub fn url(&self) -> String {
        format!("ws://{}/signalrcore", self.addr)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Text frames received from clients, across all connections.
    pub fn received(&self) -> Vec<String> {
        self.lock().received.clone()
    }

    pub fn close_frames(&self) -> Vec<(u16, String)> {
        self.lock().close_frames.clone()
    }

    pub fn requests(&self) -> Vec<UpgradeRequest> {
        self.lock().requests.clone()
    }

    pub fn send(&self, frame: impl Into<String>) {
        let _ = self.actions.send(ServerAction::Send(frame.into()));
    }

    /// Starts a close handshake from the server side.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.actions.send(ServerAction::Close(code, reason.to_string()));
    }

    /// Drops the TCP connection without a close frame.
    pub fn drop_connection(&self) {
        let _ = self.actions.send(ServerAction::Drop);
    }

    /// Polls `check` against the recorded state until it holds or `within` elapses.
    pub async fn wait_for(&self, within: Duration, check: impl Fn(&MockFeedServer) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if check(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check(self)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for MockFeedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    mut actions: mpsc::UnboundedReceiver<ServerAction>,
    accepted: Arc<AtomicUsize>,
    recorded: Arc<Mutex<Recorded>>,
) {
    while let Ok((stream, _)) = listener.accept().await {
        let capture = recorded.clone();
        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let request = UpgradeRequest {
                path_and_query: req
                    .uri()
                    .path_and_query()
                    .map(|p| p.as_str().to_string())
                    .unwrap_or_default(),
                user_agent: req
                    .headers()
                    .get("user-agent")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
            };
            capture.lock().unwrap_or_else(|p| p.into_inner()).requests.push(request);
            Ok(resp)
        };

        let Ok(ws) = accept_hdr_async(stream, callback).await else {
            continue;
        };
        accepted.fetch_add(1, Ordering::SeqCst);
        serve(ws, &mut actions, &recorded).await;
    }
}

async fn serve(
    mut ws: WebSocketStream<TcpStream>,
    actions: &mut mpsc::UnboundedReceiver<ServerAction>,
    recorded: &Mutex<Recorded>,
) {
    loop {
        tokio::select! {
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    recorded.lock().unwrap_or_else(|p| p.into_inner()).received.push(text.as_str().to_string());
                }
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        recorded
                            .lock()
                            .unwrap_or_else(|p| p.into_inner())
                            .close_frames
                            .push((u16::from(frame.code), frame.reason.as_str().to_string()));
                    }
                    // Keep polling so the close reply is flushed.
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
            action = actions.recv() => match action {
                Some(ServerAction::Send(frame)) => {
                    if ws.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Some(ServerAction::Close(code, reason)) => {
                    let frame = CloseFrame { code: CloseCode::from(code), reason: reason.into() };
                    if ws.close(Some(frame)).await.is_err() {
                        break;
                    }
                }
                Some(ServerAction::Drop) | None => break,
            },
        }
    }
}

/// A `DATA` frame carrying one timing payload.
pub fn data_frame(payload: serde_json::Value) -> String {
    let envelope = serde_json::json!({
        "type": 1,
        "target": "timing",
        "arguments": [payload],
    });
    format!("{}\u{1e}", envelope)
}
