//! # Live Timing WSS Ingestor
//!
//! Owns the WebSocket connection to the live timing feed: opening it, sending
//! the sub-protocol handshake, running the receive loop, answering pings and
//! closing it again.
//!
//! Location: lib_livetiming/src/ingestors/timing_wss.rs

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::configs::config_feed::{FeedConfig, FeedConfigError};
use crate::core::diagnostics::{DiagnosticLog, DiagnosticSink};
use crate::core::dispatcher::FrameDispatcher;
use crate::core::publisher::{PublishedState, StatePublisher};
use crate::protocol::envelope;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors surfaced by [`LiveTimingClient::connect`].
#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Config(#[from] FeedConfigError),

    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: WsError,
    },

    #[error("Timed out after {after:?} connecting to {url}")]
    ConnectTimeout { url: String, after: Duration },

    #[error("Failed to send handshake: {0}")]
    Handshake(#[source] WsError),
}

/// Lifecycle of the client's single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LifecycleState::Disconnected => "disconnected",
            LifecycleState::Connecting => "connecting",
            LifecycleState::Open => "open",
            LifecycleState::Closing => "closing",
        };
        f.write_str(label)
    }
}

enum ConnectionCommand {
    Close,
}

/// Handle to a running connection task.
struct Connection {
    commands: mpsc::UnboundedSender<ConnectionCommand>,
    task: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Client for the live timing feed.
///
/// Construct one per feed and share it with `Arc`. At most one connection is
/// live at a time; observers read state through [`LiveTimingClient::publisher`].
pub struct LiveTimingClient {
    config: FeedConfig,
    publisher: Arc<StatePublisher>,
    diagnostics: Arc<dyn DiagnosticSink>,
    lifecycle: Arc<watch::Sender<LifecycleState>>,
    connection: Mutex<Option<Connection>>,
}

impl LiveTimingClient {
    /// Creates a disconnected client.
    pub fn new(config: FeedConfig, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            config,
            publisher: Arc::new(StatePublisher::new()),
            diagnostics,
            lifecycle: Arc::new(watch::Sender::new(LifecycleState::Disconnected)),
            connection: Mutex::new(None),
        }
    }

    /// Creates a disconnected client recording into a [`DiagnosticLog`] sized
    /// by `config.diagnostics_capacity`. The log is returned for inspection.
    pub fn with_diagnostic_log(config: FeedConfig) -> (Self, Arc<DiagnosticLog>) {
        let log = Arc::new(DiagnosticLog::new(config.diagnostics_capacity));
        (Self::new(config, log.clone()), log)
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Read side of the published state.
    pub fn publisher(&self) -> Arc<StatePublisher> {
        Arc::clone(&self.publisher)
    }

    pub fn state(&self) -> PublishedState {
        self.publisher.state()
    }

    pub fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.borrow()
    }

    pub fn subscribe_lifecycle(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Opens the connection and sends the handshake.
    ///
    /// Does nothing while a connection is live. A connection whose receive
    /// loop has already published the drop counts as gone, even if its task
    /// is still winding down; that task is awaited before a new socket is
    /// opened. On failure the error is published as `connection_error` and
    /// also returned.
    pub async fn connect(&self) -> Result<(), FeedError> {
        let mut slot = self.connection.lock().await;

        if let Some(conn) = slot.as_ref() {
            if !conn.task.is_finished() && self.publisher.is_connected() {
                log::debug!("Already connected to live timing feed; connect() ignored.");
                return Ok(());
            }
        }
        if let Some(stale) = slot.take() {
            self.retire(stale).await;
        }

        self.lifecycle.send_replace(LifecycleState::Connecting);

        let ws = match self.open_socket().await {
            Ok(ws) => ws,
            Err(e) => {
                log::error!("Live timing connection failed: {}", e);
                self.publisher.mark_failed(e.to_string());
                self.diagnostics.record_error("connect", &e);
                self.lifecycle.send_replace(LifecycleState::Disconnected);
                return Err(e);
            }
        };

        self.publisher.mark_connected();
        self.lifecycle.send_replace(LifecycleState::Open);

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let session = ConnectionTask {
            ws,
            commands: commands_rx,
            dispatcher: FrameDispatcher::new(Arc::clone(&self.publisher), Arc::clone(&self.diagnostics)),
            publisher: Arc::clone(&self.publisher),
            diagnostics: Arc::clone(&self.diagnostics),
            lifecycle: Arc::clone(&self.lifecycle),
            close_timeout: self.config.close_timeout(),
        };
        let task = tokio::spawn(session.run());

        *slot = Some(Connection { commands, task });
        Ok(())
    }

    /// Closes the connection (code 1000) and resets the published state.
    ///
    /// Safe to call at any time and more than once. The receive loop is
    /// stopped before the reset, so the reset never interleaves with a frame
    /// being applied.
    pub async fn disconnect(&self) {
        let mut slot = self.connection.lock().await;

        if let Some(conn) = slot.take() {
            self.lifecycle.send_replace(LifecycleState::Closing);
            let _ = conn.commands.send(ConnectionCommand::Close);
            self.retire(conn).await;
        }

        self.publisher.reset();
        self.lifecycle.send_replace(LifecycleState::Disconnected);
        log::info!("Disconnected from live timing feed.");
    }

    /// Waits for a connection task to end, aborting it after the close timeout.
    async fn retire(&self, mut conn: Connection) {
        if timeout(self.config.close_timeout(), &mut conn.task).await.is_err() {
            log::warn!(
                "Connection task did not finish within {:?}; aborting it.",
                self.config.close_timeout()
            );
            conn.task.abort();
            let _ = (&mut conn.task).await;
        }
    }

    async fn open_socket(&self) -> Result<WsStream, FeedError> {
        let request = self.config.client_request()?;
        let url = request.uri().to_string();
        let after = self.config.connect_timeout();

        log::info!("Connecting to live timing feed: {}", url);

        let mut ws = match timeout(after, connect_async(request)).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(source)) => return Err(FeedError::Connect { url, source }),
            Err(_) => return Err(FeedError::ConnectTimeout { url, after }),
        };

        ws.send(Message::Text(envelope::encode_handshake().into()))
            .await
            .map_err(FeedError::Handshake)?;

        log::info!("Connected to live timing feed; handshake sent.");
        Ok(ws)
    }
}

enum Flow {
    Continue,
    Stop,
}

/// The receive loop. Sole owner of the socket once the handshake is out.
struct ConnectionTask {
    ws: WsStream,
    commands: mpsc::UnboundedReceiver<ConnectionCommand>,
    dispatcher: FrameDispatcher,
    publisher: Arc<StatePublisher>,
    diagnostics: Arc<dyn DiagnosticSink>,
    lifecycle: Arc<watch::Sender<LifecycleState>>,
    close_timeout: Duration,
}

impl ConnectionTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                // A dropped sender means the client itself is gone.
                command = self.commands.recv() => {
                    match command {
                        Some(ConnectionCommand::Close) | None => {
                            self.close().await;
                            break;
                        }
                    }
                }

                frame = self.ws.next() => {
                    if let Flow::Stop = self.on_frame(frame).await {
                        break;
                    }
                }
            }
        }

        self.lifecycle.send_replace(LifecycleState::Disconnected);
    }

    async fn on_frame(&mut self, frame: Option<Result<Message, WsError>>) -> Flow {
        match frame {
            Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()).await,
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => self.handle_text(text).await,
                Err(e) => {
                    self.diagnostics.record_error("decode", &e);
                    Flow::Continue
                }
            },
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                    .unwrap_or_else(|| "no close frame".to_string());
                log::info!("Live timing feed closed by server ({}).", reason);
                self.publisher.mark_closed();
                // Polling on flushes the queued close reply.
                self.drain().await;
                Flow::Stop
            }
            // Transport-level ping/pong is answered by tungstenite itself.
            Some(Ok(_)) => Flow::Continue,
            Some(Err(e)) => {
                log::error!("Live timing read error: {}", e);
                self.diagnostics.record_error("transport", &e);
                self.publisher.mark_failed(e.to_string());
                Flow::Stop
            }
            None => {
                let message = "Connection closed by remote host";
                log::warn!("{}.", message);
                self.diagnostics.record_warning("transport", message);
                self.publisher.mark_failed(message);
                Flow::Stop
            }
        }
    }

    async fn handle_text(&mut self, text: &str) -> Flow {
        for reply in self.dispatcher.handle_frame(text) {
            if let Err(e) = self.ws.send(Message::Text(reply.encode().into())).await {
                log::error!("Failed to send {:?}: {}", reply, e);
                self.diagnostics.record_error("transport", &e);
                self.publisher.mark_failed(e.to_string());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn close(&mut self) {
        self.lifecycle.send_replace(LifecycleState::Closing);

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "Client disconnect".into(),
        };
        if let Err(e) = self.ws.close(Some(frame)).await {
            log::debug!("Close frame not sent: {}", e);
            return;
        }

        // Wait for the server's close reply; frames arriving meanwhile are dropped.
        self.drain().await;
    }

    /// Reads until the stream ends or the close timeout passes.
    async fn drain(&mut self) {
        let ws = &mut self.ws;
        let drained = timeout(self.close_timeout, async {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;
        if drained.is_err() {
            log::debug!("Peer kept the socket open after the close handshake.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    const HANDSHAKE: &str = "{\"protocol\":\"json\",\"version\":1}\u{1e}";

    async fn wait_until(mut check: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn client_for(port: u16) -> (LiveTimingClient, Arc<DiagnosticLog>) {
        let diagnostics = Arc::new(DiagnosticLog::default());
        let config = FeedConfig {
            endpoint: format!("ws://127.0.0.1:{}/timing", port),
            close_timeout_ms: 1_000,
            ..Default::default()
        };
        (LiveTimingClient::new(config, diagnostics.clone()), diagnostics)
    }

    async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Option<String> {
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Text(t) => return Some(t.as_str().to_string()),
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    }

    #[tokio::test]
    async fn full_session_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (to_server, mut server_rx) = mpsc::unbounded_channel::<String>();
        let (from_server, mut client_frames) = mpsc::unbounded_channel::<Option<String>>();

        let counter = accepted.clone();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            let mut ws = accept_async(stream).await.unwrap();
            from_server.send(next_text(&mut ws).await).unwrap();

            while let Some(frame) = server_rx.recv().await {
                ws.send(Message::Text(frame.into())).await.unwrap();
                if let Some(reply) = next_text_if_ping(&mut ws).await {
                    from_server.send(Some(reply)).unwrap();
                }
            }
            from_server.send(next_text(&mut ws).await).unwrap();
        });

        let (client, diagnostics) = client_for(port);
        client.connect().await.unwrap();
        client.connect().await.unwrap();

        assert_eq!(client_frames.recv().await.unwrap().as_deref(), Some(HANDSHAKE));
        assert!(client.state().is_connected);
        assert_eq!(client.lifecycle(), LifecycleState::Open);

        to_server.send("{}\u{1e}".to_string()).unwrap();
        let data = json!({
            "type": 1,
            "target": "timing",
            "arguments": [{
                "selectedSessionId": 1,
                "raceName": "Monza",
                "drivers": [{"position": "1", "firstName": "Max", "lastName": "Verstappen"}]
            }]
        });
        to_server.send(format!("{}\u{1e}", data)).unwrap();

        let publisher = client.publisher();
        wait_until(|| publisher.session_name() == "Monza").await;
        assert_eq!(publisher.entries()[0].last_name.as_deref(), Some("Verstappen"));

        to_server.send("{\"type\":6}\u{1e}".to_string()).unwrap();
        assert_eq!(client_frames.recv().await.unwrap().as_deref(), Some("{\"type\":6}\u{1e}"));
        assert_eq!(publisher.session_name(), "Monza");

        to_server.send("not json".to_string()).unwrap();
        wait_until(|| diagnostics.error_count() == 1).await;
        assert_eq!(publisher.entries().len(), 1);

        drop(to_server);
        client.disconnect().await;
        server.await.unwrap();

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        let state = client.state();
        assert!(!state.is_connected);
        assert_eq!(state.latest_snapshot, None);
        assert_eq!(state.session_name(), "");
        assert_eq!(client.lifecycle(), LifecycleState::Disconnected);
    }

    // Replies only arrive for pings; everything else gets no answer.
    async fn next_text_if_ping(ws: &mut WebSocketStream<TcpStream>) -> Option<String> {
        match timeout(Duration::from_millis(200), next_text(ws)).await {
            Ok(text) => text,
            Err(_) => None,
        }
    }

    #[tokio::test]
    async fn connect_failure_is_published_not_panicked() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (client, diagnostics) = client_for(port);
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, FeedError::Connect { .. }));

        let state = client.state();
        assert!(!state.is_connected);
        assert!(state.connection_error.is_some());
        assert_eq!(diagnostics.error_count(), 1);
        assert_eq!(client.lifecycle(), LifecycleState::Disconnected);
    }

    #[tokio::test]
    async fn abrupt_close_records_error_and_keeps_snapshot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = next_text(&mut ws).await;
            let data = json!({"type": 1, "arguments": [{"raceName": "Spa", "drivers": []}]});
            ws.send(Message::Text(format!("{}\u{1e}", data).into())).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            // Dropping the socket without a close frame.
            drop(ws);
        });

        let (client, _) = client_for(port);
        client.connect().await.unwrap();

        let publisher = client.publisher();
        wait_until(|| !publisher.is_connected()).await;
        assert!(publisher.connection_error().is_some());
        assert_eq!(publisher.session_name(), "Spa");

        wait_until(|| client.lifecycle() == LifecycleState::Disconnected).await;
    }

    #[tokio::test]
    async fn disconnect_without_connection_is_a_reset() {
        let (client, _) = client_for(1);
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state(), PublishedState::default());
    }

    #[tokio::test]
    async fn default_log_honours_configured_capacity() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = FeedConfig {
            endpoint: format!("ws://127.0.0.1:{}/timing", port),
            diagnostics_capacity: 2,
            ..Default::default()
        };
        let (client, log) = LiveTimingClient::with_diagnostic_log(config);
        for _ in 0..3 {
            assert!(client.connect().await.is_err());
        }

        assert_eq!(log.error_count(), 3);
        assert_eq!(log.history().len(), 2);
    }

    #[tokio::test]
    async fn server_close_is_answered_before_the_socket_is_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (echo_tx, mut echo_rx) = mpsc::unbounded_channel::<Option<u16>>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = next_text(&mut ws).await;
            let frame = CloseFrame {
                code: CloseCode::Away,
                reason: "session over".into(),
            };
            ws.close(Some(frame)).await.unwrap();

            let mut echoed = None;
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Close(frame) = msg {
                    echoed = frame.map(|f| u16::from(f.code));
                }
            }
            echo_tx.send(echoed).unwrap();
        });

        let (client, _) = client_for(port);
        client.connect().await.unwrap();

        let echoed = timeout(Duration::from_secs(5), echo_rx.recv()).await.unwrap().unwrap();
        assert_eq!(echoed, Some(1001));
        assert!(!client.state().is_connected);
        assert_eq!(client.state().connection_error, None);
    }
}
