//! Keeps the feed connected. Without `auto_reconnect` it connects once and
//! waits for shutdown; with it, every drop is followed by a reconnect after an
//! exponentially growing delay.

use crate::livetiming_logic::config::Settings;
use lib_livetiming::ingestors::{LifecycleState, LiveTimingClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Reconnect delay: starts at `base`, doubles per failed attempt, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Delay to wait now; the following call returns twice as much.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

pub async fn run(settings: Settings, client: Arc<LiveTimingClient>, mut shutdown: broadcast::Receiver<()>) {
    let mut lifecycle = client.subscribe_lifecycle();
    let mut backoff = Backoff::new(settings.reconnect_base_delay, settings.reconnect_max_delay);

    loop {
        match client.connect().await {
            Ok(()) => backoff.reset(),
            Err(e) => log::error!("Connecting to live timing feed failed: {}", e),
        }

        if !settings.auto_reconnect {
            let _ = shutdown.recv().await;
            log::info!("Supervisor received shutdown signal.");
            return;
        }

        // Wait for the connection to drop.
        loop {
            if *lifecycle.borrow_and_update() == LifecycleState::Disconnected {
                break;
            }
            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("Supervisor received shutdown signal.");
                    return;
                }
                changed = lifecycle.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        let delay = backoff.next_delay();
        log::warn!("Live timing connection lost. Reconnecting in {:?}.", delay);

        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Supervisor received shutdown signal.");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    use crate::livetiming_logic::config::Config;
    use lib_livetiming::core::DiagnosticLog;
    use project_tests::MockFeedServer;

    const WAIT: Duration = Duration::from_secs(5);

    fn settings_for(endpoint: String, auto_reconnect: bool, base_delay_ms: u64) -> Settings {
        Settings::from(Config {
            endpoint: Some(endpoint),
            auto_reconnect: Some(auto_reconnect),
            reconnect_base_delay_ms: Some(base_delay_ms),
            reconnect_max_delay_ms: Some(base_delay_ms * 4),
            close_timeout_ms: Some(500),
            ..Default::default()
        })
    }

    fn spawn_supervisor(
        settings: Settings,
    ) -> (Arc<LiveTimingClient>, broadcast::Sender<()>, tokio::task::JoinHandle<()>) {
        let client = Arc::new(LiveTimingClient::new(
            settings.feed.clone(),
            Arc::new(DiagnosticLog::default()),
        ));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run(settings, client.clone(), shutdown_rx));
        (client, shutdown_tx, handle)
    }

    #[tokio::test]
    async fn reconnects_after_the_connection_drops() {
        let server = MockFeedServer::start().await.unwrap();
        let (client, shutdown, handle) = spawn_supervisor(settings_for(server.url(), true, 20));

        assert!(server.wait_for(WAIT, |s| s.accepted() == 1).await);
        server.drop_connection();
        assert!(server.wait_for(WAIT, |s| s.accepted() == 2).await);

        server.drop_connection();
        assert!(server.wait_for(WAIT, |s| s.accepted() == 3).await);

        let _ = shutdown.send(());
        tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
        client.disconnect().await;
    }

    #[tokio::test]
    async fn stays_down_without_auto_reconnect() {
        let server = MockFeedServer::start().await.unwrap();
        let (client, shutdown, handle) = spawn_supervisor(settings_for(server.url(), false, 20));

        assert!(server.wait_for(WAIT, |s| s.accepted() == 1).await);
        server.drop_connection();

        let publisher = client.publisher();
        assert!(server.wait_for(WAIT, |_| !publisher.is_connected()).await);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(server.accepted(), 1);
        assert!(!handle.is_finished());

        let _ = shutdown.send(());
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_backoff_wait() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = format!("ws://127.0.0.1:{}/signalrcore", port);
        let (client, shutdown, handle) = spawn_supervisor(settings_for(endpoint, true, 60_000));

        let publisher = client.publisher();
        let deadline = tokio::time::Instant::now() + WAIT;
        while publisher.connection_error().is_none() {
            assert!(tokio::time::Instant::now() < deadline, "first connect attempt never failed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let _ = shutdown.send(());
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(client.lifecycle(), LifecycleState::Disconnected);
    }
}
