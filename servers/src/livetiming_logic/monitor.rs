use crate::livetiming_logic::config::Settings;
use lib_livetiming::core::DiagnosticLog;
use lib_livetiming::ingestors::LiveTimingClient;
use lib_livetiming::protocol::TimingSnapshot;
use lib_livetiming::reference::ReferenceData;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::interval;

/// One-line summary of a snapshot, enriched with reference data when the
/// leader's number is known.
pub fn describe_snapshot(snapshot: &TimingSnapshot, reference: Option<&dyn ReferenceData>) -> String {
    let session = if snapshot.session_name.is_empty() {
        "<unnamed session>"
    } else {
        snapshot.session_name.as_str()
    };

    let count = snapshot.entries.len();
    let mut line = format!("{}: {} {}", session, count, if count == 1 { "entry" } else { "entries" });

    if let (Some(current), Some(total)) = (&snapshot.current_lap, &snapshot.total_laps) {
        line.push_str(&format!(", lap {}/{}", current, total));
    }

    if let Some(leader) = snapshot.leader() {
        let known = leader
            .number
            .as_deref()
            .and_then(|n| reference.and_then(|r| r.resolve_driver_by_number(n)));

        let name = leader
            .display_name()
            .or_else(|| known.as_ref().map(|d| format!("{} {}", d.first_name, d.last_name)))
            .unwrap_or_else(|| "unknown".to_string());

        let team = leader.team.clone().or_else(|| known.and_then(|d| d.team));
        let color = team
            .as_deref()
            .and_then(|t| reference.and_then(|r| r.resolve_team_color(t)));

        line.push_str(&format!(", leader {}", name));
        match (team, color) {
            (Some(team), Some(color)) => line.push_str(&format!(" ({} {})", team, color)),
            (Some(team), None) => line.push_str(&format!(" ({})", team)),
            _ => {}
        }
    }

    line
}

pub async fn run(
    settings: Settings,
    client: Arc<LiveTimingClient>,
    diagnostics: Arc<DiagnosticLog>,
    reference: Option<Arc<dyn ReferenceData>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let publisher = client.publisher();
    let mut snapshots = publisher.subscribe_snapshot();
    let mut connected = publisher.subscribe_connected();
    let mut status_interval = interval(settings.status_interval);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Monitor service received shutdown signal.");
                break;
            }
            Ok(()) = snapshots.changed() => {
                let latest = snapshots.borrow_and_update().clone();
                if let Some(snapshot) = latest {
                    log::info!("Snapshot {}", describe_snapshot(&snapshot, reference.as_deref()));
                }
            }
            Ok(()) = connected.changed() => {
                let is_connected = *connected.borrow_and_update();
                if is_connected {
                    log::info!("Feed connected.");
                } else if let Some(error) = publisher.connection_error() {
                    log::warn!("Feed disconnected: {}", error);
                } else {
                    log::info!("Feed disconnected.");
                }
            }
            _ = status_interval.tick() => {
                log::info!(
                    "Status: {} | connected={} | session='{}' | entries={} | errors={} warnings={}",
                    client.lifecycle(),
                    publisher.is_connected(),
                    publisher.session_name(),
                    publisher.entries().len(),
                    diagnostics.error_count(),
                    diagnostics.warning_count()
                );
            }
        }
    }
}
