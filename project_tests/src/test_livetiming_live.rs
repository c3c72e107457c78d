//! # Live Timing Feed Test
//!
//! Connects to a live timing endpoint via lib_livetiming and prints every
//! snapshot received for a fixed amount of time.

use clap::Parser;
use lib_livetiming::ingestors::LiveTimingClient;
use lib_livetiming::FeedConfig;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(about = "Prints live timing snapshots from a feed endpoint")]
struct Args {
    /// WebSocket endpoint; defaults to the public feed.
    #[clap(long)]
    url: Option<String>,

    /// Group to join.
    #[clap(long, default_value = "live")]
    group: String,

    /// How long to listen before disconnecting.
    #[clap(long, default_value_t = 30)]
    seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = FeedConfig {
        group: args.group,
        ..Default::default()
    };
    if let Some(url) = args.url {
        config.endpoint = url;
    }

    let (client, diagnostics) = LiveTimingClient::with_diagnostic_log(config);
    let publisher = client.publisher();
    let mut snapshots = publisher.subscribe_snapshot();

    println!("[*] Connecting to {}...", client.config().endpoint_url()?);
    if let Err(e) = client.connect().await {
        eprintln!("\n[ERROR] Connection failed:");
        eprintln!(">>> {}", e);
        std::process::exit(1);
    }

    let deadline = tokio::time::sleep(Duration::from_secs(args.seconds));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = snapshots.borrow_and_update().clone();
                if let Some(snapshot) = latest {
                    println!("-----------------------------------------------");
                    println!("{}", serde_json::to_string_pretty(&*snapshot)?);
                }
            }
        }
    }

    let state = client.state();
    println!("-----------------------------------------------");
    println!(
        "[INFO] connected={} error={:?} decode errors={}",
        state.is_connected,
        state.connection_error,
        diagnostics.error_count()
    );

    client.disconnect().await;
    Ok(())
}
