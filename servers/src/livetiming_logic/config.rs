use clap::Parser;
use lib_livetiming::configs::config_feed::{FeedConfig, DEFAULT_ENDPOINT, DEFAULT_USER_AGENT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "server_livetiming.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Live timing feed client", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "LIVETIMING_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "LIVETIMING_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "LIVETIMING_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "LIVETIMING_URL", help = "Live timing WebSocket endpoint (ws:// or wss://).")]
    pub endpoint: Option<String>,

    #[clap(long, env = "LIVETIMING_GROUP", help = "Group to join on the feed.")]
    pub group: Option<String>,

    #[clap(long, env = "LIVETIMING_USER_AGENT", help = "User-Agent sent with the upgrade request.")]
    pub user_agent: Option<String>,

    #[clap(long, env = "LIVETIMING_CONNECT_TIMEOUT_MS", help = "Timeout in milliseconds for opening the connection.")]
    pub connect_timeout_ms: Option<u64>,

    #[clap(long, env = "LIVETIMING_CLOSE_TIMEOUT_MS", help = "Timeout in milliseconds for the close handshake.")]
    pub close_timeout_ms: Option<u64>,

    #[clap(
        long,
        env = "LIVETIMING_AUTO_RECONNECT",
        num_args = 0..=1,
        default_missing_value = "true",
        help = "Reconnect with exponential backoff when the connection drops."
    )]
    pub auto_reconnect: Option<bool>,

    #[clap(long, env = "LIVETIMING_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "LIVETIMING_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "LIVETIMING_STATUS_INTERVAL_SECONDS", help = "Interval in seconds between status reports.")]
    pub status_interval_seconds: Option<u64>,

    #[clap(long, env = "LIVETIMING_REFERENCE_PATH", help = "Optional JSON file with driver and team reference data.")]
    pub reference_path: Option<PathBuf>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            endpoint: other.endpoint.or(self.endpoint),
            group: other.group.or(self.group),
            user_agent: other.user_agent.or(self.user_agent),
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
            close_timeout_ms: other.close_timeout_ms.or(self.close_timeout_ms),
            auto_reconnect: other.auto_reconnect.or(self.auto_reconnect),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            status_interval_seconds: other.status_interval_seconds.or(self.status_interval_seconds),
            reference_path: other.reference_path.or(self.reference_path),
        }
    }

    fn defaults() -> Config {
        Config {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            endpoint: Some(DEFAULT_ENDPOINT.to_string()),
            group: Some("live".to_string()),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            connect_timeout_ms: Some(10_000),
            close_timeout_ms: Some(3_000),
            auto_reconnect: Some(false),
            reconnect_base_delay_ms: Some(1_000),
            reconnect_max_delay_ms: Some(60_000),
            status_interval_seconds: Some(30),
            ..Default::default()
        }
    }
}

/// Fully resolved settings for the host binary.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub log_dir: PathBuf,
    pub log_level: String,
    pub feed: FeedConfig,
    pub auto_reconnect: bool,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub status_interval: Duration,
    pub reference_path: Option<PathBuf>,
}

impl From<Config> for Settings {
    fn from(config: Config) -> Self {
        let defaults = Config::defaults();
        let config = defaults.merge(config);
        let feed_defaults = FeedConfig::default();

        let feed = FeedConfig {
            endpoint: config.endpoint.unwrap_or(feed_defaults.endpoint),
            group: config.group.unwrap_or(feed_defaults.group),
            user_agent: config.user_agent.unwrap_or(feed_defaults.user_agent),
            connect_timeout_ms: config.connect_timeout_ms.unwrap_or(feed_defaults.connect_timeout_ms),
            close_timeout_ms: config.close_timeout_ms.unwrap_or(feed_defaults.close_timeout_ms),
            ..feed_defaults
        };

        let base = config.reconnect_base_delay_ms.unwrap_or(1_000).max(1);
        let max = config.reconnect_max_delay_ms.unwrap_or(60_000).max(base);

        Settings {
            log_dir: config.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: config.log_level.unwrap_or_else(|| "info".to_string()),
            feed,
            auto_reconnect: config.auto_reconnect.unwrap_or(false),
            reconnect_base_delay: Duration::from_millis(base),
            reconnect_max_delay: Duration::from_millis(max),
            status_interval: Duration::from_secs(config.status_interval_seconds.unwrap_or(30).max(1)),
            reference_path: config.reference_path,
        }
    }
}

/// Reads the JSON config file, if there is one. Failures are logged and
/// treated as an empty file.
fn read_config_file(path: &Path) -> Config {
    if !path.exists() {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            path.display()
        );
        return Config::default();
    }

    match fs::read_to_string(path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => file_config,
            Err(e) => {
                log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
                Config::default()
            }
        },
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            Config::default()
        }
    }
}

/// Layers CLI/env values over the config file over built-in defaults.
pub fn resolve(cli: Config) -> Settings {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let file_config = read_config_file(&config_file_path);
    Settings::from(file_config.merge(cli))
}

pub fn load_config() -> Settings {
    // clap::Parser handles both env vars and CLI args.
    resolve(Config::parse())
}
