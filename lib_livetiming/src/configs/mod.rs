//! # Configuration Modules
//!
//! Settings for the live timing feed connection: endpoint, group selection,
//! request headers and timeouts.

/// Feed endpoint and connection settings, plus the upgrade request builder.
pub mod config_feed;

pub use config_feed::{FeedConfig, FeedConfigError};
