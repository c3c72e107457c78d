use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, USER_AGENT};
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "wss://livetiming.formula1.com/signalrcore";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum FeedConfigError {
    #[error("Invalid endpoint URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Endpoint scheme must be ws or wss, got '{0}'")]
    UnsupportedScheme(String),

    #[error("Invalid User-Agent header value: {0}")]
    InvalidUserAgent(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),

    #[error("Failed to build upgrade request: {0}")]
    Request(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connection settings for the live timing feed.
///
/// Deserialises from camelCase JSON; every field has a default so a partial
/// document is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedConfig {
    /// `ws://` or `wss://` endpoint, without the group parameter.
    pub endpoint: String,
    /// Name of the query parameter selecting the logical group.
    pub group_param: String,
    /// Group (topic) to join. Empty means no parameter is added.
    pub group: String,
    pub user_agent: String,
    pub connect_timeout_ms: u64,
    /// How long `disconnect()` waits for the close handshake.
    pub close_timeout_ms: u64,
    /// Number of errors and warnings the diagnostic log keeps.
    pub diagnostics_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            group_param: "group".to_string(),
            group: "live".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout_ms: 10_000,
            close_timeout_ms: 3_000,
            diagnostics_capacity: 64,
        }
    }
}

impl FeedConfig {
    /// Config pointing at `endpoint` with every other field defaulted.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Endpoint with the group query parameter appended.
    pub fn endpoint_url(&self) -> Result<Url, FeedConfigError> {
        let mut url = Url::parse(&self.endpoint).map_err(|source| FeedConfigError::InvalidUrl {
            url: self.endpoint.clone(),
            source,
        })?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(FeedConfigError::UnsupportedScheme(other.to_string())),
        }

        if !self.group.is_empty() {
            url.query_pairs_mut().append_pair(&self.group_param, &self.group);
        }
        Ok(url)
    }

    /// WebSocket upgrade request carrying the configured User-Agent.
    pub fn client_request(&self) -> Result<Request, FeedConfigError> {
        let url = self.endpoint_url()?;
        let mut request = url.as_str().into_client_request()?;
        if !self.user_agent.is_empty() {
            request
                .headers_mut()
                .insert(USER_AGENT, HeaderValue::from_str(&self.user_agent)?);
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_group_parameter() {
        let config = FeedConfig::with_endpoint("wss://example.com/hub");
        assert_eq!(config.endpoint_url().unwrap().as_str(), "wss://example.com/hub?group=live");
    }

    #[test]
    fn keeps_existing_query_and_encodes_group() {
        let config = FeedConfig {
            endpoint: "ws://127.0.0.1:9000/hub?lang=en".into(),
            group: "race day".into(),
            ..Default::default()
        };
        assert_eq!(
            config.endpoint_url().unwrap().as_str(),
            "ws://127.0.0.1:9000/hub?lang=en&group=race+day"
        );
    }

    #[test]
    fn empty_group_adds_nothing() {
        let config = FeedConfig {
            endpoint: "ws://localhost/hub".into(),
            group: String::new(),
            ..Default::default()
        };
        assert_eq!(config.endpoint_url().unwrap().as_str(), "ws://localhost/hub");
    }

    #[test]
    fn rejects_bad_endpoints() {
        assert!(matches!(
            FeedConfig::with_endpoint("not a url").endpoint_url(),
            Err(FeedConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            FeedConfig::with_endpoint("https://example.com").endpoint_url(),
            Err(FeedConfigError::UnsupportedScheme(s)) if s == "https"
        ));
    }

    #[test]
    fn request_carries_user_agent() {
        let config = FeedConfig::with_endpoint("ws://localhost:1/hub");
        let request = config.client_request().unwrap();
        assert_eq!(request.headers()[USER_AGENT], DEFAULT_USER_AGENT);
        assert_eq!(request.uri().query(), Some("group=live"));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: FeedConfig =
            serde_json::from_str(r#"{"endpoint":"ws://10.0.0.1/feed","closeTimeoutMs":500}"#).unwrap();
        assert_eq!(config.endpoint, "ws://10.0.0.1/feed");
        assert_eq!(config.close_timeout(), Duration::from_millis(500));
        assert_eq!(config.group, "live");
    }
}
