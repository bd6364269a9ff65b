//! Configuration for the notebus client

use std::time::Duration;

/// Configuration for talking to a Misskey-style instance
#[derive(Debug, Clone)]
pub struct NotebusConfig {
    /// Instance hostname, optionally with a port (e.g. "misskey.example" or
    /// "127.0.0.1:3000")
    pub host: String,

    /// Whether to use https/wss (plain http/ws is only useful for local
    /// development instances)
    pub use_tls: bool,

    /// Pre-provisioned API token. Tokens obtained through the authorization
    /// flow take precedence over this.
    pub token: Option<String>,

    /// Interval between authorization check polls
    pub poll_interval: Duration,

    /// Overall budget for authorization polling; `None` polls forever
    pub wait_timeout: Option<Duration>,
}

impl NotebusConfig {
    /// Create a new configuration for the given instance host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            use_tls: true,
            token: None,
            poll_interval: Duration::from_secs(3),
            wait_timeout: None,
        }
    }

    /// Use plain http/ws instead of https/wss
    pub fn insecure(mut self) -> Self {
        self.use_tls = false;
        self
    }

    /// Use a pre-provisioned API token
    ///
    /// The library cannot know which scopes such a token carries, so
    /// permission checks treat it as fully scoped.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the interval between authorization check polls
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the overall budget for authorization polling
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Scheme for HTTP API requests
    pub(crate) fn http_scheme(&self) -> &'static str {
        if self.use_tls {
            "https"
        } else {
            "http"
        }
    }

    /// Scheme for the streaming WebSocket
    pub(crate) fn ws_scheme(&self) -> &'static str {
        if self.use_tls {
            "wss"
        } else {
            "ws"
        }
    }
}
