//! Client configuration.

use std::time::Duration;

use geoparty_core::stomp::HeartBeat;
use thiserror::Error;
use url::{Host, ParseError, Url};

use crate::push_channel::ChannelConfig;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";
pub const DEFAULT_WS_PATH: &str = "/ws";
pub const DEFAULT_RESULTS_COUNTDOWN: Duration = Duration::from_secs(10);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported URL scheme in `{0}` (expected http, https, ws or wss)")]
    Scheme(String),
    #[error("server URL `{0}` has no host")]
    MissingHost(String),
    #[error("invalid server URL `{url}`: {source}")]
    Invalid {
        url: String,
        #[source]
        source: ParseError,
    },
}

/// Where the server lives and how the client talks to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the backend, e.g. `https://play.example.com`.
    pub server_url: String,
    /// Path of the STOMP-over-WebSocket endpoint.
    pub ws_path: String,
    pub heart_beat: HeartBeat,
    pub reconnect_delay: Option<Duration>,
    /// How long the round results stay up before the next round.
    pub results_countdown: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            heart_beat: HeartBeat::new(10_000, 10_000),
            reconnect_delay: Some(Duration::from_secs(5)),
            results_countdown: DEFAULT_RESULTS_COUNTDOWN,
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    pub fn with_ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    pub fn with_heart_beat(mut self, heart_beat: HeartBeat) -> Self {
        self.heart_beat = heart_beat;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Option<Duration>) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_results_countdown(mut self, countdown: Duration) -> Self {
        self.results_countdown = countdown;
        self
    }

    fn parse(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.server_url).map_err(|e| match e {
            ParseError::EmptyHost => ConfigError::MissingHost(self.server_url.clone()),
            ParseError::RelativeUrlWithoutBase => ConfigError::Scheme(self.server_url.clone()),
            source => ConfigError::Invalid {
                url: self.server_url.clone(),
                source,
            },
        })?;
        if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(ConfigError::Scheme(self.server_url.clone()));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(ConfigError::MissingHost(self.server_url.clone()));
        }
        Ok(url)
    }

    /// `scheme://authority/base-path` with the scheme picked by whether the
    /// server URL is secure.
    fn base(&self, plain: &str, secure: &str) -> Result<String, ConfigError> {
        let url = self.parse()?;
        let scheme = match url.scheme() {
            "https" | "wss" => secure,
            _ => plain,
        };
        let host = url.host_str().unwrap_or_default();
        let mut base = match url.port() {
            Some(port) => format!("{scheme}://{host}:{port}"),
            None => format!("{scheme}://{host}"),
        };
        base.push_str(url.path().trim_end_matches('/'));
        Ok(base)
    }

    /// Push endpoint. `http` maps to `ws` and `https` to `wss`.
    pub fn ws_url(&self) -> Result<String, ConfigError> {
        let base = self.base("ws", "wss")?;
        Ok(format!("{base}/{}", self.ws_path.trim_start_matches('/')))
    }

    /// Base URL for REST calls, always `http` or `https`.
    pub fn rest_base(&self) -> Result<String, ConfigError> {
        self.base("http", "https")
    }

    /// Host part of the server URL, used for the STOMP `host` header.
    /// IPv6 addresses come without brackets.
    pub fn host(&self) -> Result<String, ConfigError> {
        let url = self.parse()?;
        Ok(match url.host() {
            Some(Host::Ipv6(addr)) => addr.to_string(),
            Some(host) => host.to_string(),
            None => String::new(),
        })
    }

    pub fn channel_config(&self) -> Result<ChannelConfig, ConfigError> {
        Ok(ChannelConfig::new(self.host()?)
            .with_heart_beat(self.heart_beat)
            .with_reconnect_delay(self.reconnect_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_maps_to_ws() {
        let config = ClientConfig::new("http://localhost:8080/");
        assert_eq!(config.ws_url().unwrap(), "ws://localhost:8080/ws");
        assert_eq!(config.rest_base().unwrap(), "http://localhost:8080");
        assert_eq!(config.host().unwrap(), "localhost");
    }

    #[test]
    fn https_maps_to_wss() {
        let config = ClientConfig::new("https://play.example.com").with_ws_path("stomp");
        assert_eq!(config.ws_url().unwrap(), "wss://play.example.com/stomp");
        assert_eq!(config.rest_base().unwrap(), "https://play.example.com");
    }

    #[test]
    fn rejects_unknown_scheme_and_missing_host() {
        assert!(matches!(
            ClientConfig::new("ftp://x").ws_url(),
            Err(ConfigError::Scheme(_))
        ));
        assert!(matches!(
            ClientConfig::new("localhost:8080").ws_url(),
            Err(ConfigError::Scheme(_))
        ));
        assert!(matches!(
            ClientConfig::new("http://:8080").rest_base(),
            Err(ConfigError::MissingHost(_))
        ));
        assert!(matches!(
            ClientConfig::new("http://exa mple.com").ws_url(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn ipv6_hosts_keep_their_brackets_in_urls_only() {
        let config = ClientConfig::new("http://[::1]");
        assert_eq!(config.host().unwrap(), "::1");
        assert_eq!(config.ws_url().unwrap(), "ws://[::1]/ws");

        let config = ClientConfig::new("https://[::1]:8443/game");
        assert_eq!(config.host().unwrap(), "::1");
        assert_eq!(config.rest_base().unwrap(), "https://[::1]:8443/game");
        assert_eq!(config.ws_url().unwrap(), "wss://[::1]:8443/game/ws");
    }

    #[test]
    fn channel_config_carries_settings() {
        let config = ClientConfig::new("http://h:1").with_reconnect_delay(None);
        let channel = config.channel_config().unwrap();
        assert_eq!(channel.host, "h");
        assert_eq!(channel.reconnect_delay, None);
        assert_eq!(channel.heart_beat, HeartBeat::new(10_000, 10_000));
    }
}
