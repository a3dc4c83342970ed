//! Client configuration.

use std::time::Duration;

/// Connection settings for a [`GraphChatClient`](crate::GraphChatClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base websocket URL of the document server
    pub websocket_url: String,
    /// Room (document) name appended to the URL path
    pub room_name: String,
    /// Upper bound on the websocket handshake (None = wait forever)
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            websocket_url: "ws://localhost:3000".to_string(),
            room_name: "room".to_string(),
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl ClientConfig {
    /// Create a config for `room_name` on the server at `websocket_url`.
    pub fn new(websocket_url: impl Into<String>, room_name: impl Into<String>) -> Self {
        Self {
            websocket_url: websocket_url.into(),
            room_name: room_name.into(),
            ..Self::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Full websocket endpoint for the room: `{url}/{room}`.
    ///
    /// `http://` and `https://` base URLs are mapped to `ws://` and `wss://`
    /// so the same server address can be shared with HTTP tooling.
    pub fn room_url(&self) -> String {
        let base = self.websocket_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else {
            base.to_string()
        };
        format!("{}/{}", base, self.room_name.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.websocket_url, "ws://localhost:3000");
        assert_eq!(config.room_name, "room");
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.room_url(), "ws://localhost:3000/room");
    }

    #[test]
    fn test_room_url_maps_http_schemes() {
        let plain = ClientConfig::new("http://localhost:3000", "lab");
        assert_eq!(plain.room_url(), "ws://localhost:3000/lab");

        let tls = ClientConfig::new("https://chat.example.org/", "lab");
        assert_eq!(tls.room_url(), "wss://chat.example.org/lab");
    }

    #[test]
    fn test_room_url_normalizes_slashes() {
        let config = ClientConfig::new("ws://127.0.0.1:9000/", "/molecules");
        assert_eq!(config.room_url(), "ws://127.0.0.1:9000/molecules");
    }

    #[test]
    fn test_with_connect_timeout() {
        let config = ClientConfig::default().with_connect_timeout(None);
        assert!(config.connect_timeout.is_none());
    }
}
