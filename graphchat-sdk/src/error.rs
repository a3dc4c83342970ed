//! Error types for the GraphChat SDK.

use std::time::Duration;

/// Boxed transport-level cause carried by [`SdkError::ConnectionFailure`].
pub type TransportCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for SDK operations.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    /// The websocket handshake (or anything before it) failed.
    #[error("failed to connect to {url}: {source}")]
    ConnectionFailure {
        url: String,
        #[source]
        source: TransportCause,
    },

    /// `connect` was called on a client that is already connected.
    #[error("client is already connected")]
    AlreadyConnected,

    /// A document operation was attempted without a live connection.
    #[error("not connected to the document server")]
    NotConnected,

    /// A snapshot did not have the expected JSON shape.
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),

    /// A text edit addressed a position outside the buffer or inside a
    /// multi-byte character.
    #[error("index {index} out of bounds for text of length {len}")]
    IndexOutOfBounds { index: u32, len: u32 },

    /// The CRDT engine rejected an operation.
    #[error("document error: {0}")]
    Document(String),

    /// An edit would leave a stored record that no longer decodes.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SdkError {
    pub(crate) fn connection_failure(
        url: impl Into<String>,
        source: impl Into<TransportCause>,
    ) -> Self {
        Self::ConnectionFailure {
            url: url.into(),
            source: source.into(),
        }
    }

    pub(crate) fn connect_timeout(url: impl Into<String>, after: Duration) -> Self {
        Self::connection_failure(
            url,
            format!("handshake did not complete within {}ms", after.as_millis()),
        )
    }
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failure_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = SdkError::connection_failure("ws://localhost:1/room", io);

        let msg = err.to_string();
        assert!(msg.contains("ws://localhost:1/room"));
        assert!(msg.contains("refused"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_connect_timeout_message() {
        let err = SdkError::connect_timeout("ws://x/r", Duration::from_millis(250));
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_json_error_converts() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: SdkError = parse.unwrap_err().into();
        assert!(matches!(err, SdkError::Json(_)));
    }
}
