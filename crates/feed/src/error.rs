use std::path::PathBuf;

use thiserror::Error;

use crate::message::MessageKind;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("log writer error: {0}")]
    Writer(#[from] WriterError),
    #[error("client already started")]
    AlreadyStarted,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("save file prefix given without a save directory")]
    SaveDirectoryRequired,
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid product identifier: {0:?}")]
    InvalidProduct(String),
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("not connected")]
    NotConnected,
}

/// Inbound frame could not be turned into a raw record.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object, got {found}")]
    NotAnObject { found: &'static str },
}

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("unrecognized message: {raw}")]
    Unrecognized { raw: serde_json::Value },
    #[error("malformed {kind} message: missing field `{field}`")]
    MissingField { kind: MessageKind, field: &'static str },
    #[error("malformed {kind} message: invalid field `{field}`: {reason}")]
    InvalidField {
        kind: MessageKind,
        field: &'static str,
        reason: String,
    },
    #[error("malformed {kind} message: {reason}")]
    Inconsistent { kind: MessageKind, reason: String },
}

impl MessageError {
    /// True for field-level failures of a recognized kind.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, MessageError::Unrecognized { .. })
    }

    /// Kind the record was classified as, if it got that far.
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            MessageError::Unrecognized { .. } => None,
            MessageError::MissingField { kind, .. }
            | MessageError::InvalidField { kind, .. }
            | MessageError::Inconsistent { kind, .. } => Some(*kind),
        }
    }
}

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("save directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to rotate log to {}: {source}", path.display())]
    Rotation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("log writer is closed")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unparseable timestamp: {input:?}")]
pub struct TimestampError {
    pub input: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::ConnectionClosed;
        assert_eq!(format!("{}", err), "connection closed");

        let err = MessageError::MissingField {
            kind: MessageKind::Done,
            field: "reason",
        };
        assert_eq!(
            format!("{}", err),
            "malformed done message: missing field `reason`"
        );
    }

    #[test]
    fn test_malformed_vs_unrecognized() {
        let unrecognized = MessageError::Unrecognized {
            raw: serde_json::json!({"type": "l2update"}),
        };
        assert!(!unrecognized.is_malformed());
        assert_eq!(unrecognized.kind(), None);

        let malformed = MessageError::Inconsistent {
            kind: MessageKind::Change,
            reason: "both size and funds present".to_string(),
        };
        assert!(malformed.is_malformed());
        assert_eq!(malformed.kind(), Some(MessageKind::Change));
    }

    #[test]
    fn test_directory_not_found_names_path() {
        let err = WriterError::DirectoryNotFound(PathBuf::from("/no/such/dir"));
        assert!(err.to_string().contains("/no/such/dir"));
    }
}
