use thiserror::Error;

/// Failures on the wire. Every variant is terminal for the connection it occurs on.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode message: {0}")]
    Json(#[source] serde_json::Error),
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("message exceeds {limit} bytes without completing")]
    MessageTooLarge { limit: usize },
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("unexpected message, expected {expected}")]
    UnexpectedMessage { expected: &'static str },
    #[error("invalid map ready token {0:?}")]
    InvalidReadyToken(Vec<u8>),
}

impl ProtocolError {
    /// True when the peer simply went away rather than misbehaving.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::ConnectionClosed => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
