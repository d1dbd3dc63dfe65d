use std::fmt;

/// Why a connection attempt or an established session ended. Every variant
/// except `MaxAttemptsExceeded` is retryable; `is_protocol` picks which
/// backoff schedule applies.
#[derive(Debug)]
pub enum SessionError {
    /// Network/TLS failure before the gateway sent any bytes.
    ConnectFailure(String),
    /// Read or write error on an already-open transport.
    Transport(String),
    /// Malformed or unexpected control frame.
    Protocol(String),
    /// No hello within the handshake window.
    HandshakeTimeout,
    /// Write error while flushing a heartbeat frame.
    HeartbeatSend(String),
    /// Terminal: the session exhausted its reconnect budget.
    MaxAttemptsExceeded,
}

impl SessionError {
    /// Protocol-level failures retry on the fixed delay rather than the
    /// linear transport backoff.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            SessionError::Protocol(_) | SessionError::HandshakeTimeout
        )
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::ConnectFailure(e) => write!(f, "connection failed: {e}"),
            SessionError::Transport(e) => write!(f, "transport error: {e}"),
            SessionError::Protocol(e) => write!(f, "protocol violation: {e}"),
            SessionError::HandshakeTimeout => {
                write!(f, "no hello received within the handshake window")
            }
            SessionError::HeartbeatSend(e) => write!(f, "heartbeat send failed: {e}"),
            SessionError::MaxAttemptsExceeded => write!(f, "max reconnect attempts reached"),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    NoCredentials,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {e}"),
            ConfigError::Json(e) => write!(f, "invalid JSON in config: {e}"),
            ConfigError::NoCredentials => write!(f, "no credentials found in config"),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}
