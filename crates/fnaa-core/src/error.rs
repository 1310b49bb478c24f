use thiserror::Error;

/// Errors produced by the FNAA protocol layer.
#[derive(Debug, Error)]
pub enum FnaaError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("authentication method not available: {0}")]
    UnsupportedMechanism(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("relay transport failed: {0}")]
    TransportFailed(String),

    #[error("peer rejected request: {0}")]
    Rejected(String),

    #[error("provisioning failed: {0}")]
    Provisioning(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("line too long")]
    LineTooLong,

    #[error("timeout")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl FnaaError {
    /// Whether this error should be answered with a `404` line on the
    /// connection that issued the command.
    ///
    /// Errors that are not reply-worthy concern the inbound stream itself
    /// (I/O failure, deadline, peer hang-up) and end that connection.
    pub fn is_reply_worthy(&self) -> bool {
        !matches!(
            self,
            FnaaError::Io(_) | FnaaError::Timeout | FnaaError::ConnectionClosed
        )
    }

    /// The human-readable text placed after `404 ` in a failure reply.
    pub fn reply_message(&self) -> String {
        match self {
            FnaaError::AuthFailed(_) => "Authentication failed".to_string(),
            FnaaError::LineTooLong => "Line too long".to_string(),
            FnaaError::UnsupportedMechanism(_) => {
                "Authentication method not available".to_string()
            }
            FnaaError::PermissionDenied(reason)
            | FnaaError::Protocol(reason)
            | FnaaError::Other(reason) => reason.clone(),
            other => capitalize(&other.to_string()),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub type FnaaResult<T> = Result<T, FnaaError>;
