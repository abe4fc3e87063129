use omniverse_p2p::{P2PError, SessionError};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("P2P error: {0}")]
    P2P(#[from] P2PError),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to initialize tracing: {0}")]
    Logging(String),
}

impl CliError {
    pub fn invalid_command(message: impl Into<String>) -> Self {
        CliError::InvalidCommand(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
