use omniverse_core::WireError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Socket is not registered")]
    NotConnected,

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(#[from] WireError),

    #[error("Failed to deliver to socket {0}")]
    DeliveryFailed(String),

    #[error("Failed to bind relay listener: {0}")]
    Bind(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
