use thiserror::Error;

/// Main error type for all cosem_rs operations
#[derive(Error, Debug)]
pub enum DlmsError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Connection is not opened")]
    NotOpened,

    #[error("Nothing to read")]
    NothingToRead,

    #[error("Communication timeout")]
    CommunicationTimeout,

    #[error("Maximum received bytes exceeded")]
    QuotaExceeded,

    #[error("Invalid authentication response")]
    InvalidAuthenticationResponse,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Frame invalid: {0}")]
    FrameInvalid(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),
}

/// Result type alias for cosem_rs operations
pub type DlmsResult<T> = Result<T, DlmsError>;
