use thiserror::Error;

/// Coarse failure category. Each kind maps to one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Unauthorized,
    DuplicateTransaction,
    NotFound,
    EncodingFailure,
    RenderFailure,
    UpstreamUnavailable,
    StorageError,
}

impl ErrorKind {
    /// HTTP status code reported for this kind
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::InvalidInput | ErrorKind::DuplicateTransaction => 400,
            ErrorKind::Unauthorized => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::EncodingFailure
            | ErrorKind::RenderFailure
            | ErrorKind::UpstreamUnavailable
            | ErrorKind::StorageError => 500,
        }
    }

    /// Whether the message may be shown to the caller as-is
    pub fn is_client_error(self) -> bool {
        self.status_code() < 500
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Transaction already exists: {0}")]
    DuplicateTransaction(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Payload encoding failed: {0}")]
    Encoding(String),

    #[error("QR rendering failed: {0}")]
    Render(String),

    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error("Ledger storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::DuplicateTransaction(_) => ErrorKind::DuplicateTransaction,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Encoding(_) => ErrorKind::EncodingFailure,
            Error::Render(_) => ErrorKind::RenderFailure,
            Error::Upstream(_) => ErrorKind::UpstreamUnavailable,
            Error::Storage(_) | Error::Io(_) => ErrorKind::StorageError,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
