use std::{fmt, io, path::PathBuf};

/// Failure reported by a backing store transport before classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    /// The store answered with a non-success HTTP status.
    Status(u16),
    /// The per-call deadline expired.
    Timeout,
    /// The request never reached the store (DNS, connect, TLS).
    Connection,
    /// No usable access token could be obtained.
    Auth,
    Other,
}

#[derive(Clone, Debug)]
pub struct TransportError {
    pub failure: Failure,
    pub message: String,
}

impl TransportError {
    pub fn new(failure: Failure, message: impl Into<String>) -> Self {
        Self {
            failure,
            message: message.into(),
        }
    }

    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::new(Failure::Status(code), message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(Failure::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(Failure::Connection, message)
    }

    /// Whether repeating a call that has no side effects can help.
    pub fn is_transient(&self) -> bool {
        match self.failure {
            Failure::Timeout | Failure::Connection => true,
            Failure::Status(code) => code == 408 || code == 429 || code >= 500,
            Failure::Auth | Failure::Other => false,
        }
    }

    /// Whether the store certainly did not apply the request, so a send with
    /// side effects can be repeated without duplicating them.
    pub fn is_unapplied(&self) -> bool {
        match self.failure {
            Failure::Connection => true,
            Failure::Status(code) => code == 429 || code == 503,
            Failure::Timeout | Failure::Auth | Failure::Other => false,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TransportError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    Unauthenticated,
    AlreadyExists,
    TransientIO,
    PartialFailure,
    InvalidArgument,
    Local,
    Backend,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("transient i/o failure: {0}")]
    TransientIO(String),

    /// A multi-step operation completed `completed` and then failed.
    #[error("partially completed ({completed}): {source}")]
    PartialFailure {
        completed: String,
        #[source]
        source: Box<StorageError>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("local file {}: {source}", path.display())]
    Local {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unexpected response from store: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            StorageError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            StorageError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StorageError::TransientIO(_) => ErrorKind::TransientIO,
            StorageError::PartialFailure { .. } => ErrorKind::PartialFailure,
            StorageError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            StorageError::Local { .. } => ErrorKind::Local,
            StorageError::Backend(_) => ErrorKind::Backend,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn local(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::Local {
            path: path.into(),
            source,
        }
    }
}

impl From<TransportError> for StorageError {
    fn from(err: TransportError) -> Self {
        let message = err.message;
        match err.failure {
            Failure::Status(404) => StorageError::NotFound(message),
            Failure::Status(401) | Failure::Auth => StorageError::Unauthenticated(message),
            Failure::Status(403) => StorageError::PermissionDenied(message),
            Failure::Status(409) | Failure::Status(412) => StorageError::AlreadyExists(message),
            Failure::Status(408) | Failure::Status(429) | Failure::Timeout | Failure::Connection => {
                StorageError::TransientIO(message)
            }
            Failure::Status(code) if code >= 500 => StorageError::TransientIO(message),
            Failure::Status(code) => StorageError::Backend(format!("status {}: {}", code, message)),
            Failure::Other => StorageError::Backend(message),
        }
    }
}
