use thiserror::Error;

/// The closed error-kind taxonomy. Every surface-facing error in the core
/// tags itself with one of these so operators can correlate across logs,
/// events and storage without parsing message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    StateConflict,
    Capacity,
    Timeout,
    External,
    Cryptographic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::StateConflict => "state_conflict",
            Self::Capacity => "capacity",
            Self::Timeout => "timeout",
            Self::External => "external",
            Self::Cryptographic => "cryptographic",
        };
        write!(f, "{s}")
    }
}

/// A core-wide error carrying its kind and the identifier of the entity
/// that failed (address, tx_id, circuit_id+version, ...).
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message} (subject: {subject})")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    pub subject: String,
}

impl CoreError {
    #[must_use]
    pub fn new(kind: ErrorKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn validation(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, subject, message)
    }

    #[must_use]
    pub fn not_found(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, subject, message)
    }

    #[must_use]
    pub fn state_conflict(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StateConflict, subject, message)
    }

    #[must_use]
    pub fn capacity(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Capacity, subject, message)
    }

    #[must_use]
    pub fn timeout(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, subject, message)
    }

    #[must_use]
    pub fn external(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::External, subject, message)
    }

    #[must_use]
    pub fn cryptographic(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cryptographic, subject, message)
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
