use thiserror::Error;

/// Wire-level error classification (§6, §7). Never let a variant's `Display`
/// leak backend internals — `Store`'s message is sanitized at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    DuplicateName,
    ValidationError,
    ExtractionError,
    StoreError,
    ConflictError,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::DuplicateName => "DuplicateName",
            Self::ValidationError => "ValidationError",
            Self::ExtractionError => "ExtractionError",
            Self::StoreError => "StoreError",
            Self::ConflictError => "ConflictError",
            Self::Cancelled => "Cancelled",
        }
    }
}

#[derive(Debug, Error)]
pub enum BimAtlasError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate name: {0}")]
    DuplicateName(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

impl BimAtlasError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::DuplicateName(_) => ErrorKind::DuplicateName,
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::Extraction(_) => ErrorKind::ExtractionError,
            Self::Store(_) => ErrorKind::StoreError,
            Self::Conflict(_) => ErrorKind::ConflictError,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Human-readable message for the `{kind, message}` boundary contract.
    /// Never includes a backtrace or internal path.
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn duplicate_name(what: impl Into<String>) -> Self {
        Self::DuplicateName(what.into())
    }

    pub fn validation(what: impl Into<String>) -> Self {
        Self::Validation(what.into())
    }
}

impl From<sqlx::Error> for BimAtlasError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            other => Self::Store(format!("relational backend failed: {other}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, BimAtlasError>;
