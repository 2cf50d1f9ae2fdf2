pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("sqlite migrate error: {0}")]
    SqliteMigrate(#[from] sqlx::migrate::MigrateError),

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("range not satisfiable")]
    RangeNotSatisfiable,

    #[error("upstream error: status={status} body={body}")]
    Upstream { status: u16, body: String },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code this error kind is returned as (spec.md §7).
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation { .. } | Error::InvalidConfig { .. } => 400,
            Error::Unauthorized => 401,
            Error::NotFound { .. } => 404,
            Error::Conflict { .. } => 409,
            Error::RangeNotSatisfiable => 416,
            Error::Upstream { .. } => 502,
            Error::Cancelled => 499,
            Error::Io(_) | Error::Sqlite(_) | Error::SqliteMigrate(_) | Error::Internal { .. } => {
                500
            }
        }
    }

    /// Stable short message safe to return to clients; detailed diagnostics go to logs.
    pub fn public_message(&self) -> String {
        match self {
            Error::Validation { message } => message.clone(),
            Error::InvalidConfig { message } => message.clone(),
            Error::Unauthorized => "unauthorized".to_string(),
            Error::NotFound { message } => message.clone(),
            Error::Conflict { message } => message.clone(),
            Error::RangeNotSatisfiable => "range not satisfiable".to_string(),
            Error::Upstream { .. } => "upstream store rejected the request".to_string(),
            Error::Cancelled => "request cancelled".to_string(),
            Error::Io(_) | Error::Sqlite(_) | Error::SqliteMigrate(_) | Error::Internal { .. } => {
                "internal error".to_string()
            }
        }
    }
}
