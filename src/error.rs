use thiserror::Error;

/// Unified error type for the pool
#[derive(Error, Debug)]
pub enum PoolError {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    // Proxy errors
    #[error("Proxy not found: {id}")]
    ProxyNotFound { id: i32 },

    #[error("Proxy {host}:{port} already exists")]
    DuplicateProxy { host: String, port: u16 },

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

impl PoolError {
    /// Whether the caller caused this error (bad input, unknown id, duplicate)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PoolError::ProxyNotFound { .. }
                | PoolError::DuplicateProxy { .. }
                | PoolError::InvalidProxyAddress(_)
                | PoolError::UnsupportedProtocol(_)
                | PoolError::InvalidRequest(_)
        )
    }

    /// Whether this error came from the backing store or the configuration
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Map a unique-key violation on insert to `DuplicateProxy`
    pub(crate) fn from_insert(err: sqlx::Error, host: &str, port: u16) -> Self {
        if is_unique_violation(&err) {
            PoolError::DuplicateProxy {
                host: host.to_string(),
                port,
            }
        } else {
            PoolError::Database(err)
        }
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

// Convert from URL parse errors
impl From<url::ParseError> for PoolError {
    fn from(err: url::ParseError) -> Self {
        PoolError::InvalidProxyAddress(err.to_string())
    }
}
