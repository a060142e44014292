use axum::http::StatusCode;

#[derive(Debug, Clone)]
pub enum AppError {
    ValidationError(String),
    NotFound(String),
    DatabaseError(String),
    ConfigurationError(String),
    RateLimitError(String),
    ConcurrencyConflict(String),
    ServiceUnavailable(String),
    InternalError(String),
}

impl std::error::Error for AppError {}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::RateLimitError(msg) => write!(f, "Rate limit error: {}", msg),
            AppError::ConcurrencyConflict(msg) => write!(f, "Concurrency conflict: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::DatabaseError(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError(message.into())
    }
}

impl From<AppError> for StatusCode {
    fn from(error: AppError) -> Self {
        match error {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::RateLimitError(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}
