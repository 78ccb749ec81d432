use crate::executor::ResultMeta;
use crate::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaoErrorCode {
    TableNotFound,
    TypeNotFound,
    UnknownColumn,
    TypeMismatch,
    Constraint,
    TooManyResults,
    Transport,
    Validation,
    InvalidConfig,
    Interceptor,
    Decode,
}

impl DaoErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DaoErrorCode::TableNotFound => "table_not_found",
            DaoErrorCode::TypeNotFound => "type_not_found",
            DaoErrorCode::UnknownColumn => "unknown_column",
            DaoErrorCode::TypeMismatch => "type_mismatch",
            DaoErrorCode::Constraint => "constraint",
            DaoErrorCode::TooManyResults => "too_many_results",
            DaoErrorCode::Transport => "transport",
            DaoErrorCode::Validation => "validation",
            DaoErrorCode::InvalidConfig => "invalid_config",
            DaoErrorCode::Interceptor => "interceptor",
            DaoErrorCode::Decode => "decode",
        }
    }

    /// Coarse error family. Schema lookups collapse into one family so callers
    /// can react to "the store does not know this" without matching variants.
    pub fn kind(self) -> &'static str {
        match self {
            DaoErrorCode::TableNotFound
            | DaoErrorCode::TypeNotFound
            | DaoErrorCode::UnknownColumn => "schema",
            DaoErrorCode::TypeMismatch => "type_mismatch",
            DaoErrorCode::Constraint => "constraint",
            DaoErrorCode::TooManyResults => "too_many_results",
            DaoErrorCode::Transport => "transport",
            DaoErrorCode::Validation => "validation",
            DaoErrorCode::InvalidConfig => "config",
            DaoErrorCode::Interceptor => "interceptor",
            DaoErrorCode::Decode => "decode",
        }
    }
}

#[derive(Debug, Error)]
pub enum DaoError {
    #[error("table {table} is not defined")]
    TableNotFound { table: String },
    #[error("user defined type {keyspace}.{name} is not defined")]
    TypeNotFound { keyspace: String, name: String },
    #[error("table {table} does not support column '{column}'")]
    UnknownColumn { table: String, column: String },
    #[error(
        "type mismatch: column '{column}' in table '{table}' expected {expected}, got {actual}"
    )]
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
    #[error("{0}")]
    Constraint(String),
    #[error("{message}")]
    TooManyResults {
        message: String,
        result: Box<ResultMeta>,
    },
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("interceptor {interceptor} failed: {message}")]
    Interceptor { interceptor: String, message: String },
    #[error("decode error: {0}")]
    Decode(#[from] RecordDecodeError),
}

impl DaoError {
    pub fn code(&self) -> DaoErrorCode {
        match self {
            DaoError::TableNotFound { .. } => DaoErrorCode::TableNotFound,
            DaoError::TypeNotFound { .. } => DaoErrorCode::TypeNotFound,
            DaoError::UnknownColumn { .. } => DaoErrorCode::UnknownColumn,
            DaoError::TypeMismatch { .. } => DaoErrorCode::TypeMismatch,
            DaoError::Constraint(_) => DaoErrorCode::Constraint,
            DaoError::TooManyResults { .. } => DaoErrorCode::TooManyResults,
            DaoError::Transport(_) => DaoErrorCode::Transport,
            DaoError::Validation(_) => DaoErrorCode::Validation,
            DaoError::InvalidConfig { .. } => DaoErrorCode::InvalidConfig,
            DaoError::Interceptor { .. } => DaoErrorCode::Interceptor,
            DaoError::Decode(_) => DaoErrorCode::Decode,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    pub fn is_schema_error(&self) -> bool {
        self.code().kind() == "schema"
    }

    pub fn interceptor(interceptor: impl Into<String>, message: impl Into<String>) -> Self {
        DaoError::Interceptor {
            interceptor: interceptor.into(),
            message: message.into(),
        }
    }
}

/// Failure decoding a fetched record into a caller-side type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordDecodeError {
    #[error("missing column '{column}'")]
    MissingColumn { column: String },
    #[error("type mismatch at column '{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        actual: String,
    },
    #[error("{0}")]
    Custom(String),
}
