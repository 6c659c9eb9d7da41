use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Scoring error: {0}")]
    Scoring(#[from] ScoringError),

    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Raw message parsing errors. A failed parse never yields a partial record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Malformed field :{tag}: {reason}")]
    MalformedField { tag: String, reason: String },
}

impl ParseError {
    pub fn malformed(tag: &str, reason: impl Into<String>) -> Self {
        ParseError::MalformedField {
            tag: tag.to_string(),
            reason: reason.into(),
        }
    }

    /// The tag of the field that failed to parse
    pub fn tag(&self) -> &str {
        match self {
            ParseError::MalformedField { tag, .. } => tag,
        }
    }
}

/// Record store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Instruction already exists: {0}")]
    DuplicateKey(String),

    #[error("Instruction not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Ledger collaborator errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger unreachable: {0}")]
    Unreachable(String),

    #[error("Ledger rejected request: {0}")]
    Rejected(String),

    #[error("Malformed ledger event: {0}")]
    MalformedEvent(String),

    #[error("Amount {amount} cannot be represented with {decimals} decimals")]
    AmountOutOfRange { amount: String, decimals: u32 },
}

/// Anomaly scoring errors. None of these affect settlement state.
#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Record {0} is not reconciled")]
    NotReconciled(String),

    #[error("Invalid model artifact: {0}")]
    InvalidArtifact(String),
}

/// Settlement submission errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("Instruction is missing required field: {0}")]
    IncompleteInstruction(&'static str),

    #[error("Transaction reference exceeds 32 bytes: {0}")]
    ReferenceTooLong(String),
}

/// Ledger event listener errors
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("Listener degraded after {consecutive_failures} consecutive failures")]
    Degraded { consecutive_failures: u32 },

    #[error("Timed out: {0}")]
    Timeout(&'static str),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Parse(e) => (
                StatusCode::BAD_REQUEST,
                "PARSE_ERROR",
                e.to_string(),
                Some(serde_json::json!({ "tag": e.tag() })),
            ),
            AppError::Submission(SubmissionError::IncompleteInstruction(field)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INCOMPLETE_INSTRUCTION",
                format!("Instruction is missing required field: {}", field),
                Some(serde_json::json!({ "field": field })),
            ),
            AppError::Submission(e @ SubmissionError::ReferenceTooLong(_)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "REFERENCE_TOO_LONG",
                e.to_string(),
                None,
            ),
            AppError::Store(StoreError::DuplicateKey(id)) => (
                StatusCode::CONFLICT,
                "DUPLICATE_INSTRUCTION",
                format!("Instruction already exists: {}", id),
                Some(serde_json::json!({ "instruction_id": id })),
            ),
            AppError::Store(StoreError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "INSTRUCTION_NOT_FOUND",
                format!("Instruction not found: {}", id),
                None,
            ),
            AppError::Store(StoreError::Database(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            AppError::Ledger(e) => (
                StatusCode::BAD_GATEWAY,
                "LEDGER_ERROR",
                e.to_string(),
                None,
            ),
            AppError::Scoring(ScoringError::ModelUnavailable(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "MODEL_UNAVAILABLE",
                "Anomaly model is not loaded".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        AppError::Store(StoreError::Database(error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::Ledger(LedgerError::Unreachable(format!("HTTP request error: {:?}", error)))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
