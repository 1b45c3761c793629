//! Error types for the ledger client

use thiserror::Error;

use crate::schema::SchemaVersion;

/// Result type for ledger client operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Ledger client errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("No signing provider available")]
    WalletUnavailable,

    #[error("Request rejected by user")]
    UserRejected,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Submission failed: {reason}")]
    Submit { reason: String },

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("No active account")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LedgerError {
    /// Create a submission error with a custom reason
    pub fn submit<S: Into<String>>(reason: S) -> Self {
        LedgerError::Submit {
            reason: reason.into(),
        }
    }

    /// Create an invalid amount error with a custom message
    pub fn invalid_amount<S: Into<String>>(msg: S) -> Self {
        LedgerError::InvalidAmount(msg.into())
    }

    /// Whether the running session survives this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Transport(_) | Self::Config(_) | Self::Io(_) | Self::Json(_)
        )
    }

    /// Short notice suitable for showing to the end user
    pub fn user_message(&self) -> String {
        match self {
            Self::WalletUnavailable => "Please install a wallet to continue".to_string(),
            Self::UserRejected => "Request was declined in your wallet".to_string(),
            Self::InvalidAmount(msg) => format!("Please enter a valid amount ({})", msg),
            Self::Submit { reason } => format!("Purchase failed: {}", reason),
            Self::Decode(_) => "Some purchase records could not be read".to_string(),
            Self::NotConnected => "Connect your wallet first".to_string(),
            Self::Transport(_) => "Lost connection to the ledger".to_string(),
            other => other.to_string(),
        }
    }
}

/// A raw ledger tuple that does not match the expected positional schema
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("schema {version} expects {expected} fields, tuple has {found}")]
    Arity {
        version: SchemaVersion,
        expected: usize,
        found: usize,
    },

    #[error("field `{field}` at index {index} is not {expected}")]
    FieldType {
        field: &'static str,
        index: usize,
        expected: &'static str,
    },

    #[error("schema {version} has no `{field}` field")]
    MissingField {
        version: SchemaVersion,
        field: &'static str,
    },

    #[error("field `{field}` value out of range: {value}")]
    OutOfRange { field: &'static str, value: u128 },
}
