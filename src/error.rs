use std::fmt;

use thiserror::Error;

/// Which half of the two-step receipt link failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHalf {
    Receipt,
    Transaction,
}

impl fmt::Display for LinkHalf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Receipt => write!(f, "receipt"),
            Self::Transaction => write!(f, "transaction"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ReckonError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("Unknown receipt: {0}")]
    UnknownReceipt(String),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Failed to update {half} while linking: {message}")]
    Link { half: LinkHalf, message: String },

    #[error("Transaction {transaction_id} is already linked to receipt {receipt_id}")]
    AlreadyClaimed {
        transaction_id: String,
        receipt_id: String,
    },

    #[error("Invalid date: {0} (expected YYYY-MM-DD)")]
    InvalidDate(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ReckonError>;
