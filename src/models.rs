use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{ReckonError, Result};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| ReckonError::InvalidDate(raw.to_string()))
}

/// Review state of a transaction. Replaces the old bracketed tags that used
/// to be embedded in `notes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    #[default]
    Active,
    PendingBusinessReview,
    MovedFromPersonal,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PendingBusinessReview => "pending_business_review",
            Self::MovedFromPersonal => "moved_from_personal",
        }
    }

    fn legacy_tag(&self) -> Option<&'static str> {
        match self {
            Self::Active => None,
            Self::PendingBusinessReview => Some("[PENDING_BUSINESS_REVIEW]"),
            Self::MovedFromPersonal => Some("[MOVED_FROM_PERSONAL]"),
        }
    }

    /// Pull a legacy status tag out of free-text notes.
    ///
    /// Returns the status and the notes with every known tag removed. When
    /// several tags are present the first one in the notes wins.
    pub fn from_notes(notes: &str) -> (Self, String) {
        let mut found: Option<(usize, Self)> = None;
        let mut cleaned = notes.to_string();
        for status in [Self::PendingBusinessReview, Self::MovedFromPersonal] {
            let Some(tag) = status.legacy_tag() else {
                continue;
            };
            if let Some(pos) = notes.find(tag) {
                if found.map_or(true, |(p, _)| pos < p) {
                    found = Some((pos, status));
                }
                cleaned = cleaned.replace(tag, "");
            }
        }
        let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
        (found.map(|(_, s)| s).unwrap_or_default(), cleaned)
    }
}

impl FromStr for TransactionStatus {
    type Err = ReckonError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "pending_business_review" => Ok(Self::PendingBusinessReview),
            "moved_from_personal" => Ok(Self::MovedFromPersonal),
            other => Err(ReckonError::Other(format!("Unknown transaction status: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    /// Negative is an outflow.
    pub amount: f64,
    pub description: String,
    pub transaction_date: NaiveDate,
    pub receipt_id: Option<String>,
    pub receipt_image_url: Option<String>,
    pub category_id: Option<i64>,
    pub vat_amount: Option<f64>,
    pub vat_rate: Option<f64>,
    pub notes: Option<String>,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub description: String,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub total: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Receipt {
    pub id: String,
    pub user_id: String,
    pub image_ref: String,
    pub supplier_name: Option<String>,
    pub receipt_date: Option<NaiveDate>,
    pub total_amount: Option<f64>,
    pub vat_amount: Option<f64>,
    pub vat_rate: Option<f64>,
    pub line_items: Vec<LineItem>,
    pub confidence: Option<f64>,
    pub transaction_id: Option<String>,
    pub content_hash: Option<String>,
}

/// The slice of an unlinked transaction the scorer looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub id: String,
    pub amount: f64,
    pub description: String,
    pub transaction_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub receipt_id: String,
    pub transaction_id: Option<String>,
    pub score: f64,
    pub explanation: String,
    pub auto_matched: bool,
}

impl MatchResult {
    pub fn no_match(receipt_id: &str, explanation: impl Into<String>) -> Self {
        Self {
            receipt_id: receipt_id.to_string(),
            transaction_id: None,
            score: 0.0,
            explanation: explanation.into(),
            auto_matched: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserCorrection {
    pub id: String,
    pub user_id: String,
    pub vendor_pattern: String,
    pub original_category: Option<String>,
    pub corrected_category: String,
    pub corrected_category_id: i64,
    pub corrected_vat_rate: Option<f64>,
    /// Every correction for this vendor, whatever category it chose.
    pub transaction_count: u32,
    /// Corrections in a row that chose the current category.
    pub confirmations: u32,
    pub promoted_to_cache: bool,
}

/// Extracted fields as returned by the OCR service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReceiptData {
    #[serde(default)]
    pub supplier_name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub total_amount: Option<f64>,
    #[serde(default)]
    pub vat_amount: Option<f64>,
    #[serde(default)]
    pub vat_rate: Option<f64>,
    #[serde(default)]
    pub net_amount: Option<f64>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub suggested_category: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Envelope of a `processReceipt` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessReceiptResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<ReceiptData>,
    #[serde(default)]
    pub raw_text: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}
