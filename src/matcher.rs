use chrono::{Duration, NaiveDate};
use tracing::{debug, info, warn};

use crate::error::{ReckonError, Result};
use crate::linker;
use crate::models::{MatchCandidate, MatchResult};
use crate::store::RecordStore;

const AMOUNT_WEIGHT: f64 = 0.50;
const VENDOR_WEIGHT: f64 = 0.30;
const SAME_DAY_WEIGHT: f64 = 0.20;
const NEAR_DAY_WEIGHT: f64 = 0.15;
/// Amounts closer than this are the same to the cent.
const AMOUNT_EPSILON: f64 = 0.005;
/// Minimum length of a vendor's first word for the fallback check.
const MIN_FIRST_WORD_LEN: usize = 3;

pub const NO_CANDIDATES: &str = "No candidate transactions found";
pub const NO_CRITERIA: &str = "No matching criteria met";
pub const NO_SUITABLE_MATCH: &str = "No suitable match found";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    pub auto_match_threshold: f64,
    /// Half-width of the date window used to narrow the candidate query.
    pub candidate_window_days: i64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            auto_match_threshold: 0.95,
            candidate_window_days: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub score: f64,
    pub explanation: String,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Score one unlinked transaction against a receipt.
///
/// Amount (0.50) needs an exact cent match, vendor (0.30) a case-insensitive
/// substring hit on the description, date gives 0.20 on the same day and
/// 0.15 one day apart.
pub fn score_candidate(
    candidate: &MatchCandidate,
    receipt_amount: f64,
    receipt_vendor: Option<&str>,
    receipt_date: Option<NaiveDate>,
) -> CandidateScore {
    let mut score = 0.0;
    let mut reasons: Vec<&str> = Vec::new();

    if (candidate.amount.abs() - receipt_amount.abs()).abs() < AMOUNT_EPSILON {
        score += AMOUNT_WEIGHT;
        reasons.push("Amount matches exactly");
    }

    if let Some(vendor) = receipt_vendor.map(|v| v.trim().to_lowercase()) {
        if !vendor.is_empty() {
            let description = candidate.description.to_lowercase();
            if description.contains(&vendor) {
                score += VENDOR_WEIGHT;
                reasons.push("Vendor name matches");
            } else if let Some(first) = vendor.split_whitespace().next() {
                if first.len() >= MIN_FIRST_WORD_LEN && description.contains(first) {
                    score += VENDOR_WEIGHT;
                    reasons.push("Vendor name partially matches");
                }
            }
        }
    }

    if let Some(date) = receipt_date {
        match (candidate.transaction_date - date).num_days().abs() {
            0 => {
                score += SAME_DAY_WEIGHT;
                reasons.push("Same day");
            }
            1 => {
                score += NEAR_DAY_WEIGHT;
                reasons.push("\u{b1}1 day");
            }
            _ => {}
        }
    }

    let explanation = if reasons.is_empty() {
        NO_CRITERIA.to_string()
    } else {
        reasons.join(", ")
    };

    CandidateScore {
        score: round2(score),
        explanation,
    }
}

/// Find the best unlinked transaction for a receipt.
///
/// Store failures degrade to a zero-score result carrying the error text.
/// Ties keep the first candidate in store order (earliest date, then
/// earliest inserted).
pub fn match_receipt_to_transaction(
    store: &dyn RecordStore,
    user_id: &str,
    receipt_id: &str,
    receipt_amount: f64,
    receipt_vendor: Option<&str>,
    receipt_date: Option<NaiveDate>,
    config: &MatchConfig,
) -> MatchResult {
    let window = receipt_date.map(|date| {
        let half = Duration::days(config.candidate_window_days);
        (date - half, date + half)
    });

    let candidates = match store.unlinked_candidates(user_id, window) {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!(receipt_id, error = %e, "candidate query failed");
            return MatchResult::no_match(receipt_id, format!("Query failed: {e}"));
        }
    };
    debug!(receipt_id, count = candidates.len(), "scoring candidates");

    if candidates.is_empty() {
        return MatchResult::no_match(receipt_id, NO_CANDIDATES);
    }

    let mut best: Option<(&MatchCandidate, CandidateScore)> = None;
    for candidate in &candidates {
        let scored = score_candidate(candidate, receipt_amount, receipt_vendor, receipt_date);
        debug!(
            transaction_id = %candidate.id,
            score = scored.score,
            explanation = %scored.explanation,
            "scored candidate"
        );
        let best_score = best.as_ref().map_or(0.0, |(_, s)| s.score);
        if scored.score > best_score {
            best = Some((candidate, scored));
        }
    }

    let Some((candidate, scored)) = best else {
        return MatchResult::no_match(receipt_id, NO_SUITABLE_MATCH);
    };

    let auto_matched = scored.score >= config.auto_match_threshold;
    if auto_matched {
        info!(receipt_id, transaction_id = %candidate.id, score = scored.score, "auto-matched receipt");
    }

    MatchResult {
        receipt_id: receipt_id.to_string(),
        transaction_id: Some(candidate.id.clone()),
        score: scored.score,
        explanation: scored.explanation,
        auto_matched,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub result: MatchResult,
    pub linked: bool,
}

/// Match a stored receipt and link it straight away when the match clears
/// the auto-match threshold. Anything else is left for manual review.
pub fn match_and_link(
    store: &dyn RecordStore,
    user_id: &str,
    receipt_id: &str,
    config: &MatchConfig,
) -> Result<MatchOutcome> {
    let receipt = store
        .get_receipt(receipt_id)?
        .filter(|r| r.user_id == user_id)
        .ok_or_else(|| ReckonError::UnknownReceipt(receipt_id.to_string()))?;

    if let Some(existing) = &receipt.transaction_id {
        return Err(ReckonError::Other(format!(
            "Receipt {receipt_id} is already linked to transaction {existing}"
        )));
    }

    let Some(amount) = receipt.total_amount else {
        return Ok(MatchOutcome {
            result: MatchResult::no_match(receipt_id, "Receipt has no total amount"),
            linked: false,
        });
    };

    let mut result = match_receipt_to_transaction(
        store,
        user_id,
        receipt_id,
        amount,
        receipt.supplier_name.as_deref(),
        receipt.receipt_date,
        config,
    );

    let Some(transaction_id) = result.transaction_id.clone().filter(|_| result.auto_matched) else {
        return Ok(MatchOutcome {
            result,
            linked: false,
        });
    };

    match linker::link_receipt_to_transaction(
        store,
        user_id,
        receipt_id,
        &transaction_id,
        &receipt.image_ref,
        receipt.vat_amount,
        receipt.vat_rate,
    ) {
        Ok(()) => Ok(MatchOutcome {
            result,
            linked: true,
        }),
        Err(ReckonError::AlreadyClaimed { receipt_id: owner, .. }) => {
            warn!(receipt_id, transaction_id = %transaction_id, owner = %owner, "lost link race");
            result.auto_matched = false;
            result.explanation = format!("{}; transaction already linked to receipt {owner}", result.explanation);
            Ok(MatchOutcome {
                result,
                linked: false,
            })
        }
        Err(e) => Err(e),
    }
}
