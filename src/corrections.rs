use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::db::category_name;
use crate::error::{ReckonError, Result};
use crate::models::UserCorrection;
use crate::vendor::extract_vendor_pattern;

/// Corrections needed before a vendor mapping is trusted.
pub const PROMOTION_THRESHOLD: u32 = 3;

/// Confidence in a vendor mapping given how often a user has made the same
/// correction. One correction is noise.
pub fn correction_confidence(transaction_count: u32) -> u8 {
    match transaction_count {
        0 | 1 => 0,
        2 => 80,
        _ => 90,
    }
}

pub fn is_promotable(transaction_count: u32) -> bool {
    transaction_count >= PROMOTION_THRESHOLD
}

const CORRECTION_COLUMNS: &str = "id, user_id, vendor_pattern, original_category, corrected_category, \
     corrected_category_id, corrected_vat_rate, transaction_count, confirmations, promoted_to_cache";

fn row_to_correction(row: &rusqlite::Row) -> rusqlite::Result<UserCorrection> {
    Ok(UserCorrection {
        id: row.get(0)?,
        user_id: row.get(1)?,
        vendor_pattern: row.get(2)?,
        original_category: row.get(3)?,
        corrected_category: row.get(4)?,
        corrected_category_id: row.get(5)?,
        corrected_vat_rate: row.get(6)?,
        transaction_count: row.get(7)?,
        confirmations: row.get(8)?,
        promoted_to_cache: row.get::<_, i32>(9)? != 0,
    })
}

pub fn get_correction(
    conn: &Connection,
    user_id: &str,
    vendor_pattern: &str,
) -> Result<Option<UserCorrection>> {
    let correction = conn
        .query_row(
            &format!(
                "SELECT {CORRECTION_COLUMNS} FROM user_corrections \
                 WHERE user_id = ?1 AND vendor_pattern = ?2"
            ),
            [user_id, vendor_pattern],
            row_to_correction,
        )
        .optional()?;
    Ok(correction)
}

pub fn list_corrections(conn: &Connection, user_id: &str) -> Result<Vec<UserCorrection>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CORRECTION_COLUMNS} FROM user_corrections WHERE user_id = ?1 \
         ORDER BY transaction_count DESC, vendor_pattern"
    ))?;
    let rows = stmt
        .query_map([user_id], row_to_correction)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Record that a user re-categorized a transaction.
///
/// Every correction bumps the vendor's `transaction_count`. Repeating the
/// same category also bumps `confirmations`; choosing a different category
/// restarts confirmations at 1 and withdraws any trusted entry. Reaching
/// `PROMOTION_THRESHOLD` confirmations copies the mapping into
/// `vendor_cache`.
pub fn record_correction(
    conn: &Connection,
    user_id: &str,
    description: &str,
    original_category: Option<&str>,
    corrected_category_id: i64,
    corrected_vat_rate: Option<f64>,
) -> Result<UserCorrection> {
    let pattern = extract_vendor_pattern(description);
    if pattern.is_empty() {
        return Err(ReckonError::Other(format!(
            "No vendor pattern in description: {description:?}"
        )));
    }
    let corrected_category = category_name(conn, corrected_category_id)?;

    let tx = conn.unchecked_transaction()?;
    let existing = get_correction(&tx, user_id, &pattern)?;

    let (id, confirmations, was_promoted) = match existing {
        Some(prev) if prev.corrected_category_id == corrected_category_id => {
            let confirmations = prev.confirmations + 1;
            tx.execute(
                "UPDATE user_corrections SET transaction_count = transaction_count + 1, \
                 confirmations = ?1, corrected_vat_rate = COALESCE(?2, corrected_vat_rate), \
                 updated_at = datetime('now') WHERE id = ?3",
                rusqlite::params![confirmations, corrected_vat_rate, prev.id],
            )?;
            (prev.id, confirmations, prev.promoted_to_cache)
        }
        Some(prev) => {
            debug!(pattern = %pattern, "correction changed category, restarting confirmations");
            tx.execute(
                "UPDATE user_corrections SET original_category = ?1, corrected_category = ?2, \
                 corrected_category_id = ?3, corrected_vat_rate = ?4, \
                 transaction_count = transaction_count + 1, confirmations = 1, \
                 promoted_to_cache = 0, updated_at = datetime('now') WHERE id = ?5",
                rusqlite::params![
                    original_category,
                    corrected_category,
                    corrected_category_id,
                    corrected_vat_rate,
                    prev.id
                ],
            )?;
            tx.execute(
                "DELETE FROM vendor_cache WHERE user_id = ?1 AND vendor_pattern = ?2",
                [user_id, pattern.as_str()],
            )?;
            (prev.id, 1, false)
        }
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO user_corrections (id, user_id, vendor_pattern, original_category, \
                 corrected_category, corrected_category_id, corrected_vat_rate) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id,
                    user_id,
                    pattern,
                    original_category,
                    corrected_category,
                    corrected_category_id,
                    corrected_vat_rate
                ],
            )?;
            (id, 1, false)
        }
    };

    if is_promotable(confirmations) {
        tx.execute(
            "INSERT OR REPLACE INTO vendor_cache (user_id, vendor_pattern, category_id, vat_rate, confidence) \
             SELECT user_id, vendor_pattern, corrected_category_id, corrected_vat_rate, ?1 \
             FROM user_corrections WHERE id = ?2",
            rusqlite::params![correction_confidence(confirmations), id],
        )?;
        tx.execute(
            "UPDATE user_corrections SET promoted_to_cache = 1 WHERE id = ?1",
            [&id],
        )?;
        if !was_promoted {
            info!(pattern = %pattern, category = %corrected_category, "promoted vendor mapping");
        }
    }

    let correction = get_correction(&tx, user_id, &pattern)?
        .ok_or_else(|| ReckonError::Other(format!("Correction for {pattern} vanished")))?;
    tx.commit()?;
    Ok(correction)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedCategory {
    pub vendor_pattern: String,
    pub category_id: i64,
    pub vat_rate: Option<f64>,
    pub confidence: u8,
}

/// Promoted vendor mappings for one user, consulted before any other
/// categorization.
///
/// Starts empty; `initialize` loads it once and is safe to call from many
/// places. Concurrent first callers wait on the same load.
pub struct TrustedVendorCache {
    user_id: String,
    entries: Mutex<Option<HashMap<String, CachedCategory>>>,
}

impl TrustedVendorCache {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            entries: Mutex::new(None),
        }
    }

    /// Load the mappings unless already loaded. Returns whether this call
    /// did the load.
    pub fn initialize(&self, conn: &Connection) -> Result<bool> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ReckonError::Other("vendor cache lock poisoned".to_string()))?;
        if entries.is_some() {
            return Ok(false);
        }

        let mut stmt = conn.prepare(
            "SELECT vendor_pattern, category_id, vat_rate, confidence FROM vendor_cache WHERE user_id = ?1",
        )?;
        let loaded = stmt
            .query_map([&self.user_id], |row| {
                Ok(CachedCategory {
                    vendor_pattern: row.get(0)?,
                    category_id: row.get(1)?,
                    vat_rate: row.get(2)?,
                    confidence: row.get(3)?,
                })
            })?
            .map(|entry| entry.map(|e| (e.vendor_pattern.clone(), e)))
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        debug!(user_id = %self.user_id, entries = loaded.len(), "loaded vendor cache");
        *entries = Some(loaded);
        Ok(true)
    }

    /// Trusted category for a bank description, if its vendor is known.
    pub fn lookup(&self, description: &str) -> Option<CachedCategory> {
        let pattern = extract_vendor_pattern(description);
        if pattern.is_empty() {
            return None;
        }
        let entries = self.entries.lock().ok()?;
        entries.as_ref()?.get(&pattern).cloned()
    }
}
