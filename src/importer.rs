use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::corrections::TrustedVendorCache;
use crate::error::Result;
use crate::models::parse_date;
use crate::store::{NewTransaction, SqliteStore};

/// One row of a bank export: `date,description,amount[,notes]`.
#[derive(Debug, Deserialize)]
struct BankRow {
    date: String,
    description: String,
    amount: String,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Default, PartialEq)]
pub struct ImportResult {
    pub imported: usize,
    pub skipped: usize,
    /// Imported rows categorized from trusted vendor mappings.
    pub categorized: usize,
}

/// Parse an amount as banks export it: thousands separators, currency
/// signs, or parentheses for negatives.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let s = raw.replace([',', '"', '\u{20ac}', '$', '\u{a3}'], "");
    let s = s.trim();
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        return inner.trim().parse::<f64>().ok().map(|v| -v);
    }
    s.parse().ok()
}

fn is_duplicate_row(
    store: &SqliteStore,
    user_id: &str,
    date: &str,
    description: &str,
    amount: f64,
) -> Result<bool> {
    let conn = store.conn()?;
    let mut stmt = conn.prepare_cached(
        "SELECT 1 FROM transactions WHERE user_id = ?1 AND transaction_date = ?2 \
         AND amount = ?3 AND description = ?4",
    )?;
    Ok(stmt.exists(rusqlite::params![user_id, date, amount, description])?)
}

/// Import a bank CSV. Rows already present (same date, amount and
/// description) and rows that do not parse are skipped. Rows from a trusted
/// vendor get its category straight away.
pub fn import_csv(
    store: &SqliteStore,
    user_id: &str,
    path: &Path,
    cache: &TrustedVendorCache,
) -> Result<ImportResult> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;
    let mut result = ImportResult::default();

    for (index, row) in reader.deserialize::<BankRow>().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                debug!(record = index + 1, error = %e, "skipping malformed record");
                result.skipped += 1;
                continue;
            }
        };
        let (Ok(date), Some(amount)) = (parse_date(&row.date), parse_amount(&row.amount)) else {
            debug!(date = %row.date, amount = %row.amount, "skipping unparseable row");
            result.skipped += 1;
            continue;
        };
        let iso = date.format(crate::models::DATE_FORMAT).to_string();
        if is_duplicate_row(store, user_id, &iso, &row.description, amount)? {
            result.skipped += 1;
            continue;
        }
        let trusted = cache.lookup(&row.description);
        store.insert_transaction(&NewTransaction {
            user_id,
            transaction_date: date,
            description: &row.description,
            amount,
            category_id: trusted.as_ref().map(|t| t.category_id),
            vat_amount: None,
            vat_rate: trusted.as_ref().and_then(|t| t.vat_rate),
            notes: row.notes.as_deref().filter(|n| !n.is_empty()),
        })?;
        result.imported += 1;
        if trusted.is_some() {
            result.categorized += 1;
        }
    }
    Ok(result)
}
