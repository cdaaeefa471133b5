use comfy_table::{Cell, Table};

use crate::cli::{open_store, settings_for};
use crate::corrections::{
    correction_confidence, list_corrections, record_correction, TrustedVendorCache,
    PROMOTION_THRESHOLD,
};
use crate::db::{category_id, category_name};
use crate::error::Result;
use crate::store::RecordStore;

pub fn record(
    user: Option<&str>,
    description: &str,
    category: &str,
    original: Option<&str>,
    vat_rate: Option<f64>,
    transaction: Option<&str>,
) -> Result<()> {
    let settings = settings_for(user);
    let store = open_store(&settings)?;

    let correction = {
        let conn = store.conn()?;
        let cat_id = category_id(&conn, category)?;
        record_correction(&conn, &settings.user_id, description, original, cat_id, vat_rate)?
    };
    if let Some(txn) = transaction {
        store.update_category(&settings.user_id, txn, correction.corrected_category_id, vat_rate)?;
    }

    println!(
        "'{}' \u{2192} {} (seen {}x, {} in a row, confidence {})",
        correction.vendor_pattern,
        correction.corrected_category,
        correction.transaction_count,
        correction.confirmations,
        correction_confidence(correction.confirmations)
    );
    if correction.promoted_to_cache {
        println!("Trusted: future transactions from this vendor are categorized automatically.");
    } else {
        let remaining = PROMOTION_THRESHOLD.saturating_sub(correction.confirmations);
        println!("{remaining} more correction(s) before this vendor is trusted.");
    }
    Ok(())
}

pub fn list(user: Option<&str>) -> Result<()> {
    let settings = settings_for(user);
    let store = open_store(&settings)?;
    let corrections = list_corrections(&*store.conn()?, &settings.user_id)?;

    let mut table = Table::new();
    table.set_header(vec!["Vendor", "From", "To", "VAT %", "Count", "In a row", "Confidence", "Trusted"]);
    for c in corrections {
        table.add_row(vec![
            Cell::new(&c.vendor_pattern),
            Cell::new(c.original_category.as_deref().unwrap_or("")),
            Cell::new(&c.corrected_category),
            Cell::new(c.corrected_vat_rate.map(|r| r.to_string()).unwrap_or_default()),
            Cell::new(c.transaction_count),
            Cell::new(c.confirmations),
            Cell::new(correction_confidence(c.confirmations)),
            Cell::new(if c.promoted_to_cache { "yes" } else { "" }),
        ]);
    }
    println!("Corrections\n{table}");
    Ok(())
}

pub fn lookup(user: Option<&str>, description: &str) -> Result<()> {
    let settings = settings_for(user);
    let store = open_store(&settings)?;
    let conn = store.conn()?;

    let cache = TrustedVendorCache::new(&settings.user_id);
    cache.initialize(&conn)?;
    match cache.lookup(description) {
        Some(hit) => println!(
            "{} ({}% confidence, VAT {})",
            category_name(&conn, hit.category_id)?,
            hit.confidence,
            hit.vat_rate
                .map(|r| format!("{r}%"))
                .unwrap_or_else(|| "unchanged".to_string())
        ),
        None => println!("No trusted category for this vendor."),
    }
    Ok(())
}
