use std::path::PathBuf;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::{open_store, settings_for};
use crate::corrections::TrustedVendorCache;
use crate::db::category_id;
use crate::error::Result;
use crate::fmt::{money, short_id};
use crate::importer::import_csv;
use crate::models::{parse_date, TransactionStatus};
use crate::store::NewTransaction;

#[allow(clippy::too_many_arguments)]
pub fn add(
    user: Option<&str>,
    date: &str,
    description: &str,
    amount: f64,
    category: Option<&str>,
    vat_amount: Option<f64>,
    vat_rate: Option<f64>,
    notes: Option<&str>,
) -> Result<()> {
    let settings = settings_for(user);
    let store = open_store(&settings)?;
    let (cat_id, vat_rate) = match category {
        Some(name) => (Some(category_id(&*store.conn()?, name)?), vat_rate),
        None => {
            let cache = TrustedVendorCache::new(&settings.user_id);
            cache.initialize(&*store.conn()?)?;
            match cache.lookup(description) {
                Some(trusted) => {
                    println!("Trusted vendor {}", trusted.vendor_pattern.cyan());
                    (Some(trusted.category_id), vat_rate.or(trusted.vat_rate))
                }
                None => (None, vat_rate),
            }
        }
    };
    let id = store.insert_transaction(&NewTransaction {
        user_id: &settings.user_id,
        transaction_date: parse_date(date)?,
        description,
        amount,
        category_id: cat_id,
        vat_amount,
        vat_rate,
        notes,
    })?;
    println!("Added transaction {id}");
    Ok(())
}

pub fn import(user: Option<&str>, file: &str) -> Result<()> {
    let settings = settings_for(user);
    let store = open_store(&settings)?;
    let cache = TrustedVendorCache::new(&settings.user_id);
    cache.initialize(&*store.conn()?)?;
    let result = import_csv(&store, &settings.user_id, &PathBuf::from(file), &cache)?;
    println!(
        "{} imported, {} skipped, {} categorized from trusted vendors",
        result.imported, result.skipped, result.categorized
    );
    Ok(())
}

pub fn list(user: Option<&str>, unlinked_only: bool) -> Result<()> {
    let settings = settings_for(user);
    let store = open_store(&settings)?;
    let transactions = store.list_transactions(&settings.user_id)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Description", "Amount", "VAT", "Receipt", "Status"]);
    for txn in transactions
        .iter()
        .filter(|t| !unlinked_only || t.receipt_id.is_none())
    {
        let status = match txn.status {
            TransactionStatus::Active => String::new(),
            other => other.as_str().yellow().to_string(),
        };
        table.add_row(vec![
            Cell::new(&txn.id),
            Cell::new(txn.transaction_date),
            Cell::new(&txn.description),
            Cell::new(money(txn.amount)),
            Cell::new(txn.vat_amount.map(money).unwrap_or_default()),
            Cell::new(txn.receipt_id.as_deref().map(short_id).unwrap_or_default()),
            Cell::new(status),
        ]);
    }
    println!("Transactions\n{table}");
    Ok(())
}
