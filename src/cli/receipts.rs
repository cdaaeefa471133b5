use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::{open_store, settings_for};
use crate::error::{ReckonError, Result};
use crate::fmt::{money, score, short_id};
use crate::linker::link_receipt_to_transaction;
use crate::matcher::{match_and_link, match_receipt_to_transaction};
use crate::models::{MatchResult, ProcessReceiptResponse, ReceiptData};
use crate::store::{NewReceipt, RecordStore};

/// Receipt fields given on the command line; they win over OCR output.
pub struct ManualFields {
    pub supplier: Option<String>,
    pub date: Option<String>,
    pub total: Option<f64>,
    pub vat_amount: Option<f64>,
    pub vat_rate: Option<f64>,
}

fn print_result(result: &MatchResult, linked: bool) {
    match &result.transaction_id {
        Some(txn) if linked => println!(
            "{} receipt to transaction {txn} (score {})",
            "Linked".green(),
            score(result.score)
        ),
        Some(txn) => println!(
            "{} best candidate {txn} (score {})",
            "Needs review:".yellow(),
            score(result.score)
        ),
        None => println!("{} no match", "Needs review:".yellow()),
    }
    println!("  {}", result.explanation);
}

pub fn add(
    user: Option<&str>,
    image: &str,
    ocr: Option<&str>,
    manual: ManualFields,
    run_match: bool,
) -> Result<()> {
    let settings = settings_for(user);
    let store = open_store(&settings)?;

    let mut data = match ocr {
        Some(path) => {
            let response: ProcessReceiptResponse =
                serde_json::from_str(&std::fs::read_to_string(path)?)?;
            if !response.success {
                return Err(ReckonError::Other(format!(
                    "OCR failed: {}",
                    response.notes.unwrap_or_else(|| "no details".to_string())
                )));
            }
            response.data.unwrap_or_default()
        }
        None => ReceiptData::default(),
    };
    data.supplier_name = manual.supplier.or(data.supplier_name);
    data.date = manual.date.or(data.date);
    data.total_amount = manual.total.or(data.total_amount);
    data.vat_amount = manual.vat_amount.or(data.vat_amount);
    data.vat_rate = manual.vat_rate.or(data.vat_rate);

    let bytes = Path::new(image)
        .is_file()
        .then(|| std::fs::read(image))
        .transpose()?;
    let id = store.insert_receipt(&NewReceipt {
        user_id: &settings.user_id,
        image_ref: image,
        image_bytes: bytes.as_deref(),
        data: &data,
    })?;
    println!("Stored receipt {id}");

    if run_match {
        let receipt = store
            .get_receipt(&id)?
            .ok_or_else(|| ReckonError::UnknownReceipt(id.clone()))?;
        if receipt.transaction_id.is_none() {
            let outcome = match_and_link(&store, &settings.user_id, &id, &settings.match_config())?;
            print_result(&outcome.result, outcome.linked);
        }
    }
    Ok(())
}

pub fn list(user: Option<&str>) -> Result<()> {
    let settings = settings_for(user);
    let store = open_store(&settings)?;
    let receipts = store.list_receipts(&settings.user_id)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Supplier", "Date", "Total", "VAT", "Transaction"]);
    for receipt in receipts {
        table.add_row(vec![
            Cell::new(&receipt.id),
            Cell::new(receipt.supplier_name.unwrap_or_default()),
            Cell::new(receipt.receipt_date.map(|d| d.to_string()).unwrap_or_default()),
            Cell::new(receipt.total_amount.map(money).unwrap_or_default()),
            Cell::new(receipt.vat_amount.map(money).unwrap_or_default()),
            Cell::new(
                receipt
                    .transaction_id
                    .as_deref()
                    .map(short_id)
                    .unwrap_or("unmatched"),
            ),
        ]);
    }
    println!("Receipts\n{table}");
    Ok(())
}

pub fn run_match(user: Option<&str>, id: &str, link: bool) -> Result<()> {
    let settings = settings_for(user);
    let store = open_store(&settings)?;
    let config = settings.match_config();

    if link {
        let outcome = match_and_link(&store, &settings.user_id, id, &config)?;
        print_result(&outcome.result, outcome.linked);
        return Ok(());
    }

    let receipt = store
        .get_receipt(id)?
        .filter(|r| r.user_id == settings.user_id)
        .ok_or_else(|| ReckonError::UnknownReceipt(id.to_string()))?;
    let amount = receipt
        .total_amount
        .ok_or_else(|| ReckonError::Other(format!("Receipt {id} has no total amount")))?;
    let result = match_receipt_to_transaction(
        &store,
        &settings.user_id,
        id,
        amount,
        receipt.supplier_name.as_deref(),
        receipt.receipt_date,
        &config,
    );
    print_result(&result, false);
    if result.auto_matched {
        println!("  Run again with --link to apply.");
    }
    Ok(())
}

pub fn link(user: Option<&str>, receipt_id: &str, transaction_id: &str) -> Result<()> {
    let settings = settings_for(user);
    let store = open_store(&settings)?;
    let receipt = store
        .get_receipt(receipt_id)?
        .filter(|r| r.user_id == settings.user_id)
        .ok_or_else(|| ReckonError::UnknownReceipt(receipt_id.to_string()))?;
    link_receipt_to_transaction(
        &store,
        &settings.user_id,
        receipt_id,
        transaction_id,
        &receipt.image_ref,
        receipt.vat_amount,
        receipt.vat_rate,
    )?;
    println!("Linked receipt {receipt_id} to transaction {transaction_id}");
    Ok(())
}
