use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::db::{get_connection, init_db};
use crate::error::{ReckonError, Result};
use crate::models::{MatchCandidate, Receipt, ReceiptData, Transaction, TransactionStatus};

/// A receipt that points at a transaction which does not point back.
#[derive(Debug, Clone, PartialEq)]
pub struct DanglingLink {
    pub receipt_id: String,
    pub transaction_id: String,
    pub image_ref: String,
    pub vat_amount: Option<f64>,
    pub vat_rate: Option<f64>,
    /// Receipt the transaction is currently linked to, if any.
    pub current_owner: Option<String>,
}

/// A transaction that holds a receipt which points somewhere else.
#[derive(Debug, Clone, PartialEq)]
pub struct OrphanedLink {
    pub transaction_id: String,
    pub receipt_id: String,
}

/// Record store used by the matcher and linker.
///
/// Implementations must be shareable across the worker threads of a batch.
pub trait RecordStore: Send + Sync {
    /// Transactions without a receipt, optionally narrowed to an inclusive
    /// date window. Results come back in a stable order (date, then insertion).
    fn unlinked_candidates(
        &self,
        user_id: &str,
        window: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<MatchCandidate>>;

    fn get_transaction(&self, id: &str) -> Result<Option<Transaction>>;

    fn get_receipt(&self, id: &str) -> Result<Option<Receipt>>;

    /// Point a receipt at its transaction.
    fn set_receipt_transaction(&self, receipt_id: &str, transaction_id: &str) -> Result<()>;

    /// Drop a receipt's transaction reference if it still points at
    /// `transaction_id`. Returns whether anything changed.
    fn clear_receipt_transaction(&self, receipt_id: &str, transaction_id: &str) -> Result<bool>;

    /// Claim a transaction for a receipt and record the image. VAT fields
    /// are only overwritten when a value is given. Fails with
    /// `AlreadyClaimed` if another receipt holds the transaction.
    fn attach_receipt(
        &self,
        transaction_id: &str,
        receipt_id: &str,
        image_url: &str,
        vat_amount: Option<f64>,
        vat_rate: Option<f64>,
    ) -> Result<()>;

    /// Drop a transaction's receipt if it is still `receipt_id`. Returns
    /// whether anything changed.
    fn release_transaction(&self, transaction_id: &str, receipt_id: &str) -> Result<bool>;

    /// Set the category of one of `user_id`'s transactions. Transactions of
    /// other users are reported as unknown.
    fn update_category(
        &self,
        user_id: &str,
        transaction_id: &str,
        category_id: i64,
        vat_rate: Option<f64>,
    ) -> Result<()>;

    fn dangling_receipt_links(&self, user_id: &str) -> Result<Vec<DanglingLink>>;

    fn orphaned_transaction_links(&self, user_id: &str) -> Result<Vec<OrphanedLink>>;
}

pub struct NewTransaction<'a> {
    pub user_id: &'a str,
    pub transaction_date: NaiveDate,
    pub description: &'a str,
    pub amount: f64,
    pub category_id: Option<i64>,
    pub vat_amount: Option<f64>,
    pub vat_rate: Option<f64>,
    pub notes: Option<&'a str>,
}

pub struct NewReceipt<'a> {
    pub user_id: &'a str,
    pub image_ref: &'a str,
    pub image_bytes: Option<&'a [u8]>,
    pub data: &'a ReceiptData,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

const TRANSACTION_COLUMNS: &str = "id, user_id, amount, description, transaction_date, receipt_id, \
     receipt_image_url, category_id, vat_amount, vat_rate, notes, status";

const RECEIPT_COLUMNS: &str = "id, user_id, image_ref, supplier_name, receipt_date, total_amount, \
     vat_amount, vat_rate, line_items, confidence, transaction_id, content_hash";

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Open (and create if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = get_connection(path)?;
        init_db(&conn)?;
        Ok(Self::new(conn))
    }

    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ReckonError::Other("record store lock poisoned".to_string()))
    }

    /// Insert a transaction. Legacy status tags in `notes` are lifted into
    /// the status column.
    pub fn insert_transaction(&self, txn: &NewTransaction<'_>) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let (status, notes) = match txn.notes {
            Some(raw) => {
                let (status, cleaned) = TransactionStatus::from_notes(raw);
                (status, (!cleaned.is_empty()).then_some(cleaned))
            }
            None => (TransactionStatus::Active, None),
        };
        self.conn()?.execute(
            "INSERT INTO transactions (id, user_id, transaction_date, description, amount, \
             category_id, vat_amount, vat_rate, notes, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                id,
                txn.user_id,
                txn.transaction_date,
                txn.description,
                txn.amount,
                txn.category_id,
                txn.vat_amount,
                txn.vat_rate,
                notes,
                status.as_str(),
            ],
        )?;
        Ok(id)
    }

    /// Store a receipt from OCR output. Uploading the same image twice
    /// returns the existing receipt id.
    pub fn insert_receipt(&self, receipt: &NewReceipt<'_>) -> Result<String> {
        let content_hash = receipt.image_bytes.map(|bytes| {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            hex::encode(hasher.finalize())
        });
        let conn = self.conn()?;

        if let Some(hash) = &content_hash {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM receipts WHERE user_id = ?1 AND content_hash = ?2",
                    rusqlite::params![receipt.user_id, hash],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = existing {
                tracing::info!(receipt_id = %id, "duplicate receipt image, reusing existing record");
                return Ok(id);
            }
        }

        let data = receipt.data;
        let receipt_date = data
            .date
            .as_deref()
            .map(crate::models::parse_date)
            .transpose()?;
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO receipts (id, user_id, image_ref, supplier_name, receipt_date, total_amount, \
             vat_amount, vat_rate, line_items, confidence, content_hash) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                id,
                receipt.user_id,
                receipt.image_ref,
                data.supplier_name,
                receipt_date,
                data.total_amount,
                data.vat_amount,
                data.vat_rate,
                serde_json::to_string(&data.line_items)?,
                data.confidence,
                content_hash,
            ],
        )?;
        Ok(id)
    }

    pub fn list_transactions(&self, user_id: &str) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = ?1 \
             ORDER BY transaction_date, rowid"
        ))?;
        let rows = stmt
            .query_map([user_id], row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_receipts(&self, user_id: &str) -> Result<Vec<Receipt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE user_id = ?1 ORDER BY rowid"
        ))?;
        let rows = stmt
            .query_map([user_id], row_to_receipt)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
    let status: String = row.get(11)?;
    let status = status.parse::<TransactionStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        description: row.get(3)?,
        transaction_date: row.get(4)?,
        receipt_id: row.get(5)?,
        receipt_image_url: row.get(6)?,
        category_id: row.get(7)?,
        vat_amount: row.get(8)?,
        vat_rate: row.get(9)?,
        notes: row.get(10)?,
        status,
    })
}

fn row_to_candidate(row: &rusqlite::Row) -> rusqlite::Result<MatchCandidate> {
    Ok(MatchCandidate {
        id: row.get(0)?,
        amount: row.get(1)?,
        description: row.get(2)?,
        transaction_date: row.get(3)?,
    })
}

fn row_to_receipt(row: &rusqlite::Row) -> rusqlite::Result<Receipt> {
    let line_items: String = row.get(8)?;
    let line_items = serde_json::from_str(&line_items).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Receipt {
        id: row.get(0)?,
        user_id: row.get(1)?,
        image_ref: row.get(2)?,
        supplier_name: row.get(3)?,
        receipt_date: row.get(4)?,
        total_amount: row.get(5)?,
        vat_amount: row.get(6)?,
        vat_rate: row.get(7)?,
        line_items,
        confidence: row.get(9)?,
        transaction_id: row.get(10)?,
        content_hash: row.get(11)?,
    })
}

impl RecordStore for SqliteStore {
    fn unlinked_candidates(
        &self,
        user_id: &str,
        window: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<MatchCandidate>> {
        let conn = self.conn()?;
        let base = "SELECT id, amount, description, transaction_date FROM transactions \
                    WHERE user_id = ?1 AND receipt_id IS NULL";
        let order = "ORDER BY transaction_date, rowid";
        let rows = match window {
            Some((from, to)) => {
                let mut stmt = conn.prepare(&format!(
                    "{base} AND transaction_date >= ?2 AND transaction_date <= ?3 {order}"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![user_id, from, to], row_to_candidate)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!("{base} {order}"))?;
                let rows = stmt
                    .query_map([user_id], row_to_candidate)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    fn get_transaction(&self, id: &str) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let txn = conn
            .query_row(
                &format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?1"),
                [id],
                row_to_transaction,
            )
            .optional()?;
        Ok(txn)
    }

    fn get_receipt(&self, id: &str) -> Result<Option<Receipt>> {
        let conn = self.conn()?;
        let receipt = conn
            .query_row(
                &format!("SELECT {RECEIPT_COLUMNS} FROM receipts WHERE id = ?1"),
                [id],
                row_to_receipt,
            )
            .optional()?;
        Ok(receipt)
    }

    fn set_receipt_transaction(&self, receipt_id: &str, transaction_id: &str) -> Result<()> {
        let changed = self.conn()?.execute(
            "UPDATE receipts SET transaction_id = ?1 WHERE id = ?2",
            rusqlite::params![transaction_id, receipt_id],
        )?;
        if changed == 0 {
            return Err(ReckonError::UnknownReceipt(receipt_id.to_string()));
        }
        Ok(())
    }

    fn clear_receipt_transaction(&self, receipt_id: &str, transaction_id: &str) -> Result<bool> {
        let changed = self.conn()?.execute(
            "UPDATE receipts SET transaction_id = NULL WHERE id = ?1 AND transaction_id = ?2",
            rusqlite::params![receipt_id, transaction_id],
        )?;
        Ok(changed > 0)
    }

    fn attach_receipt(
        &self,
        transaction_id: &str,
        receipt_id: &str,
        image_url: &str,
        vat_amount: Option<f64>,
        vat_rate: Option<f64>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE transactions SET receipt_id = ?1, receipt_image_url = ?2, \
             vat_amount = COALESCE(?3, vat_amount), vat_rate = COALESCE(?4, vat_rate) \
             WHERE id = ?5 AND (receipt_id IS NULL OR receipt_id = ?1)",
            rusqlite::params![receipt_id, image_url, vat_amount, vat_rate, transaction_id],
        )?;
        if changed == 1 {
            return Ok(());
        }
        let owner: Option<Option<String>> = conn
            .query_row(
                "SELECT receipt_id FROM transactions WHERE id = ?1",
                [transaction_id],
                |row| row.get(0),
            )
            .optional()?;
        match owner {
            None => Err(ReckonError::UnknownTransaction(transaction_id.to_string())),
            Some(owner) => Err(ReckonError::AlreadyClaimed {
                transaction_id: transaction_id.to_string(),
                receipt_id: owner.unwrap_or_default(),
            }),
        }
    }

    fn release_transaction(&self, transaction_id: &str, receipt_id: &str) -> Result<bool> {
        let changed = self.conn()?.execute(
            "UPDATE transactions SET receipt_id = NULL, receipt_image_url = NULL \
             WHERE id = ?1 AND receipt_id = ?2",
            rusqlite::params![transaction_id, receipt_id],
        )?;
        Ok(changed > 0)
    }

    fn update_category(
        &self,
        user_id: &str,
        transaction_id: &str,
        category_id: i64,
        vat_rate: Option<f64>,
    ) -> Result<()> {
        let changed = self.conn()?.execute(
            "UPDATE transactions SET category_id = ?1, vat_rate = COALESCE(?2, vat_rate) \
             WHERE id = ?3 AND user_id = ?4",
            rusqlite::params![category_id, vat_rate, transaction_id, user_id],
        )?;
        if changed == 0 {
            return Err(ReckonError::UnknownTransaction(transaction_id.to_string()));
        }
        Ok(())
    }

    fn dangling_receipt_links(&self, user_id: &str) -> Result<Vec<DanglingLink>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.transaction_id, r.image_ref, r.vat_amount, r.vat_rate, t.receipt_id \
             FROM receipts r JOIN transactions t ON t.id = r.transaction_id \
             WHERE r.user_id = ?1 AND (t.receipt_id IS NULL OR t.receipt_id != r.id) \
             ORDER BY r.rowid",
        )?;
        let rows = stmt
            .query_map([user_id], |row| {
                Ok(DanglingLink {
                    receipt_id: row.get(0)?,
                    transaction_id: row.get(1)?,
                    image_ref: row.get(2)?,
                    vat_amount: row.get(3)?,
                    vat_rate: row.get(4)?,
                    current_owner: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn orphaned_transaction_links(&self, user_id: &str) -> Result<Vec<OrphanedLink>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.receipt_id FROM transactions t \
             WHERE t.user_id = ?1 AND t.receipt_id IS NOT NULL AND NOT EXISTS ( \
                 SELECT 1 FROM receipts r WHERE r.id = t.receipt_id AND r.transaction_id = t.id) \
             ORDER BY t.transaction_date, t.rowid",
        )?;
        let rows = stmt
            .query_map([user_id], |row| {
                Ok(OrphanedLink {
                    transaction_id: row.get(0)?,
                    receipt_id: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
