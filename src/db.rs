use std::path::Path;

use rusqlite::{Connection, OptionalExtension};

use crate::error::{ReckonError, Result};

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    category_type TEXT NOT NULL,
    description TEXT,
    is_active INTEGER DEFAULT 1
);

CREATE TABLE IF NOT EXISTS receipts (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    image_ref TEXT NOT NULL,
    supplier_name TEXT,
    receipt_date TEXT,
    total_amount REAL,
    vat_amount REAL,
    vat_rate REAL,
    line_items TEXT NOT NULL DEFAULT '[]',
    confidence REAL,
    transaction_id TEXT,
    content_hash TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS transactions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    transaction_date TEXT NOT NULL,
    description TEXT NOT NULL,
    amount REAL NOT NULL,
    category_id INTEGER,
    receipt_id TEXT,
    receipt_image_url TEXT,
    vat_amount REAL,
    vat_rate REAL,
    notes TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (category_id) REFERENCES categories(id)
);

CREATE TABLE IF NOT EXISTS user_corrections (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    vendor_pattern TEXT NOT NULL,
    original_category TEXT,
    corrected_category TEXT NOT NULL,
    corrected_category_id INTEGER NOT NULL,
    corrected_vat_rate REAL,
    transaction_count INTEGER NOT NULL DEFAULT 1,
    confirmations INTEGER NOT NULL DEFAULT 1,
    promoted_to_cache INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT DEFAULT (datetime('now')),
    UNIQUE (user_id, vendor_pattern),
    FOREIGN KEY (corrected_category_id) REFERENCES categories(id)
);

CREATE TABLE IF NOT EXISTS vendor_cache (
    user_id TEXT NOT NULL,
    vendor_pattern TEXT NOT NULL,
    category_id INTEGER NOT NULL,
    vat_rate REAL,
    confidence INTEGER NOT NULL,
    promoted_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (user_id, vendor_pattern),
    FOREIGN KEY (category_id) REFERENCES categories(id)
);

CREATE INDEX IF NOT EXISTS idx_transactions_unlinked
    ON transactions (user_id, receipt_id, transaction_date);
CREATE UNIQUE INDEX IF NOT EXISTS idx_receipts_hash
    ON receipts (user_id, content_hash);
";

// (name, category_type, description)
const DEFAULT_CATEGORIES: &[(&str, &str, &str)] = &[
    ("Sales", "income", "Invoiced and cash sales"),
    ("Other Income", "income", "Grants, interest, anything else"),
    ("Materials", "expense", "Stock and materials used on jobs"),
    ("Tools & Equipment", "expense", "Hand tools, plant, small equipment"),
    ("Motor Fuel", "expense", "Petrol and diesel"),
    ("Motor Expenses", "expense", "Repairs, tolls, parking"),
    ("Subsistence", "expense", "Food and drink while working away"),
    ("Accommodation", "expense", "Hotels and lodging"),
    ("Entertainment", "expense", "Client entertainment"),
    ("Office Expense", "expense", "Stationery, postage, small office items"),
    ("Software & Subscriptions", "expense", "SaaS tools and subscriptions"),
    ("Telephone & Internet", "expense", "Phone and broadband"),
    ("Professional Fees", "expense", "Accountant, solicitor"),
    ("Bank Charges", "expense", "Bank and card fees"),
    ("Subcontractors", "expense", "RCT subcontractor payments"),
    ("Uncategorized", "expense", "Needs review"),
];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let count: i64 = conn.query_row("SELECT count(*) FROM categories", [], |row| row.get(0))?;
    if count == 0 {
        for (name, category_type, description) in DEFAULT_CATEGORIES {
            conn.execute(
                "INSERT INTO categories (name, category_type, description) VALUES (?1, ?2, ?3)",
                rusqlite::params![name, category_type, description],
            )?;
        }
    }
    Ok(())
}

pub fn category_id(conn: &Connection, name: &str) -> Result<i64> {
    conn.query_row(
        "SELECT id FROM categories WHERE name = ?1 COLLATE NOCASE",
        [name],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| ReckonError::UnknownCategory(name.to_string()))
}

pub fn category_name(conn: &Connection, id: i64) -> Result<String> {
    conn.query_row("SELECT name FROM categories WHERE id = ?1", [id], |row| row.get(0))
        .optional()?
        .ok_or_else(|| ReckonError::UnknownCategory(id.to_string()))
}

#[cfg(test)]
pub(crate) fn test_db() -> (tempfile::TempDir, Connection) {
    let dir = tempfile::tempdir().unwrap();
    let conn = get_connection(&dir.path().join("test.db")).unwrap();
    init_db(&conn).unwrap();
    (dir, conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_db_creates_tables() {
        let (_dir, conn) = test_db();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        for expected in &["categories", "receipts", "transactions", "user_corrections", "vendor_cache"] {
            assert!(tables.contains(&expected.to_string()), "missing table: {expected}");
        }
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, conn) = test_db();
        init_db(&conn).unwrap();
        let count: i64 = conn.query_row("SELECT count(*) FROM categories", [], |r| r.get(0)).unwrap();
        assert_eq!(count as usize, DEFAULT_CATEGORIES.len());
    }

    #[test]
    fn test_category_lookup_is_case_insensitive() {
        let (_dir, conn) = test_db();
        let id = category_id(&conn, "motor fuel").unwrap();
        assert_eq!(category_name(&conn, id).unwrap(), "Motor Fuel");
        assert!(matches!(
            category_id(&conn, "Yachts"),
            Err(ReckonError::UnknownCategory(_))
        ));
    }

    #[test]
    fn test_category_lookup_reports_database_errors() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(matches!(category_id(&conn, "Motor Fuel"), Err(ReckonError::Db(_))));
        assert!(matches!(category_name(&conn, 1), Err(ReckonError::Db(_))));
    }
}
