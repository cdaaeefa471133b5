use crate::cli::settings_for;
use crate::db::get_connection;
use crate::error::Result;

pub fn run(user: Option<&str>) -> Result<()> {
    let settings = settings_for(user);
    let db_path = settings.db_path();

    println!("User:       {}", settings.user_id);
    println!("Data dir:   {}", settings.data_dir);
    println!("Database:   {}", db_path.display());
    println!(
        "VAT policy: {}",
        settings.vat_policy_path.as_deref().unwrap_or("(built-in)")
    );

    if !db_path.exists() {
        println!();
        println!("Database not found. Run `reckon init` to set up.");
        return Ok(());
    }

    let conn = get_connection(&db_path)?;
    let count = |sql: &str| -> Result<i64> {
        Ok(conn.query_row(sql, [&settings.user_id], |r| r.get(0))?)
    };
    let transactions = count("SELECT count(*) FROM transactions WHERE user_id = ?1")?;
    let unlinked =
        count("SELECT count(*) FROM transactions WHERE user_id = ?1 AND receipt_id IS NULL")?;
    let receipts = count("SELECT count(*) FROM receipts WHERE user_id = ?1")?;
    let unmatched =
        count("SELECT count(*) FROM receipts WHERE user_id = ?1 AND transaction_id IS NULL")?;
    let trusted = count("SELECT count(*) FROM vendor_cache WHERE user_id = ?1")?;

    println!();
    println!("Transactions:      {transactions} ({unlinked} without receipt)");
    println!("Receipts:          {receipts} ({unmatched} awaiting review)");
    println!("Trusted vendors:   {trusted}");
    Ok(())
}
