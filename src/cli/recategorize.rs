use crate::cli::{open_store, settings_for};
use crate::db::category_id;
use crate::error::{ReckonError, Result};
use crate::linker::bulk_recategorize;

pub fn run(
    user: Option<&str>,
    mut ids: Vec<String>,
    description_contains: Option<&str>,
    category: &str,
    vat_rate: Option<f64>,
) -> Result<()> {
    let settings = settings_for(user);
    let store = open_store(&settings)?;
    let cat_id = category_id(&*store.conn()?, category)?;

    if let Some(needle) = description_contains {
        let needle = needle.to_lowercase();
        for txn in store.list_transactions(&settings.user_id)? {
            if txn.description.to_lowercase().contains(&needle) && !ids.contains(&txn.id) {
                ids.push(txn.id);
            }
        }
    }
    if ids.is_empty() {
        return Err(ReckonError::Other("No transactions selected".to_string()));
    }

    let summary = bulk_recategorize(
        &store,
        &settings.user_id,
        &ids,
        cat_id,
        vat_rate,
        &settings.batch_options(),
        |progress| eprintln!("  {}/{}", progress.updated + progress.failed, progress.total),
        |done| {
            println!(
                "{} total, {} updated, {} failed",
                done.total, done.updated, done.failed
            )
        },
    );
    for id in &summary.failed_ids {
        println!("  failed: {id}");
    }
    Ok(())
}
