use crate::cli::{open_store, settings_for};
use crate::error::Result;
use crate::linker::reconcile_links;

pub fn run(user: Option<&str>) -> Result<()> {
    let settings = settings_for(user);
    let store = open_store(&settings)?;
    let report = reconcile_links(&store, &settings.user_id)?;
    println!(
        "{} checked, {} repaired, {} released for re-matching, {} transactions detached, {} failed",
        report.checked, report.repaired, report.released, report.detached, report.failed
    );
    Ok(())
}
