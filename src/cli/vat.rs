use std::collections::HashMap;

use colored::Colorize;

use crate::cli::{open_store, settings_for};
use crate::error::Result;
use crate::fmt::money;
use crate::models::parse_date;
use crate::settings::load_settings;
use crate::vat::{vat_on_purchases, VatContext};

pub fn check(
    description: &str,
    category: Option<&str>,
    conference: bool,
    personal: bool,
) -> Result<()> {
    let policy = load_settings().vat_policy()?;
    let context = VatContext {
        qualifying_conference: conference,
        personal_use: personal,
    };
    let decision = policy.is_vat_deductible(description, category, Some(&context));
    if decision.is_deductible {
        println!("{} {}", "Deductible:".green(), decision.reason);
    } else {
        println!("{} {}", "Not deductible:".red(), decision.reason);
    }
    Ok(())
}

pub fn summary(user: Option<&str>, from_date: Option<&str>, to_date: Option<&str>) -> Result<()> {
    let settings = settings_for(user);
    let policy = settings.vat_policy()?;
    let store = open_store(&settings)?;
    let from = from_date.map(parse_date).transpose()?;
    let to = to_date.map(parse_date).transpose()?;

    let transactions: Vec<_> = store
        .list_transactions(&settings.user_id)?
        .into_iter()
        .filter(|t| from.map_or(true, |d| t.transaction_date >= d))
        .filter(|t| to.map_or(true, |d| t.transaction_date <= d))
        .collect();

    let names: HashMap<i64, String> = {
        let conn = store.conn()?;
        let mut stmt = conn.prepare("SELECT id, name FROM categories")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        rows
    };

    let summary = vat_on_purchases(&policy, &transactions, &names);
    println!("Purchases with VAT:  {}", summary.considered);
    println!("VAT reclaimable:     {}", money(summary.reclaimable));
    println!("VAT blocked:         {}", money(summary.blocked));
    Ok(())
}
