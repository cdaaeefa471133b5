mod cli;
mod corrections;
mod db;
mod error;
mod fmt;
mod importer;
mod linker;
mod matcher;
mod models;
mod settings;
mod store;
mod vat;
mod vendor;

use clap::Parser;
use tracing_subscriber::prelude::*;

use cli::{
    Cli, Commands, CorrectionsCommands, ReceiptsCommands, TransactionsCommands, VatCommands,
};

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let user = cli.user.as_deref();

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Status => cli::status::run(user),
        Commands::Transactions { command } => match command {
            TransactionsCommands::Add {
                date,
                description,
                amount,
                category,
                vat_amount,
                vat_rate,
                notes,
            } => cli::transactions::add(
                user,
                &date,
                &description,
                amount,
                category.as_deref(),
                vat_amount,
                vat_rate,
                notes.as_deref(),
            ),
            TransactionsCommands::Import { file } => cli::transactions::import(user, &file),
            TransactionsCommands::List { unlinked } => cli::transactions::list(user, unlinked),
        },
        Commands::Receipts { command } => match command {
            ReceiptsCommands::Add {
                image,
                ocr,
                supplier,
                date,
                total,
                vat_amount,
                vat_rate,
                no_match,
            } => cli::receipts::add(
                user,
                &image,
                ocr.as_deref(),
                cli::receipts::ManualFields {
                    supplier,
                    date,
                    total,
                    vat_amount,
                    vat_rate,
                },
                !no_match,
            ),
            ReceiptsCommands::List => cli::receipts::list(user),
            ReceiptsCommands::Match { id, link } => cli::receipts::run_match(user, &id, link),
            ReceiptsCommands::Link {
                receipt,
                transaction,
            } => cli::receipts::link(user, &receipt, &transaction),
        },
        Commands::Corrections { command } => match command {
            CorrectionsCommands::Record {
                description,
                category,
                original,
                vat_rate,
                transaction,
            } => cli::corrections::record(
                user,
                &description,
                &category,
                original.as_deref(),
                vat_rate,
                transaction.as_deref(),
            ),
            CorrectionsCommands::List => cli::corrections::list(user),
            CorrectionsCommands::Lookup { description } => {
                cli::corrections::lookup(user, &description)
            }
        },
        Commands::Recategorize {
            ids,
            description_contains,
            category,
            vat_rate,
        } => cli::recategorize::run(user, ids, description_contains.as_deref(), &category, vat_rate),
        Commands::Sweep => cli::sweep::run(user),
        Commands::Vat { command } => match command {
            VatCommands::Check {
                description,
                category,
                conference,
                personal,
            } => cli::vat::check(&description, category.as_deref(), conference, personal),
            VatCommands::Summary { from_date, to_date } => {
                cli::vat::summary(user, from_date.as_deref(), to_date.as_deref())
            }
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
