pub mod corrections;
pub mod init;
pub mod receipts;
pub mod recategorize;
pub mod status;
pub mod sweep;
pub mod transactions;
pub mod vat;

use clap::{Parser, Subcommand};

use crate::error::{ReckonError, Result};
use crate::settings::{load_settings, Settings};
use crate::store::SqliteStore;

/// Settings with the `--user` override applied.
pub(crate) fn settings_for(user: Option<&str>) -> Settings {
    let mut settings = load_settings();
    if let Some(user) = user {
        settings.user_id = user.to_string();
    }
    settings
}

pub(crate) fn open_store(settings: &Settings) -> Result<SqliteStore> {
    let path = settings.db_path();
    if !path.exists() {
        return Err(ReckonError::Other(
            "Database not found. Run `reckon init` to set up.".to_string(),
        ));
    }
    SqliteStore::open(&path)
}

#[derive(Parser)]
#[command(
    name = "reckon",
    about = "Match receipts to bank transactions, learn categories, check VAT."
)]
pub struct Cli {
    /// Act on behalf of this user id instead of the configured one
    #[arg(long, global = true)]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and initialize the database.
    Init {
        /// Path for reckon data (default: ~/Documents/reckon)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Show database location and record counts.
    Status,
    /// Manage bank transactions.
    Transactions {
        #[command(subcommand)]
        command: TransactionsCommands,
    },
    /// Manage scanned receipts and their links.
    Receipts {
        #[command(subcommand)]
        command: ReceiptsCommands,
    },
    /// Record and inspect category corrections.
    Corrections {
        #[command(subcommand)]
        command: CorrectionsCommands,
    },
    /// Move transactions to another category in batches.
    Recategorize {
        /// Transaction ids to move
        ids: Vec<String>,
        /// Also move every transaction whose description contains this text
        #[arg(long = "description-contains")]
        description_contains: Option<String>,
        /// Target category name
        #[arg(long)]
        category: String,
        /// VAT rate to set on the moved transactions
        #[arg(long = "vat-rate")]
        vat_rate: Option<f64>,
    },
    /// Repair receipts whose transaction does not link back.
    Sweep,
    /// VAT deductibility checks.
    Vat {
        #[command(subcommand)]
        command: VatCommands,
    },
}

#[derive(Subcommand)]
pub enum TransactionsCommands {
    /// Add a single transaction.
    Add {
        /// Date: YYYY-MM-DD
        #[arg(long)]
        date: String,
        #[arg(long)]
        description: String,
        /// Signed amount; negative is money out
        #[arg(long, allow_hyphen_values = true)]
        amount: f64,
        /// Category name
        #[arg(long)]
        category: Option<String>,
        #[arg(long = "vat-amount")]
        vat_amount: Option<f64>,
        #[arg(long = "vat-rate")]
        vat_rate: Option<f64>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Import a bank CSV with date,description,amount[,notes] columns.
    Import {
        /// Path to CSV file
        file: String,
    },
    /// List transactions.
    List {
        /// Only transactions without a receipt
        #[arg(long)]
        unlinked: bool,
    },
}

#[derive(Subcommand)]
pub enum ReceiptsCommands {
    /// Store a receipt and try to match it.
    Add {
        /// Path or URL of the receipt image
        #[arg(long)]
        image: String,
        /// JSON output of the OCR service
        #[arg(long)]
        ocr: Option<String>,
        #[arg(long)]
        supplier: Option<String>,
        /// Date: YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        total: Option<f64>,
        #[arg(long = "vat-amount")]
        vat_amount: Option<f64>,
        #[arg(long = "vat-rate")]
        vat_rate: Option<f64>,
        /// Store only; skip matching
        #[arg(long = "no-match")]
        no_match: bool,
    },
    /// List receipts.
    List,
    /// Score unlinked transactions against a receipt.
    Match {
        /// Receipt id
        id: String,
        /// Link when the score clears the auto-match threshold
        #[arg(long)]
        link: bool,
    },
    /// Link a receipt to a transaction by hand.
    Link {
        /// Receipt id
        receipt: String,
        /// Transaction id
        transaction: String,
    },
}

#[derive(Subcommand)]
pub enum CorrectionsCommands {
    /// Record that a transaction was moved to another category.
    Record {
        /// Bank description of the corrected transaction
        #[arg(long)]
        description: String,
        /// Category the user chose
        #[arg(long)]
        category: String,
        /// Category it had before
        #[arg(long)]
        original: Option<String>,
        #[arg(long = "vat-rate")]
        vat_rate: Option<f64>,
        /// Also apply the category to this transaction
        #[arg(long)]
        transaction: Option<String>,
    },
    /// List recorded corrections.
    List,
    /// Show the trusted category for a description, if any.
    Lookup {
        description: String,
    },
}

#[derive(Subcommand)]
pub enum VatCommands {
    /// Check whether VAT on a purchase is deductible.
    Check {
        description: String,
        /// Category name
        #[arg(long)]
        category: Option<String>,
        /// Accommodation for a qualifying conference
        #[arg(long)]
        conference: bool,
        /// Personal, not business, spending
        #[arg(long)]
        personal: bool,
    },
    /// VAT on purchases, split into reclaimable and blocked.
    Summary {
        /// Start date: YYYY-MM-DD
        #[arg(long = "from")]
        from_date: Option<String>,
        /// End date: YYYY-MM-DD
        #[arg(long = "to")]
        to_date: Option<String>,
    },
}
