use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use serde_json::json;
use std::path::{Path, PathBuf};

use reco_engine::{
    insert_account_entries, insert_movements, load_account_entries_csv, load_book,
    load_movements_csv, save_book, setup_database, EngineConfig, Event, InternalRecoBuilder,
    StatementMatcher,
};

const ACTOR: &str = "reco_engine";

/// Reco Engine - automatic reconciliation of wallet movements
#[derive(Parser, Debug)]
#[command(name = "reco-engine", about = "Automatic reconciliation matching engine", version)]
struct Args {
    /// SQLite database file
    #[arg(long, default_value = "reco.db")]
    db: PathBuf,

    /// Engine configuration (JSON); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database schema
    Init,

    /// Load file movements from a CSV
    LoadMovements { csv: PathBuf },

    /// Reconcile the internal hills and valleys of one transfer
    Sync { transfer_id: String },

    /// Load a statement CSV and match its entries against open movements
    ImportStatement { csv: PathBuf },

    /// List every Reco with its members and balance
    Recos,
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the command's report
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    let mut conn = open_database(&args.db)?;

    match args.command {
        Command::Init => {
            println!("✓ Database initialized with WAL mode: {}", args.db.display());
        }
        Command::LoadMovements { csv } => run_load_movements(&conn, &csv)?,
        Command::Sync { transfer_id } => run_sync(&mut conn, &config, &transfer_id)?,
        Command::ImportStatement { csv } => run_import_statement(&mut conn, &config, &csv)?,
        Command::Recos => run_list_recos(&conn)?,
    }

    Ok(())
}

fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

fn run_load_movements(conn: &Connection, csv: &Path) -> Result<()> {
    println!("📂 Loading movements from {}", csv.display());

    let movements = load_movements_csv(csv)?;
    let inserted = insert_movements(conn, &movements)?;

    println!("✓ Inserted: {} movements", inserted);
    println!("✓ Skipped duplicates: {}", movements.len() - inserted);
    Ok(())
}

fn run_sync(conn: &mut Connection, config: &EngineConfig, transfer_id: &str) -> Result<()> {
    let mut book = load_book(conn)?;
    let builder = InternalRecoBuilder::with_config(config.clone());

    let report = builder
        .sync_transfer(&mut book, transfer_id)
        .with_context(|| format!("Internal sync failed for transfer {}", transfer_id))?;

    if !report.reco_ids.is_empty() {
        let event = Event::new(
            "internal_recos_created",
            "transfer",
            transfer_id,
            json!({ "reco_ids": report.reco_ids, "runs": report.runs }),
            ACTOR,
        );
        save_book(conn, &book, Some(&event))?;
    }

    println!("⛰️  {}", report.summary());
    Ok(())
}

fn run_import_statement(conn: &mut Connection, config: &EngineConfig, csv: &Path) -> Result<()> {
    println!("📂 Loading statement entries from {}", csv.display());

    let entries = load_account_entries_csv(csv)?;
    let inserted = insert_account_entries(conn, &entries)?;
    println!("✓ Inserted: {} entries", inserted);

    let mut statement_ids: Vec<i64> = entries.iter().map(|e| e.statement_id).collect();
    statement_ids.sort_unstable();
    statement_ids.dedup();

    let matcher = StatementMatcher::with_config(config);

    for statement_id in statement_ids {
        let mut book = load_book(conn)?;
        let report = matcher
            .import_statement(&mut book, statement_id)
            .with_context(|| format!("Matching failed for statement {}", statement_id))?;

        if !report.pairs.is_empty() {
            let event = Event::new(
                "statement_matched",
                "statement",
                &statement_id.to_string(),
                json!({ "reco_ids": report.reco_ids(), "pairs": report.pairs }),
                ACTOR,
            );
            save_book(conn, &book, Some(&event))?;
        }

        println!("🔗 {}", report.summary());
    }

    Ok(())
}

fn run_list_recos(conn: &Connection) -> Result<()> {
    let book = load_book(conn)?;

    for reco in book.recos() {
        let movements: Vec<i64> = book.reco_movements(reco.id).iter().map(|fm| fm.id()).collect();
        let entries: Vec<i64> = book.reco_entries(reco.id).iter().map(|e| e.id).collect();
        let imbalance = book.reco_imbalance(reco.id)?;

        println!(
            "Reco {:>5}  {:<12} {:<8} period {:<4} movements {:?} entries {:?} imbalance {}",
            reco.id,
            reco.reco_type.as_str(),
            if reco.internal { "internal" } else { "external" },
            reco.period_id,
            movements,
            entries,
            imbalance
        );
    }

    println!("\n✓ {} reco(s)", book.recos().count());
    Ok(())
}
