use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use api_data_core::{format_stored_timestamp, StoredRecord};
use api_data_ingest::{ingest_from, HttpSource, IngestOutcome, RecordSource};
use api_data_store_sqlite::SqliteStore;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const DEFAULT_SOURCE_URL: &str = "https://mock-api-im8j.onrender.com/mock_api";
const MENU_LISTING_LIMIT: usize = 5;

#[derive(Debug, Parser)]
#[command(name = "apidata")]
#[command(about = "Fetch records from a remote endpoint into a local SQLite table")]
struct Cli {
    #[arg(long, env = "APIDATA_DB", default_value = "./api_data.db")]
    db: PathBuf,

    #[arg(long, env = "APIDATA_SOURCE_URL", default_value = DEFAULT_SOURCE_URL)]
    source_url: String,

    #[arg(long, env = "APIDATA_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive menu (default).
    Menu,
    /// Fetch one record and store it.
    Fetch,
    /// Show the first records in id order.
    List(ListArgs),
    /// Count stored records.
    Count,
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long, default_value_t = MENU_LISTING_LIMIT)]
    limit: usize,
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    tracing::debug!(db = %cli.db.display(), source_url = %cli.source_url, "starting");

    let mut store = SqliteStore::open(&cli.db)?;
    let source = HttpSource::new(cli.source_url, Duration::from_secs(cli.timeout_secs));

    match cli.command.unwrap_or(Command::Menu) {
        Command::Db { command } => run_db(command, &mut store),
        Command::Menu => {
            store.migrate()?;
            let stdin = io::stdin();
            let stdout = io::stdout();
            run_menu(&mut stdin.lock(), &mut stdout.lock(), &mut store, &source)
        }
        Command::Fetch => {
            store.migrate()?;
            run_fetch(&mut store, &source)
        }
        Command::List(args) => {
            store.migrate()?;
            run_list(&args, &store)
        }
        Command::Count => {
            store.migrate()?;
            emit_json(serde_json::json!({ "count": store.count_records()? }))
        }
    }
}

fn run_db(command: DbCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = store.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
                "inferred_from_legacy": status.inferred_from_legacy
            }))
        }
        DbCommand::Migrate(args) => run_db_migrate(&args, store),
    }
}

fn run_db_migrate(args: &DbMigrateArgs, store: &mut SqliteStore) -> Result<()> {
    let before = store.schema_status()?;
    if args.dry_run {
        return emit_json(serde_json::json!({
            "dry_run": true,
            "current_version": before.current_version,
            "target_version": before.target_version,
            "would_apply_versions": before.pending_versions,
            "inferred_from_legacy": before.inferred_from_legacy
        }));
    }

    store.migrate()?;
    let after = store.schema_status()?;
    emit_json(serde_json::json!({
        "dry_run": false,
        "before_version": before.current_version,
        "applied_versions": before.pending_versions,
        "after_version": after.current_version,
        "target_version": after.target_version,
        "up_to_date": after.pending_versions.is_empty()
    }))
}

fn run_fetch<S: RecordSource + ?Sized>(store: &mut SqliteStore, source: &S) -> Result<()> {
    let outcome = ingest_from(source, store);
    emit_json(outcome_json(&outcome)?)?;
    match outcome {
        IngestOutcome::Failed { error, .. } => Err(anyhow!("ingestion failed: {error}")),
        IngestOutcome::Succeeded { .. } | IngestOutcome::Rejected { .. } => Ok(()),
    }
}

fn run_list(args: &ListArgs, store: &SqliteStore) -> Result<()> {
    let records = store.first_records(args.limit)?;
    emit_json(serde_json::json!({
        "limit": args.limit,
        "records": records
    }))
}

fn outcome_json(outcome: &IngestOutcome) -> Result<Value> {
    let value = match outcome {
        IngestOutcome::Succeeded { raw, record } => serde_json::json!({
            "outcome": "succeeded",
            "raw": raw,
            "record": record
        }),
        IngestOutcome::Rejected { raw, reason } => serde_json::json!({
            "outcome": "rejected",
            "raw": raw,
            "reason": {
                "kind": reason.kind(),
                "fields": reason.fields(),
                "message": reason.to_string()
            }
        }),
        IngestOutcome::Failed { stage, raw, error } => serde_json::json!({
            "outcome": "failed",
            "stage": serde_json::to_value(stage)?,
            "raw": raw,
            "error": error.to_string()
        }),
    };
    Ok(value)
}

fn run_menu<R, W, S>(
    input: &mut R,
    out: &mut W,
    store: &mut SqliteStore,
    source: &S,
) -> Result<()>
where
    R: BufRead,
    W: Write,
    S: RecordSource + ?Sized,
{
    let mut line = String::new();
    loop {
        writeln!(out, "\nWelcome to the API data store\n===============================")?;
        write_record_count(out, store)?;
        writeln!(out, "\nMenu Options:")?;
        writeln!(out, "1. Fetch a new record from the API and insert into the database")?;
        writeln!(out, "2. View the first 5 records in the table ordered by ID number")?;
        writeln!(out, "3. Exit")?;
        write!(out, "Enter your choice (1, 2, or 3): ")?;
        out.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(out, "\nExiting the program.")?;
            return Ok(());
        }

        match line.trim() {
            "1" => write_ingest_outcome(out, &ingest_from(source, store))?,
            "2" => write_first_records(out, store)?,
            "3" => {
                writeln!(out, "Exiting the program.")?;
                return Ok(());
            }
            _ => writeln!(out, "Invalid choice. Please select 1, 2, or 3.")?,
        }
    }
}

fn write_record_count<W: Write>(out: &mut W, store: &SqliteStore) -> Result<()> {
    match store.count_records() {
        Ok(count) => writeln!(out, "Number of records in the table: {count}")?,
        Err(err) => writeln!(out, "Error: {err:#}")?,
    }
    Ok(())
}

fn write_ingest_outcome<W: Write>(out: &mut W, outcome: &IngestOutcome) -> Result<()> {
    if let Some(raw) = outcome.raw() {
        writeln!(out, "\nOriginal JSON fetched from API: {raw}")?;
    }

    match outcome {
        IngestOutcome::Succeeded { record, .. } => {
            writeln!(out, "\nContents of record inserted in database:")?;
            writeln!(out, "ID: {}", record.id)?;
            writeln!(out, "Name: {}", record.name)?;
            writeln!(out, "Timestamp: {}", format_stored_timestamp(record.timestamp)?)?;
            writeln!(out, "Value: {}", record.value)?;
            writeln!(out, "Weekday: {}", record.weekday)?;
            writeln!(out, "Days till Christmas: {}", record.days_till_christmas)?;
            writeln!(out, "Days till Halloween: {}", record.days_till_halloween)?;
            writeln!(out, "Data successfully fetched and stored")?;
        }
        IngestOutcome::Rejected { reason, .. } => {
            writeln!(out, "Error: {reason}. Record not inserted.")?;
        }
        IngestOutcome::Failed { error, .. } => writeln!(out, "Error: {error}")?,
    }
    Ok(())
}

fn write_first_records<W: Write>(out: &mut W, store: &SqliteStore) -> Result<()> {
    let records = match store.first_records(MENU_LISTING_LIMIT) {
        Ok(records) => records,
        Err(err) => {
            writeln!(out, "Error: {err:#}")?;
            return Ok(());
        }
    };

    writeln!(out, "\nFirst {MENU_LISTING_LIMIT} records in the table ordered by ID number:")?;
    for record in &records {
        writeln!(out, "{}", record_line(record)?)?;
    }
    Ok(())
}

fn record_line(record: &StoredRecord) -> Result<String> {
    Ok(format!(
        "ID: {}, Name: {}, Timestamp: {}, Value: {}, Weekday: {}, Days till Christmas: {}, Days till Halloween: {}",
        record.id,
        record.name,
        format_stored_timestamp(record.timestamp)?,
        record.value,
        record.weekday,
        record.days_till_christmas,
        record.days_till_halloween
    ))
}
