use std::path::Path;

use anyhow::{anyhow, Context, Result};
use api_data_core::{format_stored_timestamp, parse_timestamp, RecordLookup, StoredRecord};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS api_data (
  id INTEGER PRIMARY KEY,
  name VARCHAR NOT NULL,
  timestamp DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
  value INTEGER NOT NULL,
  weekday VARCHAR NOT NULL,
  days_till_christmas INTEGER NOT NULL,
  days_till_halloween INTEGER NOT NULL
);
";

const API_DATA_COLUMNS: [&str; 7] =
    ["id", "name", "timestamp", "value", "weekday", "days_till_christmas", "days_till_halloween"];

const SELECT_RECORD_COLUMNS: &str =
    "id, name, timestamp, value, weekday, days_till_christmas, days_till_halloween";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

impl SqliteStore {
    /// Open a SQLite-backed record store and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping fails or an existing
    /// `api_data` table does not have the expected shape.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version == 0 {
            version = self.bootstrap_schema_version()?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn bootstrap_schema_version(&mut self) -> Result<i64> {
        if !table_exists(&self.conn, "api_data")? {
            let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration v1")?;
            tracing::info!(version = 1, "applied api_data schema migration");
            return Ok(1);
        }

        let missing = missing_api_data_columns(&self.conn)?;
        if !missing.is_empty() {
            return Err(anyhow!(
                "database schema is invalid: api_data is missing columns {}",
                missing.join(", ")
            ));
        }

        // Table created without migration bookkeeping; adopt it as v1.
        record_schema_version(&self.conn, 1)?;
        tracing::info!(version = 1, "adopted existing api_data table");
        Ok(1)
    }

    /// Count every stored record.
    ///
    /// # Errors
    /// Returns an error when the count query fails.
    pub fn count_records(&self) -> Result<u64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM api_data", [], |row| row.get::<_, i64>(0))
            .context("failed to count api_data rows")?;
        u64::try_from(count).context("api_data row count is negative")
    }

    /// Load up to `limit` records in ascending id order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn first_records(&self, limit: usize) -> Result<Vec<StoredRecord>> {
        let limit = i64::try_from(limit).context("record limit exceeds sqlite range")?;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SELECT_RECORD_COLUMNS} FROM api_data ORDER BY id ASC LIMIT ?1"
            ))
            .context("failed to prepare api_data listing")?;

        let rows = stmt.query_map(params![limit], RecordRow::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.context("failed to read api_data row")?.into_record()?);
        }
        Ok(records)
    }

    /// Load the record stored under `id`, if any.
    ///
    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_record(&self, id: i64) -> Result<Option<StoredRecord>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {SELECT_RECORD_COLUMNS} FROM api_data WHERE id = ?1"),
                params![id],
                RecordRow::from_row,
            )
            .optional()
            .with_context(|| format!("failed to load api_data row {id}"))?;
        row.map(RecordRow::into_record).transpose()
    }

    /// Persist one record in its own transaction.
    ///
    /// Nothing is written when any step fails; the transaction is rolled back.
    ///
    /// # Errors
    /// Returns an error when the insert or commit fails, including primary key
    /// conflicts.
    pub fn insert_record(&mut self, record: &StoredRecord) -> Result<()> {
        let timestamp = format_stored_timestamp(record.timestamp)
            .context("failed to format record timestamp")?;

        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute(
            "INSERT INTO api_data(
                id, name, timestamp, value, weekday, days_till_christmas, days_till_halloween
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.name,
                timestamp,
                record.value,
                record.weekday,
                record.days_till_christmas,
                record.days_till_halloween,
            ],
        )
        .with_context(|| format!("failed to insert api_data row {}", record.id))?;
        tx.commit().context("failed to commit write transaction")?;

        tracing::debug!(id = record.id, "inserted api_data row");
        Ok(())
    }
}

impl RecordLookup for SqliteStore {
    type Error = rusqlite::Error;

    fn contains_id(&self, id: i64) -> Result<bool, Self::Error> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM api_data WHERE id = ?1)",
            params![id],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(exists == 1)
    }
}

struct RecordRow {
    id: i64,
    name: String,
    timestamp: String,
    value: i64,
    weekday: String,
    days_till_christmas: i64,
    days_till_halloween: i64,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            timestamp: row.get(2)?,
            value: row.get(3)?,
            weekday: row.get(4)?,
            days_till_christmas: row.get(5)?,
            days_till_halloween: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<StoredRecord> {
        let timestamp = parse_timestamp(&self.timestamp)
            .with_context(|| format!("api_data row {} has an unreadable timestamp", self.id))?;
        Ok(StoredRecord {
            id: self.id,
            name: self.name,
            timestamp,
            value: self.value,
            weekday: self.weekday,
            days_till_christmas: self.days_till_christmas,
            days_till_halloween: self.days_till_halloween,
        })
    }
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn missing_api_data_columns(conn: &Connection) -> Result<Vec<&'static str>> {
    let mut stmt = conn
        .prepare("PRAGMA table_info(api_data)")
        .context("failed to inspect table_info for api_data")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(API_DATA_COLUMNS
        .into_iter()
        .filter(|column| !names.iter().any(|name| name.eq_ignore_ascii_case(column)))
        .collect())
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if !table_exists(conn, "api_data")? {
        return Ok((0, false));
    }

    let missing = missing_api_data_columns(conn)?;
    if missing.is_empty() {
        return Ok((1, true));
    }

    Err(anyhow!("database schema is invalid: api_data is missing columns {}", missing.join(", ")))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed to format RFC3339 timestamp")?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}
