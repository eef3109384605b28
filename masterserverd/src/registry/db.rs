use std::path::Path;
use anyhow::{Context, Result};
use rusqlite::{Connection, params, OptionalExtension};
use shared::types::ServerEntry;
use chrono::{DateTime, SecondsFormat, Utc};

pub struct RegistryDb {
    conn: Connection,
}

/// Fixed-width RFC 3339 so that string order in SQLite matches time order.
fn encode_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Oldest `last_update` still considered live, or None when the window
/// reaches back past the epoch (nothing can be stale then).
fn expiry_cutoff(expire_after_secs: u64) -> Option<DateTime<Utc>> {
    let window = i64::try_from(expire_after_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)?;
    Utc::now()
        .checked_sub_signed(window)
        .filter(|cutoff| cutoff.timestamp() > 0)
}

impl RegistryDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS servers (
                address     TEXT NOT NULL,
                port        INTEGER NOT NULL,
                version     INTEGER NOT NULL,
                name        TEXT NOT NULL,
                last_update TEXT NOT NULL,
                PRIMARY KEY (address, port)
            );

            CREATE INDEX IF NOT EXISTS idx_last_update ON servers(last_update);
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Insert a server or overwrite the one registered under (address, port).
    pub fn upsert(&self, address: &str, port: u16, version: i32, name: &str) -> Result<()> {
        self.upsert_at(address, port, version, name, Utc::now())
    }

    pub(crate) fn upsert_at(
        &self,
        address: &str,
        port: u16,
        version: i32,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO servers (address, port, version, name, last_update)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(address, port) DO UPDATE SET
                version = excluded.version,
                name = excluded.name,
                last_update = excluded.last_update
            "#,
            params![address, port, version, name, encode_time(now)],
        )
        .context("Failed to upsert server")?;

        Ok(())
    }

    /// Whether this exact (address, port, version) is stored, expired or not.
    pub fn exists(&self, address: &str, port: u16, version: i32) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM servers WHERE address = ?1 AND port = ?2 AND version = ?3",
                params![address, port, version],
                |_| Ok(()),
            )
            .optional()
            .context("Failed to query server")?;

        Ok(found.is_some())
    }

    /// Delete servers not updated within the last `expire_after_secs` seconds.
    /// Returns the number of deleted rows.
    pub fn expire_older_than(&self, expire_after_secs: u64) -> Result<u64> {
        let Some(cutoff) = expiry_cutoff(expire_after_secs) else {
            return Ok(0);
        };

        let count = self.conn.execute(
            "DELETE FROM servers WHERE last_update < ?1",
            params![encode_time(cutoff)],
        )
        .context("Failed to expire servers")?;

        Ok(count as u64)
    }

    /// All stored servers, in no particular order
    pub fn scan_all(&self) -> Result<Vec<ServerEntry>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT address, port, version, name, last_update FROM servers")
            .context("Failed to prepare query")?;

        let servers = stmt
            .query_map([], Self::row_to_entry)
            .context("Failed to query servers")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect servers")?;

        Ok(servers)
    }

    /// Stored servers updated within the last `expire_after_secs` seconds,
    /// whether or not stale rows have been swept yet
    pub fn scan_live(&self, expire_after_secs: u64) -> Result<Vec<ServerEntry>> {
        let Some(cutoff) = expiry_cutoff(expire_after_secs) else {
            return self.scan_all();
        };

        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT address, port, version, name, last_update FROM servers
                 WHERE last_update >= ?1"
            )
            .context("Failed to prepare query")?;

        let servers = stmt
            .query_map(params![encode_time(cutoff)], Self::row_to_entry)
            .context("Failed to query live servers")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect servers")?;

        Ok(servers)
    }

    fn row_to_entry(row: &rusqlite::Row) -> Result<ServerEntry, rusqlite::Error> {
        let last_update_str: String = row.get(4)?;

        let last_update = DateTime::parse_from_rfc3339(&last_update_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))?
            .with_timezone(&Utc);

        Ok(ServerEntry {
            address: row.get(0)?,
            port: row.get::<_, u16>(1)?,
            version: row.get(2)?,
            name: row.get(3)?,
            last_update,
        })
    }
}
