//! Versioned schema for the verification tables.
//!
//! Each step is a static SQL batch. Steps already recorded in
//! `_migrations` are skipped, so [`run_all`] is safe to call on every
//! start-up.

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::types::to_micros;

struct Migration {
    version: u32,
    description: &'static str,
    /// One or more `;`-separated statements.
    sql: &'static str,
}

/// Ordered by version; only ever append.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "verifications and their content-addressed data",
        sql: r#"
            CREATE TABLE verifications (
                id              TEXT PRIMARY KEY,
                subject_id      TEXT NOT NULL,
                status          TEXT NOT NULL CHECK(status IN ('IN_PROCESS','PROCESSING','COMPLETED','ERROR','COMPANY_NOT_FOUND')),
                author          TEXT NOT NULL,
                requested_types TEXT NOT NULL,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL
            );
            CREATE INDEX idx_verifications_created ON verifications(created_at);

            CREATE TABLE verification_data_cache (
                id           TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL UNIQUE,
                payload      TEXT NOT NULL,
                created_at   INTEGER NOT NULL
            );

            CREATE TABLE verification_data (
                id              TEXT PRIMARY KEY,
                verification_id TEXT NOT NULL REFERENCES verifications(id) ON DELETE CASCADE,
                data_type       TEXT NOT NULL CHECK(data_type IN ('BASIC_INFORMATION','ACTIVITIES','ADDRESSES_BY_CREDINFORM','ADDRESSES_BY_UNIFIED_STATE_REGISTER','AFFILIATED_COMPANIES','ARBITRAGE_STATISTICS')),
                content_hash    TEXT NOT NULL,
                created_at      INTEGER NOT NULL,
                UNIQUE(verification_id, data_type)
            );
            CREATE INDEX idx_verification_data_verification ON verification_data(verification_id);
        "#,
    },
    Migration {
        version: 2,
        description: "index cache references for orphan scans",
        sql: r#"
            CREATE INDEX idx_verification_data_hash ON verification_data(content_hash);
        "#,
    },
];

// ── runner ───────────────────────────────────────────────────────────

/// Bring the schema of `conn` up to [`latest_version`].
///
/// Blocking; [`Database::run_migrations`](crate::Database::run_migrations)
/// calls it on the blocking pool.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("cannot create bookkeeping table: {e}"),
    })?;

    let from = current_version(conn)?;
    let mut applied = 0usize;
    for migration in MIGRATIONS.iter().skip_while(|m| m.version <= from) {
        migration.apply(conn)?;
        applied += 1;
    }

    if applied == 0 {
        debug!(version = from, "schema already current");
    } else {
        info!(from, to = latest_version(), applied, "schema migrated");
    }
    Ok(())
}

/// Highest applied version; 0 when the database was never migrated.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    let tracked: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = '_migrations')",
            [],
            |row| row.get(0),
        )
        .map_err(version_error)?;
    if !tracked {
        return Ok(0);
    }
    conn.query_row("SELECT IFNULL(MAX(version), 0) FROM _migrations", [], |row| {
        row.get(0)
    })
    .map_err(version_error)
}

/// Highest version known to this build.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

fn version_error(e: rusqlite::Error) -> StoreError {
    StoreError::Migration {
        version: 0,
        message: format!("cannot read schema version: {e}"),
    }
}

impl Migration {
    /// Run this migration and record it, all or nothing.
    fn apply(&self, conn: &Connection) -> StoreResult<()> {
        let failed = |step: &str, e: rusqlite::Error| StoreError::Migration {
            version: self.version,
            message: format!("{step}: {e}"),
        };

        // A plain &Connection cannot open a rusqlite Transaction.
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| failed("begin", e))?;

        let outcome = conn
            .execute_batch(self.sql)
            .map_err(|e| failed("schema change", e))
            .and_then(|()| {
                conn.execute(
                    "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![self.version, self.description, to_micros(Utc::now())],
                )
                .map_err(|e| failed("bookkeeping", e))
            });

        if let Err(err) = outcome {
            warn!(version = self.version, error = %err, "rolling back schema migration");
            if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                warn!(version = self.version, error = %rollback, "rollback failed");
            }
            return Err(err);
        }

        conn.execute_batch("COMMIT").map_err(|e| failed("commit", e))?;
        info!(version = self.version, name = self.description, "schema migration applied");
        Ok(())
    }
}

// ── tests ────────────────────────────────────────────────────────────
