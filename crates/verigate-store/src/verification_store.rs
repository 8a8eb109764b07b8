//! Verification record persistence.
//!
//! A verification row holds the subject being checked, who asked, which
//! data types were requested and where the job currently is in its
//! lifecycle. Only the status (and `updated_at`) ever changes after insert.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::types::{DataType, VerificationStatus, from_micros, to_micros};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A persisted verification job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    /// Unique identifier (UUID v7), never reused.
    pub id: String,
    /// Tax / registration number of the entity being verified.
    pub subject_id: String,
    pub status: VerificationStatus,
    /// Identity of whoever requested the verification.
    pub author: String,
    /// Requested data types, de-duplicated and in canonical order.
    pub requested_types: Vec<DataType>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`VerificationStore::insert`].
///
/// The id is chosen by the caller so that a caller who loses track of an
/// insert (a deadline, say) can still find and delete it.
#[derive(Debug, Clone)]
pub struct NewVerification {
    pub id: String,
    pub subject_id: String,
    pub author: String,
    pub requested_types: Vec<DataType>,
}

impl NewVerification {
    /// A request under a fresh UUID v7 id.
    pub fn new(
        subject_id: impl Into<String>,
        author: impl Into<String>,
        requested_types: Vec<DataType>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            subject_id: subject_id.into(),
            author: author.into(),
            requested_types,
        }
    }
}

/// Result of [`VerificationStore::set_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub previous: VerificationStatus,
    pub current: VerificationStatus,
}

// ═══════════════════════════════════════════════════════════════════════
//  VerificationStore
// ═══════════════════════════════════════════════════════════════════════

/// CRUD on the `verifications` table.
#[derive(Clone)]
pub struct VerificationStore {
    db: Database,
}

impl VerificationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new verification with status `IN_PROCESS`.
    ///
    /// Stamps both timestamps with now. The requested types must be
    /// non-empty; duplicates are collapsed. An id that is already taken
    /// fails with the underlying constraint error.
    #[instrument(skip(self, new), fields(id = %new.id, subject_id = %new.subject_id))]
    pub async fn insert(&self, new: NewVerification) -> StoreResult<Verification> {
        let mut requested_types = new.requested_types;
        requested_types.sort_unstable();
        requested_types.dedup();
        if requested_types.is_empty() {
            return Err(StoreError::InvalidArgument(
                "at least one data type must be requested".into(),
            ));
        }
        if new.id.trim().is_empty() {
            return Err(StoreError::InvalidArgument("verification id cannot be empty".into()));
        }

        // Truncate to the persisted precision so the returned record
        // matches what a later read yields.
        let now = from_micros(to_micros(Utc::now()))?;
        let verification = Verification {
            id: new.id,
            subject_id: new.subject_id,
            status: VerificationStatus::InProcess,
            author: new.author,
            requested_types,
            created_at: now,
            updated_at: now,
        };

        let row = verification.clone();
        let types_json = serde_json::to_string(&row.requested_types)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO verifications (id, subject_id, status, author, requested_types, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                    rusqlite::params![
                        row.id,
                        row.subject_id,
                        row.status.as_str(),
                        row.author,
                        types_json,
                        to_micros(row.created_at)
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(verification_id = %verification.id, "verification inserted");
        Ok(verification)
    }

    /// Fetch a verification by ID, `None` if it does not exist.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<Verification>> {
        let id = id.to_owned();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                    [id.as_str()],
                    VerificationRow::from_row,
                )
                .optional()?
                .map(VerificationRow::into_verification)
                .transpose()
            })
            .await
    }

    /// List verifications, newest first.
    ///
    /// `None` for either bound means "no bound": no limit, or start at the
    /// first row.
    #[instrument(skip(self))]
    pub async fn list(&self, limit: Option<u32>, offset: Option<u32>) -> StoreResult<Vec<Verification>> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map(i64::from).unwrap_or(-1);
        let offset = offset.map(i64::from).unwrap_or(0);
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{SELECT_COLUMNS} ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![limit, offset], VerificationRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter()
                    .map(VerificationRow::into_verification)
                    .collect()
            })
            .await
    }

    /// Overwrite the status of a verification.
    ///
    /// Returns `None` when no verification has this ID. No ordering guard
    /// is applied: whichever write commits last wins.
    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        id: &str,
        status: VerificationStatus,
    ) -> StoreResult<Option<StatusChange>> {
        let id = id.to_owned();
        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let change = apply_status(&tx, &id, status, Utc::now())?;
                tx.commit()?;
                Ok(change)
            })
            .await
    }

    /// Delete a verification (its data rows cascade). Returns `true` if a
    /// row was removed.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> StoreResult<bool> {
        let id = id.to_owned();
        self.db
            .execute(move |conn| {
                let deleted = conn.execute("DELETE FROM verifications WHERE id = ?1", [id.as_str()])?;
                Ok(deleted > 0)
            })
            .await
    }

    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| {
                Ok(conn.query_row("SELECT count(*) FROM verifications", [], |row| row.get(0))?)
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal helpers
// ═══════════════════════════════════════════════════════════════════════

const SELECT_COLUMNS: &str = "SELECT id, subject_id, status, author, requested_types, created_at, updated_at \
                              FROM verifications";

fn apply_status(
    conn: &Connection,
    id: &str,
    status: VerificationStatus,
    now: DateTime<Utc>,
) -> StoreResult<Option<StatusChange>> {
    let previous: Option<String> = conn
        .query_row("SELECT status FROM verifications WHERE id = ?1", [id], |row| {
            row.get(0)
        })
        .optional()?;
    let Some(previous) = previous else {
        return Ok(None);
    };

    conn.execute(
        "UPDATE verifications SET status = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![status.as_str(), to_micros(now), id],
    )?;

    Ok(Some(StatusChange {
        previous: previous.parse()?,
        current: status,
    }))
}

/// Raw row as read from SQLite.
struct VerificationRow {
    id: String,
    subject_id: String,
    status: String,
    author: String,
    requested_types: String,
    created_at: i64,
    updated_at: i64,
}

impl VerificationRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            subject_id: row.get(1)?,
            status: row.get(2)?,
            author: row.get(3)?,
            requested_types: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_verification(self) -> StoreResult<Verification> {
        let status: VerificationStatus = self
            .status
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("verification {}: status {}", self.id, self.status)))?;
        Ok(Verification {
            status,
            requested_types: serde_json::from_str(&self.requested_types)?,
            created_at: from_micros(self.created_at)?,
            updated_at: from_micros(self.updated_at)?,
            id: self.id,
            subject_id: self.subject_id,
            author: self.author,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────
