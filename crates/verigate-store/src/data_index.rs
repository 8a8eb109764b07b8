//! Per-verification typed data index.
//!
//! Each `verification_data` row points from a (verification, data type)
//! pair to a content hash in the [`ContentCache`]. There is at most one
//! row per pair: a second upsert replaces the hash in place.
//!
//! An upsert writes the cache entry and the index row in the same
//! transaction, so no reader can see a row whose hash is not yet
//! committed.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::content_cache::{ContentCache, insert_if_absent};
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::types::{ContentHash, DataType, from_micros, to_micros};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A typed pointer from a verification to a cached payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataRecord {
    pub id: String,
    pub verification_id: String,
    pub data_type: DataType,
    pub content_hash: ContentHash,
    pub created_at: DateTime<Utc>,
}

/// A data record with its payload dereferenced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedData {
    pub data_type: DataType,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// A record whose hash has no cache entry.
///
/// `content_hash` is the text stored in the index, which need not be a
/// well-formed hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingData {
    pub data_type: DataType,
    pub content_hash: String,
}

/// An index row, from any verification, that no cache entry backs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DanglingRecord {
    pub id: String,
    pub verification_id: String,
    pub data_type: DataType,
    pub content_hash: String,
}

/// Outcome of [`DataIndex::list_by_verification`].
///
/// `missing` is non-empty when the index references hashes the cache
/// cannot resolve; those items are skipped rather than failing the list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataListing {
    pub items: Vec<ResolvedData>,
    pub missing: Vec<MissingData>,
}

impl DataListing {
    /// `true` when every record resolved.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  DataIndex
// ═══════════════════════════════════════════════════════════════════════

/// Upsert and resolve per-verification data records.
#[derive(Clone)]
pub struct DataIndex {
    db: Database,
    cache: ContentCache,
}

impl DataIndex {
    /// Build an index sharing `cache` (and its hot layer).
    pub fn new(db: Database, cache: ContentCache) -> Self {
        Self { db, cache }
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Store `payload` and point (`verification_id`, `data_type`) at it.
    ///
    /// Inserts or replaces; the last committed upsert wins. Fails with
    /// [`StoreError::NotFound`] if the verification does not exist.
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub async fn upsert(
        &self,
        verification_id: &str,
        data_type: DataType,
        payload: &str,
    ) -> StoreResult<DataRecord> {
        let hash = ContentHash::of(payload);
        let verification_id = verification_id.to_owned();
        let owned_payload = payload.to_owned();
        let key = hash.clone();

        let record = self
            .db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let now = Utc::now();

                let exists: Option<i64> = tx
                    .query_row(
                        "SELECT 1 FROM verifications WHERE id = ?1",
                        [verification_id.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_none() {
                    return Err(StoreError::NotFound {
                        entity: "verification",
                        id: verification_id,
                    });
                }

                insert_if_absent(&tx, &key, &owned_payload, now)?;
                tx.execute(
                    "INSERT INTO verification_data (id, verification_id, data_type, content_hash, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5) \
                     ON CONFLICT(verification_id, data_type) DO UPDATE SET content_hash = excluded.content_hash",
                    rusqlite::params![
                        Uuid::now_v7().to_string(),
                        verification_id,
                        data_type.as_str(),
                        key.as_str(),
                        to_micros(now)
                    ],
                )?;
                let record = select_record(&tx, &verification_id, data_type)?.ok_or_else(|| {
                    StoreError::Corrupt(format!(
                        "data record for {verification_id}/{data_type} vanished after upsert"
                    ))
                })?;

                tx.commit()?;
                Ok(record)
            })
            .await?;

        self.cache.remember(&hash, payload).await;
        debug!(
            verification_id = %record.verification_id,
            data_type = %data_type,
            hash = %hash,
            "data record upserted"
        );
        Ok(record)
    }

    /// The raw record for one (verification, type) pair, if any.
    #[instrument(skip(self))]
    pub async fn record(
        &self,
        verification_id: &str,
        data_type: DataType,
    ) -> StoreResult<Option<DataRecord>> {
        let verification_id = verification_id.to_owned();
        self.db
            .execute(move |conn| select_record(conn, &verification_id, data_type))
            .await
    }

    /// All raw records of a verification, oldest first.
    ///
    /// Fails with [`StoreError::Corrupt`] if any row holds a malformed hash;
    /// [`list_by_verification`](Self::list_by_verification) tolerates those.
    #[instrument(skip(self))]
    pub async fn records(&self, verification_id: &str) -> StoreResult<Vec<DataRecord>> {
        self.rows(verification_id)
            .await?
            .into_iter()
            .map(RecordRow::into_record)
            .collect()
    }

    /// Resolve every record of a verification through the cache, oldest
    /// first.
    ///
    /// A record whose hash is malformed or missing from the cache is
    /// logged, listed in [`DataListing::missing`] and skipped; any other
    /// failure aborts.
    #[instrument(skip(self))]
    pub async fn list_by_verification(&self, verification_id: &str) -> StoreResult<DataListing> {
        let mut listing = DataListing::default();

        for row in self.rows(verification_id).await? {
            let data_type = row.data_type()?;
            let created_at = from_micros(row.created_at)?;

            let hash = match row.content_hash.parse::<ContentHash>() {
                Ok(hash) => hash,
                Err(_) => {
                    error!(
                        verification_id,
                        data_type = %data_type,
                        hash = %row.content_hash,
                        "data record holds a malformed content hash, skipping"
                    );
                    listing.missing.push(MissingData {
                        data_type,
                        content_hash: row.content_hash,
                    });
                    continue;
                }
            };

            match self.cache.get(&hash).await {
                Ok(payload) => listing.items.push(ResolvedData {
                    data_type,
                    payload,
                    created_at,
                }),
                Err(err) if err.is_not_found() => {
                    error!(
                        verification_id,
                        data_type = %data_type,
                        hash = %hash,
                        "data record references a missing cache entry, skipping"
                    );
                    listing.missing.push(MissingData {
                        data_type,
                        content_hash: row.content_hash,
                    });
                }
                Err(err) => return Err(err),
            }
        }

        Ok(listing)
    }

    /// Every record, across all verifications, whose hash has no cache
    /// entry. Malformed hashes never match one, so they are included.
    #[instrument(skip(self))]
    pub async fn dangling(&self) -> StoreResult<Vec<DanglingRecord>> {
        let rows = self
            .db
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT d.id, d.verification_id, d.data_type, d.content_hash, d.created_at \
                     FROM verification_data d \
                     LEFT JOIN verification_data_cache c ON c.content_hash = d.content_hash \
                     WHERE c.id IS NULL \
                     ORDER BY d.created_at ASC",
                )?;
                let rows = stmt
                    .query_map([], RecordRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(DanglingRecord {
                    data_type: row.data_type()?,
                    id: row.id,
                    verification_id: row.verification_id,
                    content_hash: row.content_hash,
                })
            })
            .collect()
    }

    async fn rows(&self, verification_id: &str) -> StoreResult<Vec<RecordRow>> {
        let verification_id = verification_id.to_owned();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{SELECT_COLUMNS} WHERE verification_id = ?1 ORDER BY created_at ASC, rowid ASC"
                ))?;
                let rows = stmt
                    .query_map([verification_id.as_str()], RecordRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| {
                Ok(conn.query_row("SELECT count(*) FROM verification_data", [], |row| row.get(0))?)
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal helpers
// ═══════════════════════════════════════════════════════════════════════

const SELECT_COLUMNS: &str =
    "SELECT id, verification_id, data_type, content_hash, created_at FROM verification_data";

fn select_record(
    conn: &Connection,
    verification_id: &str,
    data_type: DataType,
) -> StoreResult<Option<DataRecord>> {
    conn.query_row(
        &format!("{SELECT_COLUMNS} WHERE verification_id = ?1 AND data_type = ?2"),
        [verification_id, data_type.as_str()],
        RecordRow::from_row,
    )
    .optional()?
    .map(RecordRow::into_record)
    .transpose()
}

struct RecordRow {
    id: String,
    verification_id: String,
    data_type: String,
    content_hash: String,
    created_at: i64,
}

impl RecordRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            verification_id: row.get(1)?,
            data_type: row.get(2)?,
            content_hash: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn corrupt(&self, what: &str) -> StoreError {
        StoreError::Corrupt(format!("data record {}: {what}", self.id))
    }

    fn data_type(&self) -> StoreResult<DataType> {
        self.data_type.parse().map_err(|_| self.corrupt("data type"))
    }

    fn into_record(self) -> StoreResult<DataRecord> {
        let data_type = self.data_type()?;
        let content_hash: ContentHash = self
            .content_hash
            .parse()
            .map_err(|_| self.corrupt("content hash"))?;
        Ok(DataRecord {
            data_type,
            content_hash,
            created_at: from_micros(self.created_at)?,
            id: self.id,
            verification_id: self.verification_id,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────
