//! Content-addressed payload store.
//!
//! Every payload delivered for a verification is stored once in
//! `verification_data_cache`, keyed by the SHA-256 of its exact text.
//! Writing the same bytes twice is a no-op that returns the same hash; the
//! unique constraint on `content_hash` is the only concurrency guard.
//!
//! Entries are immutable and never deleted here, which is what makes the
//! moka hot layer in front of reads safe without invalidation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::cache::{CacheStats, HotCache, HotCacheConfig};
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::types::{ContentHash, from_micros, to_micros};

/// A stored payload together with its metadata.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub id: String,
    pub content_hash: ContentHash,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// Put/get access to the content-addressed cache table.
#[derive(Clone)]
pub struct ContentCache {
    db: Database,
    hot: HotCache,
}

impl ContentCache {
    pub fn new(db: Database) -> Self {
        Self::with_hot_cache(db, HotCacheConfig::default())
    }

    pub fn with_hot_cache(db: Database, config: HotCacheConfig) -> Self {
        Self {
            db,
            hot: HotCache::new(config),
        }
    }

    /// Store `payload` if its hash is new and return the hash.
    ///
    /// Concurrent callers with the same payload all succeed and observe the
    /// same hash; exactly one row is written.
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub async fn put(&self, payload: &str) -> StoreResult<ContentHash> {
        let hash = ContentHash::of(payload);
        let owned = payload.to_owned();
        let key = hash.clone();

        let inserted = self
            .db
            .execute(move |conn| insert_if_absent(conn, &key, &owned, Utc::now()))
            .await?;

        debug!(hash = %hash, inserted, "content cache put");
        self.remember(&hash, payload).await;
        Ok(hash)
    }

    /// Fetch the payload stored under `hash`.
    ///
    /// A miss is [`StoreError::NotFound`]: anything that holds a hash
    /// expects the entry to exist, so a miss means an integrity fault
    /// somewhere upstream.
    #[instrument(skip(self), fields(hash = %hash))]
    pub async fn get(&self, hash: &ContentHash) -> StoreResult<String> {
        let db = self.db.clone();
        let key = hash.clone();
        let payload = self
            .hot
            .get_or_load(hash, || async move {
                let lookup = key.clone();
                let found = db
                    .execute(move |conn| select_payload(conn, &lookup))
                    .await?;
                found.map(Arc::from).ok_or_else(|| {
                    error!(hash = %key, "content hash not found in cache");
                    StoreError::NotFound {
                        entity: "cache entry",
                        id: key.to_string(),
                    }
                })
            })
            .await?;
        Ok(payload.to_string())
    }

    /// Fetch the full entry (payload plus metadata), bypassing the hot layer.
    #[instrument(skip(self), fields(hash = %hash))]
    pub async fn entry(&self, hash: &ContentHash) -> StoreResult<CacheEntry> {
        let key = hash.clone();
        self.db
            .execute(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT id, payload, created_at FROM verification_data_cache WHERE content_hash = ?1",
                        [key.as_str()],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, i64>(2)?,
                            ))
                        },
                    )
                    .optional()?;
                let (id, payload, created_at) = row.ok_or_else(|| StoreError::NotFound {
                    entity: "cache entry",
                    id: key.to_string(),
                })?;
                Ok(CacheEntry {
                    id,
                    content_hash: key,
                    payload,
                    created_at: from_micros(created_at)?,
                })
            })
            .await
    }

    /// `true` if an entry exists for `hash`.
    pub async fn contains(&self, hash: &ContentHash) -> StoreResult<bool> {
        if self.hot.get(hash).await.is_some() {
            return Ok(true);
        }
        let key = hash.clone();
        self.db
            .execute(move |conn| Ok(select_payload(conn, &key)?.is_some()))
            .await
    }

    /// Number of stored entries.
    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| {
                Ok(conn.query_row("SELECT count(*) FROM verification_data_cache", [], |row| {
                    row.get(0)
                })?)
            })
            .await
    }

    /// Hit/miss counters of the hot layer.
    pub fn stats(&self) -> &CacheStats {
        self.hot.stats()
    }

    /// Warm the hot layer with a payload known to be committed.
    pub(crate) async fn remember(&self, hash: &ContentHash, payload: &str) {
        self.hot.insert(hash.clone(), Arc::from(payload)).await;
    }
}

// ── synchronous helpers (run inside `Database::execute*`) ────────────

/// Insert a cache row unless one exists for `hash`. Returns `true` when a
/// row was written.
pub(crate) fn insert_if_absent(
    conn: &Connection,
    hash: &ContentHash,
    payload: &str,
    now: DateTime<Utc>,
) -> StoreResult<bool> {
    let written = conn.execute(
        "INSERT INTO verification_data_cache (id, content_hash, payload, created_at) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(content_hash) DO NOTHING",
        rusqlite::params![
            Uuid::now_v7().to_string(),
            hash.as_str(),
            payload,
            to_micros(now)
        ],
    )?;
    Ok(written > 0)
}

fn select_payload(conn: &Connection, hash: &ContentHash) -> StoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT payload FROM verification_data_cache WHERE content_hash = ?1",
            [hash.as_str()],
            |row| row.get(0),
        )
        .optional()?)
}

// ── tests ────────────────────────────────────────────────────────────
