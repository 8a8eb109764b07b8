//! # verigate-store
//!
//! Storage engine for verigate.
//!
//! Persists verification jobs and the data workers deliver for them in
//! SQLite (WAL mode). Payloads are content-addressed: each distinct text is
//! stored once under its SHA-256 and referenced from a per-verification,
//! per-type index.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  VerificationStore  (verifications)         │
//! │  DataIndex          (verification_data)     │
//! │        │ references by hash                 │
//! │        ▼                                    │
//! │  ContentCache  (verification_data_cache)    │
//! │    └─ HotCache (moka hot reads)             │
//! ├─────────────────────────────────────────────┤
//! │  Database (rusqlite WAL, blocking pool)     │
//! │  Migrations (versioned, transactional)      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use verigate_store::{ContentCache, DataIndex, Database, DataType, VerificationStore};
//!
//! let db = Database::open_and_migrate("data/verigate.db").await?;
//! let verifications = VerificationStore::new(db.clone());
//! let index = DataIndex::new(db.clone(), ContentCache::new(db));
//! index.upsert(&id, DataType::BasicInformation, r#"{"name":"Acme"}"#).await?;
//! ```

pub mod cache;
pub mod content_cache;
pub mod data_index;
pub mod db;
pub mod error;
pub mod migration;
pub mod types;
pub mod verification_store;

// ── re-exports ───────────────────────────────────────────────────────

pub use cache::{CacheStats, HotCache, HotCacheConfig};
pub use content_cache::{CacheEntry, ContentCache};
pub use data_index::{DanglingRecord, DataIndex, DataListing, DataRecord, MissingData, ResolvedData};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use types::{ContentHash, DataType, VerificationStatus};
pub use verification_store::{NewVerification, StatusChange, Verification, VerificationStore};
