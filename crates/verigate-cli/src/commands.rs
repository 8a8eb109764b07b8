//! Subcommand implementations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use verigate_kernel::{IpcBus, MessageBus};
use verigate_service::{Services, TOPIC_COMPLETED, TOPIC_DATA};
use verigate_store::{ContentCache, DataIndex, DataType, Database, VerificationStore, migration};

use crate::config::AppConfig;

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

async fn open_database(config: &AppConfig) -> Result<Database> {
    let path = config.database.path.clone();
    let db = Database::open_and_migrate(path.clone())
        .await
        .with_context(|| format!("failed to open database at {}", path.display()))?;
    info!(path = %path.display(), "store initialized");
    Ok(db)
}

async fn services(config: &AppConfig) -> Result<(Services, Arc<IpcBus>)> {
    let db = open_database(config).await?;
    let bus = Arc::new(IpcBus::with_config(config.bus.clone()));
    let services = Services::new(db, bus.clone(), &config.service());
    Ok((services, bus))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

pub async fn migrate(config: &AppConfig) -> Result<()> {
    let db = open_database(config).await?;
    let version = db.schema_version().await?;
    println!(
        "schema version {version} (latest {})",
        migration::latest_version()
    );
    Ok(())
}

pub async fn create(
    config: &AppConfig,
    subject_id: &str,
    types: &[DataType],
    author: Option<&str>,
) -> Result<()> {
    let (services, _bus) = services(config).await?;
    let verification = services
        .coordinator
        .create(subject_id, types, author.unwrap_or_default())
        .await?;
    print_json(&verification)
}

pub async fn get(config: &AppConfig, id: &str) -> Result<()> {
    let (services, _bus) = services(config).await?;
    print_json(&services.queries.get(id).await?)
}

pub async fn list(config: &AppConfig, limit: Option<i64>, offset: Option<i64>) -> Result<()> {
    let (services, _bus) = services(config).await?;
    print_json(&services.queries.list(limit, offset).await?)
}

pub async fn show(config: &AppConfig, id: &str) -> Result<()> {
    let (services, _bus) = services(config).await?;
    print_json(&services.queries.get_with_typed_view(id).await?)
}

/// One line of `ingest` input.
#[derive(Debug, Deserialize)]
struct Envelope {
    topic: String,
    message: Box<RawValue>,
}

#[derive(Debug, Default, Serialize)]
struct IngestSummary {
    published: u64,
    skipped: u64,
}

pub async fn ingest(config: &AppConfig) -> Result<()> {
    let (services, bus) = services(config).await?;
    let consumers = services.coordinator.spawn_consumers()?;

    let mut summary = IngestSummary::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let envelope: Envelope = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(line = line_no, error = %err, "skipping malformed envelope");
                summary.skipped += 1;
                continue;
            }
        };
        if envelope.topic != TOPIC_COMPLETED && envelope.topic != TOPIC_DATA {
            warn!(line = line_no, topic = %envelope.topic, "skipping envelope for a topic nobody consumes");
            summary.skipped += 1;
            continue;
        }

        let payload = envelope.message.get().as_bytes().to_vec();
        if let Err(err) = bus.publish(&envelope.topic, payload).await {
            warn!(line = line_no, error = %err, "failed to publish envelope");
            summary.skipped += 1;
            continue;
        }
        summary.published += 1;

        // Keep well inside the channel capacity so consumers never lag.
        while bus.backlog(&envelope.topic) >= bus.capacity() / 2 + 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    bus.close();
    consumers.join().await;
    info!(published = summary.published, skipped = summary.skipped, "ingest finished");
    print_json(&summary)
}

#[derive(Debug, Serialize)]
struct Stats {
    schema_version: u32,
    verifications: i64,
    data_records: i64,
    cache_entries: i64,
    dangling_records: usize,
}

pub async fn stats(config: &AppConfig) -> Result<()> {
    let db = open_database(config).await?;
    let verifications = VerificationStore::new(db.clone());
    let cache = ContentCache::new(db.clone());
    let index = DataIndex::new(db.clone(), cache.clone());

    let stats = Stats {
        schema_version: db.schema_version().await?,
        verifications: verifications.count().await?,
        data_records: index.count().await?,
        cache_entries: cache.count().await?,
        dangling_records: index.dangling().await?.len(),
    };
    print_json(&stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_keeps_message_text() {
        let line = r#"{"topic":"verification.data","message":{"verification_id":"v","data_type":"ACTIVITIES","data":[ 1 ]}}"#;
        let envelope: Envelope = serde_json::from_str(line).unwrap();
        assert_eq!(envelope.topic, TOPIC_DATA);
        assert_eq!(
            envelope.message.get(),
            r#"{"verification_id":"v","data_type":"ACTIVITIES","data":[ 1 ]}"#
        );
    }

    #[tokio::test]
    async fn stats_on_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.database.path = dir.path().join("stats.db");

        stats(&config).await.unwrap();

        let db = Database::open_and_migrate(config.database.path.clone()).await.unwrap();
        assert_eq!(db.schema_version().await.unwrap(), migration::latest_version());
    }
}
