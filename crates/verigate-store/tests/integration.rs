//! Integration tests for the verigate-store crate.
//!
//! These run the full lifecycle (migrations, verifications, content cache
//! and data index) against a real SQLite file in a temp directory.

use verigate_store::{
    ContentCache, ContentHash, DataIndex, DataType, Database, NewVerification, VerificationStatus,
    VerificationStore,
};

async fn open(dir: &tempfile::TempDir) -> Database {
    Database::open_and_migrate(dir.path().join("verigate.db"))
        .await
        .unwrap()
}

fn request(subject_id: &str) -> NewVerification {
    NewVerification::new(
        subject_id,
        "analyst@example.com",
        vec![DataType::BasicInformation, DataType::Activities],
    )
}

// ═══════════════════════════════════════════════════════════════════════
//  Database lifecycle
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn database_open_and_migrate_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir).await;

    assert_eq!(
        db.schema_version().await.unwrap(),
        verigate_store::migration::latest_version()
    );
    assert_eq!(VerificationStore::new(db).count().await.unwrap(), 0);
    assert!(dir.path().join("verigate.db").exists());
}

#[tokio::test]
async fn data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let id = {
        let db = open(&dir).await;
        let verifications = VerificationStore::new(db.clone());
        let index = DataIndex::new(db.clone(), ContentCache::new(db));

        let v = verifications.insert(request("1234567890")).await.unwrap();
        index
            .upsert(&v.id, DataType::BasicInformation, r#"{"name":"Acme"}"#)
            .await
            .unwrap();
        verifications
            .set_status(&v.id, VerificationStatus::Completed)
            .await
            .unwrap();
        v.id
    };

    let db = open(&dir).await;
    let verifications = VerificationStore::new(db.clone());
    let index = DataIndex::new(db.clone(), ContentCache::new(db));

    let v = verifications.get(&id).await.unwrap().unwrap();
    assert_eq!(v.status, VerificationStatus::Completed);

    let listing = index.list_by_verification(&id).await.unwrap();
    assert!(listing.is_complete());
    assert_eq!(listing.items[0].payload, r#"{"name":"Acme"}"#);
}

// ═══════════════════════════════════════════════════════════════════════
//  Content addressing across verifications
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn shared_payload_is_stored_once() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir).await;
    let verifications = VerificationStore::new(db.clone());
    let cache = ContentCache::new(db.clone());
    let index = DataIndex::new(db, cache.clone());

    let payload = r#"{"okved":"62.01"}"#;
    for subject in ["1111111111", "2222222222", "333333333333"] {
        let v = verifications.insert(request(subject)).await.unwrap();
        index.upsert(&v.id, DataType::Activities, payload).await.unwrap();
    }

    assert_eq!(index.count().await.unwrap(), 3);
    assert_eq!(cache.count().await.unwrap(), 1);
    assert_eq!(
        cache.get(&ContentHash::of(payload)).await.unwrap(),
        payload
    );
    assert!(index.dangling().await.unwrap().is_empty());
}

#[tokio::test]
async fn direct_put_and_index_agree_on_hash() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir).await;
    let verifications = VerificationStore::new(db.clone());
    let cache = ContentCache::new(db.clone());
    let index = DataIndex::new(db, cache.clone());

    let hash = cache.put("[]").await.unwrap();
    let v = verifications.insert(request("1234567890")).await.unwrap();
    let record = index
        .upsert(&v.id, DataType::AffiliatedCompanies, "[]")
        .await
        .unwrap();

    assert_eq!(record.content_hash, hash);
    assert_eq!(cache.count().await.unwrap(), 1);
}
