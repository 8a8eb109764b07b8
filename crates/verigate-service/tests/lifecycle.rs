//! End-to-end lifecycle tests against an on-disk database and the
//! in-process bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use verigate_kernel::{BusError, BusResult, IpcBus, MessageBus, Subscription};
use verigate_service::{
    CompletionNotice, CreateVerificationRequest, ServiceConfig, Services, TOPIC_COMPLETED,
    TOPIC_CREATE, TOPIC_DATA, VerifierError,
};
use verigate_store::{Database, DataType, VerificationStatus};

async fn open(dir: &tempfile::TempDir) -> Database {
    Database::open_and_migrate(dir.path().join("verigate.db")).await.unwrap()
}

/// Publishes fail; optionally drops the verifications table first so the
/// rollback fails as well.
struct BrokenBus {
    sabotage: Option<Database>,
}

#[async_trait]
impl MessageBus for BrokenBus {
    async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> BusResult<usize> {
        if let Some(db) = &self.sabotage {
            db.execute(|conn| {
                conn.execute_batch("DROP TABLE verifications")?;
                Ok(())
            })
            .await
            .unwrap();
        }
        Err(BusError::Transport("connection refused".into()))
    }

    fn subscribe(&self, _topic: &str) -> BusResult<Subscription> {
        Err(BusError::Closed)
    }
}

#[tokio::test]
async fn create_complete_and_view() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir).await;
    let bus = Arc::new(IpcBus::new(64));
    let mut outbound = bus.subscribe(TOPIC_CREATE).unwrap();
    let services = Services::new(db, bus.clone(), &ServiceConfig::default());
    let consumers = services.coordinator.spawn_consumers().unwrap();

    let created = services
        .coordinator
        .create("1234567890", &[DataType::BasicInformation], "analyst@example.com")
        .await
        .unwrap();
    assert_eq!(created.status, VerificationStatus::InProcess);

    // Play the worker: read the request, deliver data, report completion.
    let message = outbound.next().await.unwrap();
    let request: CreateVerificationRequest = serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(request.verification_id, created.id);

    let data = format!(
        r#"{{"verification_id":"{}","data_type":"BASIC_INFORMATION","data":{{"name":"Acme"}}}}"#,
        created.id
    );
    bus.publish(TOPIC_DATA, data.into_bytes()).await.unwrap();
    let notice = CompletionNotice {
        verification_id: created.id.clone(),
        status: VerificationStatus::Completed,
        error: None,
    };
    bus.publish(TOPIC_COMPLETED, notice.encode().unwrap()).await.unwrap();

    bus.close();
    consumers.join().await;

    let typed = services.queries.get_with_typed_view(&created.id).await.unwrap();
    assert_eq!(typed.verification.status, VerificationStatus::Completed);
    assert_eq!(typed.fields.get("basicInformation"), Some(r#"{"name":"Acme"}"#));
}

#[tokio::test]
async fn twelve_digit_subject_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let services = Services::new(open(&dir).await, Arc::new(IpcBus::new(8)), &ServiceConfig::default());

    let created = services
        .coordinator
        .create("123456789012", &[DataType::Activities, DataType::Activities], "")
        .await
        .unwrap();
    assert_eq!(created.requested_types, vec![DataType::Activities]);
}

#[tokio::test]
async fn unknown_verification_leaves_store_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let services = Services::new(open(&dir).await, Arc::new(IpcBus::new(8)), &ServiceConfig::default());
    let created = services
        .coordinator
        .create("1234567890", &[DataType::Activities], "a@example.com")
        .await
        .unwrap();

    let stray = CompletionNotice {
        verification_id: "00000000-0000-0000-0000-000000000000".into(),
        status: VerificationStatus::Error,
        error: None,
    };
    services.coordinator.handle_completion(&stray.encode().unwrap()).await;

    let view = services.queries.get(&created.id).await.unwrap();
    assert_eq!(view.verification, created);
    assert!(view.data.is_empty());
}

#[tokio::test]
async fn list_pages_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let services = Services::new(open(&dir).await, Arc::new(IpcBus::new(8)), &ServiceConfig::default());

    let mut ids = Vec::new();
    for subject in ["1111111111", "2222222222", "3333333333"] {
        let v = services
            .coordinator
            .create(subject, &[DataType::Activities], "a@example.com")
            .await
            .unwrap();
        ids.push(v.id);
    }

    let page = services.queries.list(Some(2), Some(0)).await.unwrap();
    assert_eq!(
        page.iter().map(|v| v.id.as_str()).collect::<Vec<_>>(),
        vec![ids[2].as_str(), ids[1].as_str()]
    );
    let rest = services.queries.list(Some(2), Some(2)).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].id, ids[0]);
}

#[tokio::test]
async fn failed_publish_leaves_no_record() {
    let dir = tempfile::tempdir().unwrap();
    let services = Services::new(
        open(&dir).await,
        Arc::new(BrokenBus { sabotage: None }),
        &ServiceConfig::default(),
    );

    let err = services
        .coordinator
        .create("1234567890", &[DataType::Activities], "a@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, VerifierError::Transport(_)));
    assert!(services.queries.list(None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_rollback_is_inconsistent() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir).await;
    let bus = Arc::new(BrokenBus {
        sabotage: Some(db.clone()),
    });
    let services = Services::new(db, bus, &ServiceConfig::default());

    let err = services
        .coordinator
        .create("1234567890", &[DataType::Activities], "a@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, VerifierError::Inconsistent { .. }), "{err}");
}

#[tokio::test]
async fn insert_past_deadline_is_rolled_back_unannounced() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir).await;
    let bus = Arc::new(IpcBus::new(8));
    let mut outbound = bus.subscribe(TOPIC_CREATE).unwrap();
    let config = ServiceConfig {
        operation_timeout: Duration::from_millis(50),
        ..ServiceConfig::default()
    };
    let services = Services::new(db.clone(), bus.clone(), &config);

    // Occupy the connection well past the deadline.
    let (held_tx, held_rx) = tokio::sync::oneshot::channel();
    let holder = tokio::spawn({
        let db = db.clone();
        async move {
            db.execute(move |_| {
                let _ = held_tx.send(());
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .await
        }
    });
    held_rx.await.unwrap();

    let err = services
        .coordinator
        .create("1234567890", &[DataType::Activities], "a@example.com")
        .await
        .unwrap_err();
    assert!(
        matches!(err, VerifierError::Timeout { operation: "insert verification", .. }),
        "{err}"
    );
    holder.await.unwrap().unwrap();

    assert!(services.queries.list(None, None).await.unwrap().is_empty());
    bus.close();
    assert!(outbound.next().await.is_none());
}
