//! Verification lifecycle coordinator.
//!
//! Creating a verification validates the request, persists an
//! `IN_PROCESS` record and publishes a [`CreateVerificationRequest`] for
//! the workers. Workers answer asynchronously: completion notices move
//! the status, data deliveries land in the data index. Inbound messages
//! that cannot be decoded or name an unknown verification are logged and
//! dropped; they never fail the consumer loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use verigate_kernel::{BusError, BusMessage, MessageBus, Subscription};
use verigate_store::{
    DataIndex, DataRecord, DataType, NewVerification, StatusChange, StoreError, Verification,
    VerificationStore,
};

use crate::ServiceConfig;
use crate::deadline::within;
use crate::error::{VerifierError, VerifierResult};
use crate::messages::{
    CompletionNotice, CreateVerificationRequest, DataDelivery, TOPIC_COMPLETED, TOPIC_CREATE,
    TOPIC_DATA,
};

/// Accepted subject-id lengths (10 for legal entities, 12 for individuals).
const SUBJECT_ID_LENGTHS: [usize; 2] = [10, 12];

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The message was applied to the store.
    Applied,
    /// The message named a verification that does not exist; dropped.
    UnknownVerification,
    /// The payload could not be decoded; dropped.
    Malformed,
    /// Applying the message failed (storage or deadline); dropped.
    Failed,
}

/// Owns the write side of the verification lifecycle.
pub struct LifecycleCoordinator {
    verifications: VerificationStore,
    index: DataIndex,
    bus: Arc<dyn MessageBus>,
    default_author: String,
    timeout: Duration,
}

impl LifecycleCoordinator {
    pub fn new(
        verifications: VerificationStore,
        index: DataIndex,
        bus: Arc<dyn MessageBus>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            verifications,
            index,
            bus,
            default_author: config.default_author.clone(),
            timeout: config.operation_timeout,
        }
    }

    /// Validate, persist and announce a new verification.
    ///
    /// A blank `author` falls back to the configured default. If the
    /// insert misses its deadline or the request cannot be published, the
    /// record is deleted again and [`VerifierError::Timeout`] or
    /// [`VerifierError::Transport`] is returned; if that delete fails too
    /// the result is [`VerifierError::Inconsistent`].
    #[instrument(skip(self, requested_types, author), fields(types = requested_types.len()))]
    pub async fn create(
        &self,
        subject_id: &str,
        requested_types: &[DataType],
        author: &str,
    ) -> VerifierResult<Verification> {
        validate_request(subject_id, requested_types)?;

        let author = match author.trim() {
            "" => self.default_author.clone(),
            given => given.to_owned(),
        };
        let new = NewVerification::new(subject_id, author, requested_types.to_vec());
        let verification = self.insert(new).await?;

        let request = CreateVerificationRequest {
            verification_id: verification.id.clone(),
            subject_id: verification.subject_id.clone(),
            requested_types: verification.requested_types.clone(),
            author: verification.author.clone(),
        };

        if let Err(err) = self.announce(&request).await {
            error!(verification_id = %verification.id, error = %err, "failed to publish creation request");
            return Err(self.compensate(&verification.id, err).await);
        }

        info!(
            verification_id = %verification.id,
            subject_id = %verification.subject_id,
            "verification created"
        );
        Ok(verification)
    }

    /// Persist `new` within the operation deadline.
    ///
    /// The insert runs as its own task so that a timed-out insert is not
    /// cancelled half-way: it is awaited to the end and then deleted, the
    /// same rollback a publish failure gets.
    async fn insert(&self, new: NewVerification) -> VerifierResult<Verification> {
        let id = new.id.clone();
        let store = self.verifications.clone();
        let mut pending = tokio::spawn(async move { store.insert(new).await });

        match tokio::time::timeout(self.timeout, &mut pending).await {
            Ok(joined) => Ok(joined.map_err(StoreError::from)??),
            Err(_) => {
                let cause = VerifierError::Timeout {
                    operation: "insert verification",
                    after: self.timeout,
                };
                warn!(verification_id = %id, after = ?self.timeout, "insert deadline exceeded, waiting to roll back");
                match pending.await {
                    Ok(Ok(_)) => Err(self.compensate(&id, cause).await),
                    Ok(Err(err)) => {
                        debug!(verification_id = %id, error = %err, "late insert failed, nothing to roll back");
                        Err(cause)
                    }
                    Err(err) => {
                        error!(verification_id = %id, error = %err, "insert task failed after deadline");
                        Err(self.compensate(&id, cause).await)
                    }
                }
            }
        }
    }

    async fn announce(&self, request: &CreateVerificationRequest) -> VerifierResult<()> {
        let payload = request
            .encode()
            .map_err(|err| BusError::Transport(format!("encode creation request: {err}")))?;
        let receivers = within("publish creation request", self.timeout, self.bus.publish(TOPIC_CREATE, payload)).await?;
        if receivers == 0 {
            warn!(verification_id = %request.verification_id, topic = TOPIC_CREATE, "no worker is subscribed");
        }
        Ok(())
    }

    /// Roll back a verification whose creation request never went out.
    async fn compensate(&self, verification_id: &str, cause: VerifierError) -> VerifierError {
        match within("delete verification", self.timeout, self.verifications.delete(verification_id)).await {
            Ok(_) => {
                warn!(verification_id, cause = %cause, "rolled back verification");
                cause
            }
            Err(rollback) => {
                error!(
                    verification_id,
                    cause = %cause,
                    rollback_error = %rollback,
                    "verification persisted without a creation request"
                );
                VerifierError::Inconsistent {
                    verification_id: verification_id.to_owned(),
                    reason: format!("{cause}; rollback failed: {rollback}"),
                }
            }
        }
    }

    /// Apply a decoded completion notice. `Ok(None)` means the
    /// verification does not exist and nothing changed.
    #[instrument(skip(self, notice), fields(verification_id = %notice.verification_id, status = %notice.status))]
    pub async fn apply_completion(&self, notice: &CompletionNotice) -> VerifierResult<Option<StatusChange>> {
        let change = within(
            "update status",
            self.timeout,
            self.verifications.set_status(&notice.verification_id, notice.status),
        )
        .await?;

        let Some(change) = change else {
            warn!("completion notice for unknown verification dropped");
            return Ok(None);
        };

        if change.previous.is_terminal() && change.previous != change.current {
            warn!(previous = %change.previous, "terminal status overwritten by a later notice");
        }
        if let Some(detail) = &notice.error {
            warn!(detail = %detail, "worker reported an error");
        }
        info!(previous = %change.previous, "verification status applied");
        Ok(Some(change))
    }

    /// Apply a decoded data delivery. `Ok(None)` means the verification
    /// does not exist and nothing was stored.
    #[instrument(skip(self, delivery), fields(verification_id = %delivery.verification_id, data_type = %delivery.data_type))]
    pub async fn apply_data(&self, delivery: &DataDelivery) -> VerifierResult<Option<DataRecord>> {
        let upsert = self
            .index
            .upsert(&delivery.verification_id, delivery.data_type, delivery.payload());
        match within("store data", self.timeout, upsert).await {
            Ok(record) => {
                info!(hash = %record.content_hash, "verification data stored");
                Ok(Some(record))
            }
            Err(err) if err.is_not_found() => {
                warn!("data delivery for unknown verification dropped");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Decode and apply one completion notice, never failing.
    pub async fn handle_completion(&self, bytes: &[u8]) -> Delivery {
        let notice = match CompletionNotice::decode(bytes) {
            Ok(notice) => notice,
            Err(err) => {
                warn!(error = %err, len = bytes.len(), "dropping undecodable completion notice");
                return Delivery::Malformed;
            }
        };
        match self.apply_completion(&notice).await {
            Ok(Some(_)) => Delivery::Applied,
            Ok(None) => Delivery::UnknownVerification,
            Err(err) => {
                error!(verification_id = %notice.verification_id, error = %err, "failed to apply completion notice");
                Delivery::Failed
            }
        }
    }

    /// Decode and apply one data delivery, never failing.
    pub async fn handle_data(&self, bytes: &[u8]) -> Delivery {
        let delivery = match DataDelivery::decode(bytes) {
            Ok(delivery) => delivery,
            Err(err) => {
                warn!(error = %err, len = bytes.len(), "dropping undecodable data delivery");
                return Delivery::Malformed;
            }
        };
        match self.apply_data(&delivery).await {
            Ok(Some(_)) => Delivery::Applied,
            Ok(None) => Delivery::UnknownVerification,
            Err(err) => {
                error!(verification_id = %delivery.verification_id, error = %err, "failed to store verification data");
                Delivery::Failed
            }
        }
    }

    /// Subscribe to both inbound topics and process every message on its
    /// own task. The consumers stop once the bus is closed, after the
    /// messages already received have been handled.
    pub fn spawn_consumers(self: &Arc<Self>) -> VerifierResult<Consumers> {
        let completions = self.bus.subscribe(TOPIC_COMPLETED)?;
        let deliveries = self.bus.subscribe(TOPIC_DATA)?;

        let this = Arc::clone(self);
        let completion_task = tokio::spawn(consume(completions, move |message| {
            let this = Arc::clone(&this);
            async move {
                this.handle_completion(&message.payload).await;
            }
        }));

        let this = Arc::clone(self);
        let data_task = tokio::spawn(consume(deliveries, move |message| {
            let this = Arc::clone(&this);
            async move {
                this.handle_data(&message.payload).await;
            }
        }));

        info!(topics = ?[TOPIC_COMPLETED, TOPIC_DATA], "verification consumers started");
        Ok(Consumers {
            tasks: vec![completion_task, data_task],
        })
    }
}

/// Handles of the running consumer loops.
#[derive(Debug)]
pub struct Consumers {
    tasks: Vec<JoinHandle<()>>,
}

impl Consumers {
    /// Wait until every consumer has drained and stopped.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                error!(error = %err, "consumer task failed");
            }
        }
    }

    /// Stop the consumers without waiting for in-flight messages.
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn consume<F, Fut>(mut subscription: Subscription, handler: F)
where
    F: Fn(Arc<BusMessage>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut in_flight = JoinSet::new();
    while let Some(message) = subscription.next().await {
        debug!(topic = subscription.topic(), message_id = %message.id, "message received");
        in_flight.spawn(handler(message));
        while in_flight.try_join_next().is_some() {}
    }
    while in_flight.join_next().await.is_some() {}
    debug!(topic = subscription.topic(), "consumer stopped");
}

/// Check a creation request before anything is persisted.
pub fn validate_request(subject_id: &str, requested_types: &[DataType]) -> VerifierResult<()> {
    if subject_id.is_empty() {
        return Err(VerifierError::InvalidArgument("subject id cannot be empty".into()));
    }
    if requested_types.is_empty() {
        return Err(VerifierError::InvalidArgument(
            "at least one data type must be requested".into(),
        ));
    }
    let len = subject_id.chars().count();
    if !SUBJECT_ID_LENGTHS.contains(&len) {
        return Err(VerifierError::InvalidArgument(format!(
            "subject id must be 10 or 12 digits, got {len}"
        )));
    }
    if !subject_id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VerifierError::InvalidArgument(
            "subject id must contain only digits".into(),
        ));
    }
    Ok(())
}
