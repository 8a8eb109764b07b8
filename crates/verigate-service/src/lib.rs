//! Verification services: the lifecycle coordinator (write side) and the
//! query façade (read side), plus the wire messages and the data-field
//! table they share.
//!
//! [`Services::new`] wires both halves onto one database and one bus.

pub mod coordinator;
mod deadline;
pub mod error;
pub mod facade;
pub mod fields;
pub mod messages;

use std::sync::Arc;
use std::time::Duration;

use verigate_kernel::MessageBus;
use verigate_store::{ContentCache, DataIndex, Database, HotCacheConfig, VerificationStore};

pub use coordinator::{Consumers, Delivery, LifecycleCoordinator, validate_request};
pub use error::{VerifierError, VerifierResult};
pub use facade::{QueryFacade, TypedVerificationView, VerificationView};
pub use fields::{DataFieldTable, TypedField, TypedFields};
pub use messages::{
    CompletionNotice, CreateVerificationRequest, DataDelivery, TOPIC_COMPLETED, TOPIC_CREATE,
    TOPIC_DATA,
};

/// Knobs shared by the coordinator and the façade.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Author recorded when a request does not name one.
    pub default_author: String,
    /// Deadline for each individual store or bus call.
    pub operation_timeout: Duration,
    pub hot_cache: HotCacheConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_author: "system@verigate.local".into(),
            operation_timeout: Duration::from_millis(10_000),
            hot_cache: HotCacheConfig::default(),
        }
    }
}

/// Coordinator and façade sharing one set of stores.
pub struct Services {
    pub coordinator: Arc<LifecycleCoordinator>,
    pub queries: QueryFacade,
}

impl Services {
    /// Wire the services onto a migrated database and a bus. The field
    /// table is the standard one.
    pub fn new(db: Database, bus: Arc<dyn MessageBus>, config: &ServiceConfig) -> Self {
        Self::with_fields(db, bus, Arc::new(DataFieldTable::standard()), config)
    }

    pub fn with_fields(
        db: Database,
        bus: Arc<dyn MessageBus>,
        fields: Arc<DataFieldTable>,
        config: &ServiceConfig,
    ) -> Self {
        let verifications = VerificationStore::new(db.clone());
        let cache = ContentCache::with_hot_cache(db.clone(), config.hot_cache);
        let index = DataIndex::new(db, cache);

        let coordinator = Arc::new(LifecycleCoordinator::new(
            verifications.clone(),
            index.clone(),
            bus,
            config,
        ));
        let queries = QueryFacade::new(verifications, index, fields, config);
        Self { coordinator, queries }
    }
}
