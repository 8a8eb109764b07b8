//! Read-only query surface over verifications and their data.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::instrument;

use verigate_store::{DataIndex, DataListing, MissingData, ResolvedData, Verification, VerificationStore};

use crate::ServiceConfig;
use crate::deadline::within;
use crate::error::{VerifierError, VerifierResult};
use crate::fields::{DataFieldTable, TypedFields};

/// A verification with every data item resolved through the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationView {
    #[serde(flatten)]
    pub verification: Verification,
    pub data: Vec<ResolvedData>,
    /// Records whose content hash had no cache entry.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<MissingData>,
}

/// A verification with its data projected onto named fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypedVerificationView {
    #[serde(flatten)]
    pub verification: Verification,
    #[serde(flatten)]
    pub fields: TypedFields,
}

/// Queries for verifications: by ID, paginated, or as a typed view.
#[derive(Clone)]
pub struct QueryFacade {
    verifications: VerificationStore,
    index: DataIndex,
    fields: Arc<DataFieldTable>,
    timeout: Duration,
}

impl QueryFacade {
    pub fn new(
        verifications: VerificationStore,
        index: DataIndex,
        fields: Arc<DataFieldTable>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            verifications,
            index,
            fields,
            timeout: config.operation_timeout,
        }
    }

    pub fn fields(&self) -> &DataFieldTable {
        &self.fields
    }

    /// The verification and all of its resolvable data.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> VerifierResult<VerificationView> {
        let verification = self.load(id).await?;
        let listing: DataListing = within(
            "list verification data",
            self.timeout,
            self.index.list_by_verification(id),
        )
        .await?;
        Ok(VerificationView {
            verification,
            data: listing.items,
            missing: listing.missing,
        })
    }

    /// Verifications newest first. Absent bounds mean "unbounded" and
    /// "from the start"; negative bounds are rejected.
    #[instrument(skip(self))]
    pub async fn list(&self, limit: Option<i64>, offset: Option<i64>) -> VerifierResult<Vec<Verification>> {
        let limit = bound("limit", limit)?;
        let offset = bound("offset", offset)?;
        within(
            "list verifications",
            self.timeout,
            self.verifications.list(limit, offset),
        )
        .await
    }

    /// The verification with each data item placed under the field name
    /// the table maps its type to.
    #[instrument(skip(self))]
    pub async fn get_with_typed_view(&self, id: &str) -> VerifierResult<TypedVerificationView> {
        let view = self.get(id).await?;
        Ok(TypedVerificationView {
            fields: self.fields.project(&view.data),
            verification: view.verification,
        })
    }

    async fn load(&self, id: &str) -> VerifierResult<Verification> {
        if id.is_empty() {
            return Err(VerifierError::InvalidArgument(
                "verification id cannot be empty".into(),
            ));
        }
        within("get verification", self.timeout, self.verifications.get(id))
            .await?
            .ok_or_else(|| VerifierError::NotFound {
                entity: "verification",
                id: id.to_owned(),
            })
    }
}

fn bound(name: &str, value: Option<i64>) -> VerifierResult<Option<u32>> {
    value
        .map(|v| {
            if v < 0 {
                return Err(VerifierError::InvalidArgument(format!(
                    "{name} must be non-negative, got {v}"
                )));
            }
            u32::try_from(v).map_err(|_| {
                VerifierError::InvalidArgument(format!("{name} is too large, got {v}"))
            })
        })
        .transpose()
}
