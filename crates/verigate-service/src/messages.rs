//! Wire messages exchanged with verification workers.
//!
//! All messages are JSON. Outbound: [`CreateVerificationRequest`] on
//! [`TOPIC_CREATE`]. Inbound: [`CompletionNotice`] on [`TOPIC_COMPLETED`]
//! and [`DataDelivery`] on [`TOPIC_DATA`].

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use verigate_store::{DataType, VerificationStatus};

/// Topic the coordinator publishes creation requests on.
pub const TOPIC_CREATE: &str = "verification.create";

/// Topic workers report final statuses on.
pub const TOPIC_COMPLETED: &str = "verification.completed";

/// Topic workers deliver data payloads on.
pub const TOPIC_DATA: &str = "verification.data";

/// Asks a worker to start fetching data for a verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateVerificationRequest {
    pub verification_id: String,
    pub subject_id: String,
    pub requested_types: Vec<DataType>,
    pub author: String,
}

/// A worker's report that a verification reached a new status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionNotice {
    pub verification_id: String,
    pub status: VerificationStatus,
    /// Free-text failure detail; logged, not persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One data payload fetched by a worker.
///
/// `data` keeps the exact JSON text as received, so the content hash is
/// computed over the worker's bytes rather than a re-serialization.
#[derive(Debug, Serialize, Deserialize)]
pub struct DataDelivery {
    pub verification_id: String,
    pub data_type: DataType,
    pub data: Box<RawValue>,
}

impl CreateVerificationRequest {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl CompletionNotice {
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl DataDelivery {
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// The payload text exactly as it appeared on the wire.
    pub fn payload(&self) -> &str {
        self.data.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_shape() {
        let request = CreateVerificationRequest {
            verification_id: "v1".into(),
            subject_id: "1234567890".into(),
            requested_types: vec![DataType::BasicInformation, DataType::Activities],
            author: "ops@example.com".into(),
        };
        let json: serde_json::Value = serde_json::from_slice(&request.encode().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "verification_id": "v1",
                "subject_id": "1234567890",
                "requested_types": ["BASIC_INFORMATION", "ACTIVITIES"],
                "author": "ops@example.com",
            })
        );
    }

    #[test]
    fn completion_error_is_optional() {
        let notice =
            CompletionNotice::decode(br#"{"verification_id":"v1","status":"COMPANY_NOT_FOUND"}"#)
                .unwrap();
        assert_eq!(notice.status, VerificationStatus::CompanyNotFound);
        assert!(notice.error.is_none());

        let notice = CompletionNotice::decode(
            br#"{"verification_id":"v1","status":"ERROR","error":"upstream 503"}"#,
        )
        .unwrap();
        assert_eq!(notice.error.as_deref(), Some("upstream 503"));
    }

    #[test]
    fn completion_rejects_unknown_status() {
        assert!(CompletionNotice::decode(br#"{"verification_id":"v1","status":"DONE"}"#).is_err());
        assert!(CompletionNotice::decode(b"not json").is_err());
    }

    #[test]
    fn data_payload_keeps_original_text() {
        let wire = br#"{"verification_id":"v1","data_type":"ACTIVITIES","data":{ "codes" : [ 62.01 ] }}"#;
        let delivery = DataDelivery::decode(wire).unwrap();
        assert_eq!(delivery.data_type, DataType::Activities);
        assert_eq!(delivery.payload(), r#"{ "codes" : [ 62.01 ] }"#);
    }

    #[test]
    fn data_requires_payload() {
        assert!(DataDelivery::decode(br#"{"verification_id":"v1","data_type":"ACTIVITIES"}"#).is_err());
    }
}
