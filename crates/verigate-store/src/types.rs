//! Domain vocabulary shared by every store: statuses, data-type tags,
//! content hashes and timestamp conversion.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ring::digest;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  VerificationStatus
// ═══════════════════════════════════════════════════════════════════════

/// Lifecycle status of a verification.
///
/// `InProcess` is initial; `Completed`, `Error` and `CompanyNotFound` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    InProcess,
    Processing,
    Completed,
    Error,
    CompanyNotFound,
}

impl VerificationStatus {
    pub const ALL: [Self; 5] = [
        Self::InProcess,
        Self::Processing,
        Self::Completed,
        Self::Error,
        Self::CompanyNotFound,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProcess => "IN_PROCESS",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
            Self::CompanyNotFound => "COMPANY_NOT_FOUND",
        }
    }

    /// No further transition is expected from a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::CompanyNotFound)
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StoreError::InvalidArgument(format!("unknown verification status: {s}")))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  DataType
// ═══════════════════════════════════════════════════════════════════════

/// Kind of data a worker can deliver for a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    BasicInformation,
    Activities,
    AddressesByCredinform,
    AddressesByUnifiedStateRegister,
    AffiliatedCompanies,
    ArbitrageStatistics,
}

impl DataType {
    pub const ALL: [Self; 6] = [
        Self::BasicInformation,
        Self::Activities,
        Self::AddressesByCredinform,
        Self::AddressesByUnifiedStateRegister,
        Self::AffiliatedCompanies,
        Self::ArbitrageStatistics,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BasicInformation => "BASIC_INFORMATION",
            Self::Activities => "ACTIVITIES",
            Self::AddressesByCredinform => "ADDRESSES_BY_CREDINFORM",
            Self::AddressesByUnifiedStateRegister => "ADDRESSES_BY_UNIFIED_STATE_REGISTER",
            Self::AffiliatedCompanies => "AFFILIATED_COMPANIES",
            Self::ArbitrageStatistics => "ARBITRAGE_STATISTICS",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        Self::ALL
            .into_iter()
            .find(|data_type| data_type.as_str() == s)
            .ok_or_else(|| StoreError::InvalidArgument(format!("unknown data type: {s}")))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  ContentHash
// ═══════════════════════════════════════════════════════════════════════

/// Lowercase hex SHA-256 digest of a payload's exact bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Length of the hex digest.
    pub const HEX_LEN: usize = 64;

    /// Hash `payload` byte-for-byte. No normalisation is applied, so two
    /// JSON encodings of the same value only collide if their text matches.
    pub fn of(payload: &str) -> Self {
        let digest = digest::digest(&digest::SHA256, payload.as_bytes());
        Self(hex::encode(digest.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        let well_formed = s.len() == Self::HEX_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(StoreError::InvalidArgument(format!(
                "content hash must be {} lowercase hex characters: {s}",
                Self::HEX_LEN
            )));
        }
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for ContentHash {
    type Error = StoreError;

    fn try_from(value: String) -> StoreResult<Self> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Timestamps
// ═══════════════════════════════════════════════════════════════════════

/// Timestamps are persisted as microseconds since the Unix epoch.
pub(crate) fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {micros}")))
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names_parse_back() {
        for status in VerificationStatus::ALL {
            assert_eq!(status.as_str().parse::<VerificationStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<VerificationStatus>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!VerificationStatus::InProcess.is_terminal());
        assert!(!VerificationStatus::Processing.is_terminal());
        assert!(VerificationStatus::Completed.is_terminal());
        assert!(VerificationStatus::Error.is_terminal());
        assert!(VerificationStatus::CompanyNotFound.is_terminal());
    }

    #[test]
    fn serde_matches_wire_names() {
        let json = serde_json::to_string(&DataType::AddressesByUnifiedStateRegister).unwrap();
        assert_eq!(json, "\"ADDRESSES_BY_UNIFIED_STATE_REGISTER\"");
        let status: VerificationStatus = serde_json::from_str("\"COMPANY_NOT_FOUND\"").unwrap();
        assert_eq!(status, VerificationStatus::CompanyNotFound);
    }

    #[test]
    fn hash_is_sha256_hex() {
        // sha256("hello")
        assert_eq!(
            ContentHash::of("hello").as_str(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn hash_is_byte_exact() {
        let compact = ContentHash::of(r#"{"name":"Acme"}"#);
        let spaced = ContentHash::of(r#"{"name": "Acme"}"#);
        assert_ne!(compact, spaced);
        assert_eq!(compact, ContentHash::of(r#"{"name":"Acme"}"#));
    }

    #[test]
    fn hash_parse_validates_shape() {
        let hash = ContentHash::of("x");
        assert_eq!(hash.as_str().parse::<ContentHash>().unwrap(), hash);
        assert!("abc".parse::<ContentHash>().is_err());
        assert!(hash.as_str().to_uppercase().parse::<ContentHash>().is_err());
    }

    #[test]
    fn micros_round_trip() {
        let now = Utc::now();
        let back = from_micros(to_micros(now)).unwrap();
        assert_eq!(back.timestamp_micros(), now.timestamp_micros());
        assert!(from_micros(i64::MAX).is_err());
    }
}
