//! CSRF token records and value generation

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::error::{CsrfError, Error};

/// Random bytes per token (256 bits)
pub const TOKEN_BYTES: usize = 32;

/// Shortest value accepted before a store lookup is attempted
pub const MIN_TOKEN_LENGTH: usize = 10;

/// A stored token. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Opaque token value, also the store key
    pub value: String,
    /// Issue time
    pub issued_at: DateTime<Utc>,
    /// `issued_at + ttl`
    pub expires_at: DateTime<Utc>,
    /// Session the token is bound to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl TokenRecord {
    /// Create a record with a fresh random value
    pub fn issue(issued_at: DateTime<Utc>, ttl: Duration, session: Option<String>) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = issued_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            value: generate_token_value(),
            issued_at,
            expires_at,
            session,
        }
    }

    /// `now >= expires_at`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Remaining lifetime at `now`, zero once expired
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Age of the token at `now`
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.issued_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// 256 bits from the thread-local CSPRNG, URL-safe base64 without padding
pub fn generate_token_value() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// What the issuance endpoint hands back to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    /// Token value
    pub token: String,
    /// TTL in whole seconds
    pub expires_in: u64,
}

impl From<&TokenRecord> for IssuedToken {
    fn from(record: &TokenRecord) -> Self {
        let ttl = (record.expires_at - record.issued_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        Self {
            token: record.value.clone(),
            expires_in: ttl.as_secs(),
        }
    }
}

/// `{valid, error?}` summary of a validation attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    /// Whether the token was accepted
    pub valid: bool,
    /// Rejection reason (`missing`, `malformed`, `not_found`, `expired`,
    /// `session_mismatch`, or `internal` when the store failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> From<&Result<T, CsrfError>> for Validation {
    fn from(result: &Result<T, CsrfError>) -> Self {
        match result {
            Ok(_) => Validation { valid: true, error: None },
            Err(e) => Validation {
                valid: false,
                error: Some(e.reason().to_string()),
            },
        }
    }
}

impl<T> From<&crate::core::error::Result<T>> for Validation {
    fn from(result: &crate::core::error::Result<T>) -> Self {
        match result {
            Ok(_) => Validation { valid: true, error: None },
            Err(Error::Csrf(e)) => Validation {
                valid: false,
                error: Some(e.reason().to_string()),
            },
            Err(_) => Validation {
                valid: false,
                error: Some("internal".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn values_are_long_and_url_safe() {
        let value = generate_token_value();
        assert_eq!(value.len(), 43);
        assert!(value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn values_do_not_repeat() {
        let values: HashSet<String> = (0..1000).map(|_| generate_token_value()).collect();
        assert_eq!(values.len(), 1000);
    }

    #[test]
    fn expiry_is_inclusive_at_the_boundary() {
        let now = Utc::now();
        let record = TokenRecord::issue(now, Duration::from_secs(60), None);
        assert!(!record.is_expired_at(now));
        assert!(record.is_expired_at(record.expires_at));
        assert_eq!(record.remaining_at(record.expires_at), Duration::ZERO);
    }

    #[test]
    fn issued_token_reports_ttl_in_seconds() {
        let record = TokenRecord::issue(Utc::now(), Duration::from_secs(3600), None);
        let issued = IssuedToken::from(&record);
        assert_eq!(issued.expires_in, 3600);
        assert_eq!(issued.token, record.value);

        let json = serde_json::to_value(&issued).unwrap();
        assert_eq!(json["expiresIn"], 3600);
    }

    #[test]
    fn validation_summary_carries_reason() {
        let ok: Result<(), CsrfError> = Ok(());
        assert_eq!(Validation::from(&ok), Validation { valid: true, error: None });

        let expired: Result<(), CsrfError> = Err(CsrfError::Expired);
        let summary = Validation::from(&expired);
        assert!(!summary.valid);
        assert_eq!(summary.error.as_deref(), Some("expired"));
    }
}
