use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::SessionError;

/// Server-side session record, mirrored locally after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub user_id: String,
    #[serde(default)]
    pub device_info: String,
    #[serde(default)]
    pub ip_address: String,
    pub is_active: bool,
    #[serde(deserialize_with = "timestamp")]
    pub expires_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.time_until_expiry(now) <= Duration::zero()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        self.time_until_expiry(now).num_minutes().max(0)
    }
}

/// Accept ids sent either as JSON strings or numbers.
pub(crate) fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Num(i64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Num(n) => n.to_string(),
    })
}

/// Parse RFC 3339, or a naive ISO timestamp taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

fn timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

/// Missing, null or unreadable values become `None`.
fn optional_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

// ============================================================================
// Validation Result
// ============================================================================

/// Tri-state classification of a validation run. The caller picks its
/// remediation from this, not from individual flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    Valid,
    Expired,
    Invalid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    status: ValidationStatus,
    reason: Option<SessionError>,
    session: Option<Session>,
    expiring_soon: bool,
    invalidated: bool,
}

impl ValidationResult {
    pub(crate) fn valid(session: Session, expiring_soon: bool) -> Self {
        Self {
            status: ValidationStatus::Valid,
            reason: None,
            session: Some(session),
            expiring_soon,
            invalidated: false,
        }
    }

    pub(crate) fn expired(reason: SessionError, invalidated: bool) -> Self {
        Self {
            status: ValidationStatus::Expired,
            reason: Some(reason),
            session: None,
            expiring_soon: false,
            invalidated,
        }
    }

    pub(crate) fn invalid(reason: SessionError, invalidated: bool) -> Self {
        Self {
            status: ValidationStatus::Invalid,
            reason: Some(reason),
            session: None,
            expiring_soon: false,
            invalidated,
        }
    }

    pub(crate) fn busy() -> Self {
        Self::invalid(SessionError::ValidationBusy, false)
    }

    pub fn status(&self) -> ValidationStatus {
        self.status
    }

    pub fn is_valid(&self) -> bool {
        self.status == ValidationStatus::Valid
    }

    pub fn is_expired(&self) -> bool {
        self.status == ValidationStatus::Expired
    }

    pub fn is_invalid(&self) -> bool {
        self.status == ValidationStatus::Invalid
    }

    /// Human-readable reason, e.g. "Session not found".
    pub fn reason(&self) -> Option<String> {
        self.reason.as_ref().map(ToString::to_string)
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.reason.as_ref()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_expiring_soon(&self) -> bool {
        self.expiring_soon
    }

    /// Remediation is due: clear the credential and sign the user out,
    /// unless the result has been superseded.
    pub fn invalidated(&self) -> bool {
        self.invalidated
    }
}
