//! Session record model
//!
//! One row per session id: the id, an absolute expiry (unix seconds) and an
//! opaque payload. The store never looks inside the payload.

use std::time::Duration;

use crate::{Error, Result};

/// Longest session id accepted, matching the `VARBINARY(128)` key column.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// A persisted session row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Unique session identifier
    pub id: String,
    /// Unix timestamp after which the record is stale
    pub expires_at: i64,
    /// Serialized session state
    pub payload: Vec<u8>,
}

impl SessionRecord {
    /// Create an empty record, as inserted on the first read of an unknown id
    pub fn new(id: impl Into<String>, expires_at: i64) -> Self {
        Self::with_payload(id, expires_at, Vec::new())
    }

    pub fn with_payload(id: impl Into<String>, expires_at: i64, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            expires_at,
            payload,
        }
    }

    /// A record is expired once `expires_at` lies strictly in the past.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now
    }

    /// Consume the record, yielding its payload if it is still live and an
    /// empty payload otherwise.
    pub fn into_live_payload(self, now: i64) -> Vec<u8> {
        if self.is_expired(now) {
            Vec::new()
        } else {
            self.payload
        }
    }
}

/// Compute `now + lifetime`, saturating instead of overflowing.
pub fn expiry_from(now: i64, lifetime: Duration) -> i64 {
    now.saturating_add(secs_i64(lifetime))
}

pub(crate) fn secs_i64(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

/// Check that a session id fits the key column.
pub fn validate_session_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidSessionId("session id is empty".to_string()));
    }
    if id.len() > MAX_SESSION_ID_LEN {
        return Err(Error::InvalidSessionId(format!(
            "session id is {} bytes long, the limit is {}",
            id.len(),
            MAX_SESSION_ID_LEN
        )));
    }
    if id.contains('\0') {
        return Err(Error::InvalidSessionId(
            "session id contains a NUL byte".to_string(),
        ));
    }
    Ok(())
}
