use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::sanitize::sanitize;

/// Maximum display-name length in code points.
pub const NAME_MAX_LEN: usize = 32;
/// Maximum message body length in code points.
pub const MESSAGE_MAX_LEN: usize = 512;

/// Per-field length bounds applied by the sanitizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLimits {
    pub name: usize,
    pub message: usize,
}

impl Default for FieldLimits {
    fn default() -> Self {
        Self {
            name: NAME_MAX_LEN,
            message: MESSAGE_MAX_LEN,
        }
    }
}

/// A chat frame as sent by a client: `{"name": "...", "message": "..."}`.
///
/// Missing and `null` fields decode as empty strings. Extra fields,
/// including any client-supplied `time`, are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct IncomingMessage {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub message: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl IncomingMessage {
    /// Sanitize both fields. Returns `None` when both come out empty.
    pub fn sanitize(&self, limits: FieldLimits) -> Option<SanitizedMessage> {
        let name = sanitize(&self.name, limits.name);
        let message = sanitize(&self.message, limits.message);
        if name.is_empty() && message.is_empty() {
            return None;
        }
        Some(SanitizedMessage { name, message })
    }
}

/// Both fields have passed the sanitizer; not yet stamped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SanitizedMessage {
    pub name: String,
    pub message: String,
}

impl SanitizedMessage {
    pub fn stamp(self, time: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            name: self.name,
            message: self.message,
            time,
        }
    }
}

/// An accepted chat record, as persisted, broadcast and returned by the
/// history query. `time` serializes as RFC 3339 UTC.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub name: String,
    pub message: String,
    pub time: DateTime<Utc>,
}
