//! Archive data model shared by the store, the resolver and the orchestrator.
//!
//! The serialized field names are consumed by the downstream import scripts and
//! must stay stable.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where a channel lives inside its guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelScope {
    pub guild_name: String,
    pub guild_id: String,
    pub category_name: String,
    pub channel_name: String,
    pub channel_id: String,
}

/// A channel, or one of its threads when `thread_name` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationScope {
    pub channel: ChannelScope,
    pub thread_name: Option<String>,
}

impl ConversationScope {
    pub fn channel(channel: ChannelScope) -> Self {
        Self {
            channel,
            thread_name: None,
        }
    }

    pub fn thread(channel: ChannelScope, thread_name: impl Into<String>) -> Self {
        Self {
            channel,
            thread_name: Some(thread_name.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Survey,
    Asset,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Survey => "survey",
            Self::Asset => "asset",
        }
    }
}

/// An archived message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, deserialize_with = "string_or_number")]
    pub message_id: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
    /// Keys this crate does not interpret, written back unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record {
    pub fn from_message(scope: &ConversationScope, message: &SourceMessage) -> Self {
        Self {
            message_id: message.id.clone(),
            author: message.author.clone(),
            content: message.content.clone(),
            created_at: format_timestamp(&message.created_at),
            thread: scope.thread_name.clone(),
            attachments: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// A downloaded attachment. `stored_filename` never changes once assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub stored_filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub original_url: String,
    #[serde(default)]
    pub local_path: String,
}

/// A message as yielded by a [`crate::source::ChatSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMessage {
    /// Empty when the source has no stable identity for the message.
    pub id: String,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub attachments: Vec<SourceAttachment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceAttachment {
    pub id: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size: u64,
    pub url: String,
}

/// Renders a timestamp as `2024-05-01T12:30:00.123000+00:00`, dropping the
/// fraction when it is zero. Matches the layout of records archived before
/// message ids were stored, which the legacy keys depend on.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    if ts.timestamp_subsec_micros() == 0 {
        ts.to_rfc3339_opts(SecondsFormat::Secs, false)
    } else {
        ts.to_rfc3339_opts(SecondsFormat::Micros, false)
    }
}

/// Re-renders a persisted timestamp in the canonical layout. Unparseable input
/// is returned unchanged.
pub fn normalize_timestamp(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(parsed) => format_timestamp(&parsed.with_timezone(&Utc)),
        Err(_) => raw.to_string(),
    }
}

// Older archives wrote ids as JSON numbers.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_layout() {
        let whole = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(format_timestamp(&whole), "2024-05-01T12:30:00+00:00");

        let fractional = Utc.timestamp_millis_opt(1_714_566_600_123).unwrap();
        assert_eq!(
            format_timestamp(&fractional),
            "2024-05-01T12:30:00.123000+00:00"
        );
    }

    #[test]
    fn test_normalize_timestamp() {
        assert_eq!(
            normalize_timestamp("2024-05-01T12:30:00.123Z"),
            "2024-05-01T12:30:00.123000+00:00"
        );
        assert_eq!(
            normalize_timestamp("2024-05-01T21:30:00+09:00"),
            "2024-05-01T12:30:00+00:00"
        );
        assert_eq!(normalize_timestamp("yesterday"), "yesterday");
    }

    #[test]
    fn test_record_accepts_numeric_ids() {
        let raw = r#"{"message_id": 1234, "author": "a", "content": "c", "created_at": "x",
            "attachments": [{"id": 99, "file_name": "a.png", "stored_filename": "s.png",
            "content_type": null, "size": 3, "original_url": "u", "local_path": "p"}]}"#;
        let record: Record = serde_json::from_str(raw).unwrap();
        assert_eq!(record.message_id, "1234");
        assert_eq!(record.attachments[0].id, "99");
        assert!(record.thread.is_none());
    }

    #[test]
    fn test_legacy_record_without_id() {
        let record: Record =
            serde_json::from_str(r#"{"author": "a", "content": "c", "created_at": "x"}"#).unwrap();
        assert!(record.message_id.is_empty());
        assert!(record.attachments.is_empty());
    }

    #[test]
    fn test_unknown_record_keys_survive_rewrite() {
        let raw = r#"{"guild": "G", "category": "C", "channel": "c", "author": "a",
            "content": "x", "created_at": "t", "message_id": "7"}"#;
        let record: Record = serde_json::from_str(raw).unwrap();
        assert_eq!(record.message_id, "7");
        assert_eq!(record.extra.len(), 3);

        let written = serde_json::to_value(&record).unwrap();
        assert_eq!(written["guild"], "G");
        assert_eq!(written["category"], "C");
        assert_eq!(written["channel"], "c");
        assert_eq!(written["message_id"], "7");
    }
}
