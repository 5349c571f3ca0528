use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

pub const UNKNOWN_KIND: &str = "unknown";
pub const UNKNOWN_WIKI: &str = "unknown";
pub const MISSING_TITLE: &str = "N/A";
pub const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug, Error)]
#[error("failed to decode change event: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Upstream ids are integers for most feeds, but strings are accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventId {
    Number(Number),
    Text(String),
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventId::Number(n) => write!(f, "{n}"),
            EventId::Text(s) => f.write_str(s),
        }
    }
}

/// One change notification from the upstream feed.
///
/// Only the fields the pipeline reads are typed; everything else is kept in
/// `extra` and written back untouched. Absent fields stay absent on
/// serialization, the defaults are only applied by the accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EventId>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Decodes one raw frame. Fails if the frame is not a JSON object of the expected shape.
pub fn classify(raw: &str) -> Result<ChangeEvent, DecodeError> {
    Ok(serde_json::from_str(raw)?)
}

impl ChangeEvent {
    pub fn from_slice(raw: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// Ordering key for the log, empty when the event has no id.
    pub fn key(&self) -> String {
        self.id.as_ref().map(EventId::to_string).unwrap_or_default()
    }

    /// Classification tag, used for routing and counting.
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(UNKNOWN_KIND)
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(MISSING_TITLE)
    }

    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or(ANONYMOUS_USER)
    }

    pub fn wiki(&self) -> &str {
        self.server_name.as_deref().unwrap_or(UNKNOWN_WIKI)
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_classify_full_event() {
        let event = classify(
            r#"{"id":"123","type":"new","title":"X","user":"u","server_name":"enwiki","timestamp":1700000000}"#,
        )
        .unwrap();

        assert_eq!(event.key(), "123");
        assert_eq!(event.kind(), "new");
        assert_eq!(event.title(), "X");
        assert_eq!(event.user(), "u");
        assert_eq!(event.wiki(), "enwiki");
        assert_eq!(event.timestamp(), Some(1700000000));
        assert!(event.extra.is_empty());
    }

    #[test]
    fn test_classify_applies_defaults() {
        let event = classify(r#"{"type":"edit"}"#).unwrap();

        assert_eq!(event.key(), "");
        assert_eq!(event.kind(), "edit");
        assert_eq!(event.title(), "N/A");
        assert_eq!(event.user(), "anonymous");
        assert_eq!(event.wiki(), "unknown");
        assert_eq!(event.timestamp(), None);

        let empty = classify("{}").unwrap();
        assert_eq!(empty.kind(), "unknown");
    }

    #[test]
    fn test_null_id_is_empty_key() {
        let event = classify(r#"{"id":null,"type":"log"}"#).unwrap();
        assert_eq!(event.key(), "");
    }

    #[test]
    fn test_integer_id_is_decimal_key() {
        let event = classify(r#"{"id":1736522960,"type":"categorize"}"#).unwrap();
        assert_eq!(event.key(), "1736522960");
        assert_eq!(event.id, Some(EventId::Number(1736522960.into())));
    }

    #[test]
    fn test_unknown_fields_survive_serialization() {
        let raw = json!({
            "$schema": "/mediawiki/recentchange/1.0.0",
            "meta": {"domain": "en.wikipedia.org", "offset": 5_396_002_000_u64},
            "id": 1736522960,
            "type": "edit",
            "namespace": 0,
            "title": "Rust (programming language)",
            "bot": false,
            "length": {"old": 100, "new": 120},
            "server_name": "en.wikipedia.org",
        });

        let event = classify(&raw.to_string()).unwrap();
        assert_eq!(event.extra.get("namespace"), Some(&json!(0)));

        let reserialized = serde_json::to_value(&event).unwrap();
        assert_json_eq!(reserialized, raw);
    }

    #[test]
    fn test_defaults_are_not_serialized() {
        let event = classify(r#"{"type":"edit"}"#).unwrap();
        assert_json_eq!(serde_json::to_value(&event).unwrap(), json!({"type": "edit"}));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let raw = r#"{"id":7,"type":"new","user":"someone","extra":{"nested":[1,2,3]}}"#;
        let first = classify(raw).unwrap();
        let second = classify(raw).unwrap();
        assert_eq!(first, second);

        let reserialized = serde_json::to_string(&first).unwrap();
        assert_eq!(classify(&reserialized).unwrap(), first);
    }

    #[test]
    fn test_rejects_malformed_frames() {
        assert!(classify("not-json").is_err());
        assert!(classify("").is_err());
        assert!(classify("[1,2]").is_err());
        assert!(classify("42").is_err());
        assert!(classify(r#"{"type":5}"#).is_err());
    }

    #[test]
    fn test_from_slice() {
        let event = ChangeEvent::from_slice(br#"{"type":"log","user":"bot"}"#).unwrap();
        assert_eq!(event.kind(), "log");
        assert_eq!(event.user(), "bot");
        assert!(ChangeEvent::from_slice(b"\xff\xfe").is_err());
    }
}
