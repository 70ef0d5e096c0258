//! Structured caption attached to every uploaded record.
//!
//! The caption is a JSON object `{name, size, type, uploaded}` that both a
//! human reading the chat and the reconciliation pass can understand. When a
//! record is listed back, the caption wins over transport-native attributes;
//! anything that does not parse into a conforming caption is ignored and the
//! caller falls back to those attributes.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Caption {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded: Option<UploadedAt>,
}

/// Older captions stored epoch milliseconds, newer ones RFC 3339.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum UploadedAt {
    Millis(i64),
    Text(String),
}

impl Caption {
    pub fn new(name: &str, size: u64, mime_type: &str, uploaded: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            size: Some(size),
            mime_type: mime_type.to_string(),
            uploaded: Some(UploadedAt::Text(uploaded.to_rfc3339())),
        }
    }

    pub fn to_json(&self) -> String {
        // A struct of strings and integers cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse a caption, returning `None` for anything missing, malformed or
    /// non-conforming (blank name or type).
    pub fn parse(text: Option<&str>) -> Option<Self> {
        let text = text?.trim();
        if !text.starts_with('{') {
            return None;
        }
        let caption: Caption = serde_json::from_str(text).ok()?;
        if caption.name.trim().is_empty() || caption.mime_type.trim().is_empty() {
            return None;
        }
        Some(caption)
    }

    pub fn uploaded_at(&self) -> Option<DateTime<Utc>> {
        match self.uploaded.as_ref()? {
            UploadedAt::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            UploadedAt::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caption_uses_type_key() {
        let when = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let json = Caption::new("a.png", 10, "image/png", when).to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "image/png");
        assert_eq!(value["name"], "a.png");
        assert_eq!(value["size"], 10);
        assert!(value["uploaded"].is_string());
    }

    #[test]
    fn test_parse_round_trip_keeps_timestamp() {
        let when = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let json = Caption::new("a.png", 10, "image/png", when).to_json();
        let parsed = Caption::parse(Some(&json)).unwrap();
        assert_eq!(parsed.uploaded_at(), Some(when));
    }

    #[test]
    fn test_parse_millis_timestamp() {
        let parsed =
            Caption::parse(Some(r#"{"name":"x.txt","type":"text/plain","uploaded":1700000000000}"#))
                .unwrap();
        assert_eq!(parsed.uploaded_at().unwrap().timestamp(), 1_700_000_000);
        assert_eq!(parsed.size, None);
    }

    #[test]
    fn test_parse_rejects_non_conforming() {
        assert!(Caption::parse(None).is_none());
        assert!(Caption::parse(Some("holiday pics")).is_none());
        assert!(Caption::parse(Some("{not json")).is_none());
        assert!(Caption::parse(Some(r#"{"name":"a"}"#)).is_none());
        assert!(Caption::parse(Some(r#"{"name":" ","type":"image/png"}"#)).is_none());
        assert!(Caption::parse(Some(r#"{"name":"a","type":"image/png","size":"big"}"#)).is_none());
    }
}
