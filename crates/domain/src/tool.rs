//! Tool-call result model.
//!
//! Upstream servers return a sequence of polymorphic content blocks. The
//! wire protocol tags each block with a `type` field; anything we do not
//! recognize is preserved verbatim as [`ContentBlock::Unknown`] rather than
//! dropped, so the proxy never loses upstream data it merely doesn't
//! understand.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One content block in a tool-call result.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// Plain text.
    Text { text: String },
    /// Base64-encoded image data.
    Image { data: String, mime_type: String },
    /// An embedded resource reference.
    Resource {
        uri: String,
        text: Option<String>,
        mime_type: Option<String>,
    },
    /// Anything else — kept as the raw JSON value.
    Unknown { raw: Value },
}

impl ContentBlock {
    /// Shorthand for a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Decode a block from its wire representation.
    ///
    /// Resource blocks are accepted both in the nested wire shape
    /// (`{"type":"resource","resource":{...}}`) and in the flat shape this
    /// crate serializes.
    pub fn from_value(v: Value) -> Self {
        match v.get("type").and_then(Value::as_str) {
            Some("text") => {
                let text = v
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Self::Text { text }
            }
            Some("image") => {
                let data = v
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let mime_type = v
                    .get("mimeType")
                    .or_else(|| v.get("mime_type"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Self::Image { data, mime_type }
            }
            Some("resource") => {
                // Nested wire shape puts the fields under "resource".
                let inner = v.get("resource").unwrap_or(&v);
                let uri = inner
                    .get("uri")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let text = inner
                    .get("text")
                    .and_then(Value::as_str)
                    .map(String::from);
                let mime_type = inner
                    .get("mimeType")
                    .or_else(|| inner.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(String::from);
                Self::Resource {
                    uri,
                    text,
                    mime_type,
                }
            }
            _ => Self::Unknown { raw: v },
        }
    }

    /// Encode a block to its wire representation.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Text { text } => json!({ "type": "text", "text": text }),
            Self::Image { data, mime_type } => {
                json!({ "type": "image", "data": data, "mimeType": mime_type })
            }
            Self::Resource {
                uri,
                text,
                mime_type,
            } => {
                let mut resource = serde_json::Map::new();
                resource.insert("uri".into(), json!(uri));
                if let Some(t) = text {
                    resource.insert("text".into(), json!(t));
                }
                if let Some(m) = mime_type {
                    resource.insert("mimeType".into(), json!(m));
                }
                json!({ "type": "resource", "resource": Value::Object(resource) })
            }
            Self::Unknown { raw } => raw.clone(),
        }
    }
}

impl Serialize for ContentBlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContentBlock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = Value::deserialize(deserializer)?;
        Ok(Self::from_value(v))
    }
}

/// The result of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,

    #[serde(default, rename = "isError")]
    pub is_error: bool,

    /// Optional structured payload some servers return alongside content.
    #[serde(
        default,
        rename = "structuredContent",
        skip_serializing_if = "Option::is_none"
    )]
    pub structured: Option<Value>,
}

impl CallResult {
    /// A successful result holding a single text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: false,
            structured: None,
        }
    }

    /// An error result holding a single text block with the message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(message)],
            is_error: true,
            structured: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_block_roundtrip() {
        let block = ContentBlock::text("hello");
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"type\":\"text\""));
        let parsed: ContentBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(block, parsed);
    }

    #[test]
    fn image_block_roundtrip() {
        let block = ContentBlock::Image {
            data: "aGVsbG8=".into(),
            mime_type: "image/png".into(),
        };
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"mimeType\":\"image/png\""));
        let parsed: ContentBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(block, parsed);
    }

    #[test]
    fn resource_block_roundtrip() {
        let block = ContentBlock::Resource {
            uri: "file:///tmp/a.txt".into(),
            text: Some("contents".into()),
            mime_type: Some("text/plain".into()),
        };
        let json = serde_json::to_string(&block).unwrap();
        let parsed: ContentBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(block, parsed);
    }

    #[test]
    fn resource_block_without_optionals() {
        let block = ContentBlock::Resource {
            uri: "file:///tmp/a.txt".into(),
            text: None,
            mime_type: None,
        };
        let json = serde_json::to_string(&block).unwrap();
        assert!(!json.contains("mimeType"));
        let parsed: ContentBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(block, parsed);
    }

    #[test]
    fn unknown_block_preserves_raw_value() {
        let raw = r#"{"type":"audio","data":"...","sampleRate":44100}"#;
        let parsed: ContentBlock = serde_json::from_str(raw).unwrap();
        match &parsed {
            ContentBlock::Unknown { raw } => {
                assert_eq!(raw.get("sampleRate").unwrap(), 44100);
            }
            other => panic!("expected unknown block, got {other:?}"),
        }
        // Round-trips byte-for-byte as a value.
        let reserialized = serde_json::to_value(&parsed).unwrap();
        let original: Value = serde_json::from_str(raw).unwrap();
        assert_eq!(reserialized, original);
    }

    #[test]
    fn call_result_roundtrip() {
        let result = CallResult {
            content: vec![
                ContentBlock::text("ok"),
                ContentBlock::Image {
                    data: "Zg==".into(),
                    mime_type: "image/gif".into(),
                },
            ],
            is_error: false,
            structured: Some(serde_json::json!({ "rows": 3 })),
        };
        let json = serde_json::to_string(&result).unwrap();
        let parsed: CallResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result, parsed);
    }

    #[test]
    fn call_result_defaults() {
        let parsed: CallResult = serde_json::from_str("{}").unwrap();
        assert!(parsed.content.is_empty());
        assert!(!parsed.is_error);
        assert!(parsed.structured.is_none());
    }

    #[test]
    fn error_result_carries_message() {
        let result = CallResult::error("boom");
        assert!(result.is_error);
        assert_eq!(result.content, vec![ContentBlock::text("boom")]);
    }
}
