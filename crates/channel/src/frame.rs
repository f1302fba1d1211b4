//! Wire shapes for the duplex channel.
//!
//! Every inbound frame is a JSON object. The first frame after connecting
//! carries `connectionId`; every later frame carries one fragment of a
//! streamed reply plus the correlation fields (`action`, `message_id`) that
//! route it back to the request that caused it.

use serde::Deserialize;
use serde_json::Value;

/// Sent right after the socket opens and on every keep-alive.
pub const KEEPALIVE_FRAME: &str = r#"{"action":"default"}"#;
/// A fragment containing this marker terminates the reply.
pub const END_SENTINEL: &str = "<END>";
/// A fragment starting with this marker carries an error detail instead of text.
pub const ERROR_SENTINEL: &str = "<ERROR>";
/// Action prefix used by table (aggregation) requests.
pub const TABLE_ACTION_PREFIX: &str = "tableStore/";
/// `message_id` used by combined-text aggregation requests.
pub const COMBINE_MESSAGE_ID: &str = "combine_submissions";

/// Identifies the in-flight request a fragment belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    /// Chat reply for a message of a submission conversation.
    Chat { category: String, message_id: u64 },
    /// Recommendation ordering for a table, keyed by item fingerprint.
    Recommendation { table: String, fingerprint: u32 },
    /// Combined text of the selected rows of a table.
    CombinedText { table: String },
}

/// `message_id` exactly as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WireMessageId {
    Number(u64),
    Tag(String),
}

impl CorrelationKey {
    /// Value for the outbound `action` field.
    pub fn action(&self) -> String {
        match self {
            Self::Chat { category, .. } => category.clone(),
            Self::Recommendation { table, .. } | Self::CombinedText { table } => {
                format!("{TABLE_ACTION_PREFIX}{table}")
            }
        }
    }

    /// Value for the outbound `message_id` field.
    pub fn message_id(&self) -> Value {
        match self {
            Self::Chat { message_id, .. } => Value::from(*message_id),
            Self::Recommendation { fingerprint, .. } => Value::from(*fingerprint),
            Self::CombinedText { .. } => Value::from(COMBINE_MESSAGE_ID),
        }
    }

    /// Build a key from the inbound `action` / `message_id` pair.
    /// Returns `None` for combinations no sender produces.
    pub fn from_wire(action: &str, message_id: &WireMessageId) -> Option<Self> {
        match action.strip_prefix(TABLE_ACTION_PREFIX) {
            Some(table) if !table.is_empty() => match message_id {
                WireMessageId::Number(n) => u32::try_from(*n).ok().map(|fingerprint| {
                    Self::Recommendation { table: table.to_owned(), fingerprint }
                }),
                WireMessageId::Tag(tag) if tag == COMBINE_MESSAGE_ID => {
                    Some(Self::CombinedText { table: table.to_owned() })
                }
                WireMessageId::Tag(_) => None,
            },
            Some(_) => None,
            None => match message_id {
                WireMessageId::Number(n) if !action.is_empty() => Some(Self::Chat {
                    category: action.to_owned(),
                    message_id: *n,
                }),
                _ => None,
            },
        }
    }

    /// Category or table name this key routes to.
    pub fn owner(&self) -> &str {
        match self {
            Self::Chat { category, .. } => category,
            Self::Recommendation { table, .. } | Self::CombinedText { table } => table,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "statusCode")]
    #[allow(dead_code)]
    status_code: Option<u16>,
    #[serde(rename = "connectionId")]
    connection_id: Option<String>,
    action: Option<String>,
    message_id: Option<WireMessageId>,
    text: Option<String>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Remote side assigned this connection an id.
    Identity { connection_id: String },
    /// One fragment of a streamed reply.
    Fragment { key: CorrelationKey, text: String },
    /// Valid JSON that carries neither an identity nor a routable fragment.
    Unroutable,
}

impl Frame {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let frame: RawFrame = serde_json::from_str(raw)?;
        if let Some(id) = frame.connection_id.filter(|id| !id.is_empty()) {
            return Ok(Self::Identity { connection_id: id });
        }
        let (Some(action), Some(message_id), Some(text)) =
            (frame.action, frame.message_id, frame.text)
        else {
            return Ok(Self::Unroutable);
        };
        Ok(match CorrelationKey::from_wire(&action, &message_id) {
            Some(key) => Self::Fragment { key, text },
            None => Self::Unroutable,
        })
    }
}

/// True if the fragment terminates the reply.
pub fn is_completion(text: &str) -> bool {
    text.contains(END_SENTINEL)
}

/// Error detail if the fragment is an error report.
pub fn error_detail(text: &str) -> Option<&str> {
    text.strip_prefix(ERROR_SENTINEL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_frame() {
        let f = Frame::parse(r#"{"statusCode":200,"connectionId":"abc="}"#).unwrap();
        assert_eq!(f, Frame::Identity { connection_id: "abc=".into() });
    }

    #[test]
    fn chat_fragment() {
        let f = Frame::parse(r#"{"action":"achievement","message_id":3,"text":"Hel"}"#).unwrap();
        assert_eq!(
            f,
            Frame::Fragment {
                key: CorrelationKey::Chat { category: "achievement".into(), message_id: 3 },
                text: "Hel".into(),
            }
        );
    }

    #[test]
    fn recommendation_fragment() {
        let f = Frame::parse(
            r#"{"action":"tableStore/manager-achievement","message_id":4012345678,"text":"{"}"#,
        )
        .unwrap();
        assert_eq!(
            f,
            Frame::Fragment {
                key: CorrelationKey::Recommendation {
                    table: "manager-achievement".into(),
                    fingerprint: 4_012_345_678,
                },
                text: "{".into(),
            }
        );
    }

    #[test]
    fn combine_fragment() {
        let f = Frame::parse(
            r#"{"action":"tableStore/associate","message_id":"combine_submissions","text":"x"}"#,
        )
        .unwrap();
        assert!(matches!(
            f,
            Frame::Fragment { key: CorrelationKey::CombinedText { .. }, .. }
        ));
    }

    #[test]
    fn unknown_tag_is_unroutable() {
        let f = Frame::parse(r#"{"action":"tableStore/associate","message_id":"other","text":"x"}"#)
            .unwrap();
        assert_eq!(f, Frame::Unroutable);
        let f = Frame::parse(r#"{"action":"achievement","message_id":"7","text":"x"}"#).unwrap();
        assert_eq!(f, Frame::Unroutable);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(Frame::parse("not json").is_err());
    }

    #[test]
    fn key_wire_fields() {
        let key = CorrelationKey::Recommendation { table: "associate".into(), fingerprint: 9 };
        assert_eq!(key.action(), "tableStore/associate");
        assert_eq!(key.message_id(), Value::from(9));
        let key = CorrelationKey::CombinedText { table: "associate".into() };
        assert_eq!(key.message_id(), Value::from("combine_submissions"));
        let key = CorrelationKey::Chat { category: "challenge".into(), message_id: 2 };
        assert_eq!(key.action(), "challenge");
        assert_eq!(key.owner(), "challenge");
    }

    #[test]
    fn sentinels() {
        assert!(is_completion("<END>"));
        assert!(is_completion("tail<END>"));
        assert_eq!(error_detail("<ERROR>throttlingException"), Some("throttlingException"));
        assert_eq!(error_detail("fine"), None);
    }
}
