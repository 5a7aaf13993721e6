use async_trait::async_trait;
use serde_json::Value;

use crate::{errors::Error, Result};

/// One SMS as reported by the inbox API.
///
/// Only `id` and `content` drive behavior; the rest is passed through to the
/// forwarded text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceMessage {
    pub id: Option<i64>,
    pub content: String,
    pub number: Option<String>,
    pub simnum: Option<String>,
    pub time: Option<String>,
}

impl SourceMessage {
    fn from_value(v: &Value) -> Self {
        let id = v.get("id").and_then(|id| match id {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        });

        Self {
            id,
            content: field_text(v, "content").unwrap_or_default(),
            number: field_text(v, "number"),
            simnum: field_text(v, "simnum"),
            time: field_text(v, "time"),
        }
    }
}

fn field_text(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Parse the inbox response body. Anything but a JSON array is a protocol error.
pub fn parse_message_list(body: &str) -> Result<Vec<SourceMessage>> {
    let v: Value = serde_json::from_str(body)
        .map_err(|e| Error::SourceProtocol(format!("response is not JSON: {e}")))?;

    let Value::Array(items) = v else {
        return Err(Error::SourceProtocol(
            "response is not a message list".to_string(),
        ));
    };

    Ok(items.iter().map(SourceMessage::from_value).collect())
}

/// Port for the SMS inbox.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch the current message list for one credential.
    ///
    /// Fails with [`Error::SourceUnavailable`] on network/timeout/status
    /// errors and [`Error::SourceProtocol`] on malformed bodies.
    async fn fetch(&self, token: &str) -> Result<Vec<SourceMessage>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_objects() {
        let body = r#"[
          {"id": 7, "content": "code 1234", "number": "10086", "simnum": "13800000000", "time": "2026-01-01 10:00:00", "extra": true},
          {"id": "8", "content": "hi", "number": 95555, "simnum": null}
        ]"#;
        let msgs = parse_message_list(body).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].id, Some(7));
        assert_eq!(msgs[0].content, "code 1234");
        assert_eq!(msgs[0].number.as_deref(), Some("10086"));
        assert_eq!(msgs[0].time.as_deref(), Some("2026-01-01 10:00:00"));
        assert_eq!(msgs[1].id, Some(8));
        assert_eq!(msgs[1].number.as_deref(), Some("95555"));
        assert_eq!(msgs[1].simnum, None);
        assert_eq!(msgs[1].time, None);
    }

    #[test]
    fn entries_without_usable_id_keep_none() {
        let msgs = parse_message_list(r#"[{"content": "x"}, {"id": 1.5}, "junk"]"#).unwrap();
        assert_eq!(msgs.len(), 3);
        assert!(msgs.iter().all(|m| m.id.is_none()));
    }

    #[test]
    fn non_array_body_is_protocol_error() {
        let err = parse_message_list(r#"{"error": "bad token"}"#).unwrap_err();
        assert!(matches!(err, Error::SourceProtocol(_)));

        let err = parse_message_list("<html>").unwrap_err();
        assert!(matches!(err, Error::SourceProtocol(_)));
    }
}
