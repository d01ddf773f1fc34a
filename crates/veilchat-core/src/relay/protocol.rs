//! NIP-01 wire frames exchanged with relays.
//!
//! Client to relay: `["REQ", sub_id, filter...]`, `["CLOSE", sub_id]`,
//! `["EVENT", event]`. Relay to client: `["EVENT", sub_id, event]`,
//! `["EOSE", sub_id]`, `["OK", event_id, accepted, reason]`,
//! `["NOTICE", text]`. Every frame is a JSON array whose first element names
//! the verb.

use crate::error::Result;
use crate::nostr::Event;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Subscription filter. Only recognized keys are serialized; tag filters use
/// their `#`-prefixed wire names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Match specific event ids.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    /// Match author pubkeys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    /// Match event kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    /// Match `e` (event reference) tags.
    #[serde(rename = "#e", skip_serializing_if = "Option::is_none")]
    pub event_tags: Option<Vec<String>>,
    /// Match `p` (pubkey reference) tags.
    #[serde(rename = "#p", skip_serializing_if = "Option::is_none")]
    pub pubkey_tags: Option<Vec<String>>,
    /// Match `g` (geohash) tags.
    #[serde(rename = "#g", skip_serializing_if = "Option::is_none")]
    pub geohash_tags: Option<Vec<String>>,
    /// Only events at or after this timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    /// Only events at or before this timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    /// Maximum number of stored events to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    /// Empty filter matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to the given kinds.
    pub fn kinds(mut self, kinds: Vec<u16>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    /// Restrict to events tagging the given pubkey.
    pub fn pubkey_tag(mut self, pubkey: impl Into<String>) -> Self {
        self.pubkey_tags.get_or_insert_with(Vec::new).push(pubkey.into());
        self
    }

    /// Restrict to events tagging the given geohash.
    pub fn geohash_tag(mut self, geohash: impl Into<String>) -> Self {
        self.geohash_tags.get_or_insert_with(Vec::new).push(geohash.into());
        self
    }

    /// Restrict to events at or after `since`.
    pub fn since(mut self, since: i64) -> Self {
        self.since = Some(since);
        self
    }
}

/// A parsed relay-to-client message.
#[derive(Debug)]
pub enum RelayMessage {
    /// An event matching one of our subscriptions.
    Event {
        /// Subscription that matched.
        sub_id: String,
        /// The event itself.
        event: Event,
    },
    /// End of stored events for a subscription.
    Eose {
        /// Subscription that finished its backlog.
        sub_id: String,
    },
    /// Acceptance result for a published event.
    Ok {
        /// The published event id.
        event_id: String,
        /// Whether the relay accepted it.
        accepted: bool,
        /// Human-readable reason, usually set on rejection.
        message: Option<String>,
    },
    /// Free-form notice from the relay.
    Notice {
        /// Notice text.
        message: String,
    },
}

/// Parse a relay-to-client frame. Returns `None` for anything unrecognized;
/// unknown verbs are not an error.
pub fn parse_relay_message(raw: &str) -> Option<RelayMessage> {
    let arr: Vec<Value> = serde_json::from_str(raw).ok()?;
    match arr.first()?.as_str()? {
        "EVENT" => {
            let sub_id = arr.get(1)?.as_str()?.to_string();
            let event: Event = serde_json::from_value(arr.get(2)?.clone()).ok()?;
            Some(RelayMessage::Event { sub_id, event })
        }
        "EOSE" => {
            let sub_id = arr.get(1)?.as_str()?.to_string();
            Some(RelayMessage::Eose { sub_id })
        }
        "OK" => {
            let event_id = arr.get(1)?.as_str()?.to_string();
            let accepted = arr.get(2)?.as_bool()?;
            let message = arr.get(3).and_then(|v| v.as_str()).map(String::from);
            Some(RelayMessage::Ok {
                event_id,
                accepted,
                message,
            })
        }
        "NOTICE" => {
            let message = arr.get(1)?.as_str()?.to_string();
            Some(RelayMessage::Notice { message })
        }
        _ => None,
    }
}

/// Build a `REQ` frame for a subscription.
pub fn req_frame(sub_id: &str, filters: &[Filter]) -> Result<String> {
    let mut frame = vec![json!("REQ"), json!(sub_id)];
    for filter in filters {
        frame.push(serde_json::to_value(filter)?);
    }
    Ok(Value::Array(frame).to_string())
}

/// Build a `CLOSE` frame for a subscription.
pub fn close_frame(sub_id: &str) -> String {
    json!(["CLOSE", sub_id]).to_string()
}

/// Build an `EVENT` publish frame.
pub fn event_frame(event: &Event) -> Result<String> {
    Ok(json!(["EVENT", event]).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nostr::kind;

    #[test]
    fn test_filter_serialization_uses_wire_names() {
        let filter = Filter::new()
            .kinds(vec![kind::GIFT_WRAP])
            .pubkey_tag("ab".repeat(32))
            .geohash_tag("u4pruyd")
            .since(1700000000);

        let json = serde_json::to_value(&filter).expect("serialize");
        assert_eq!(json["kinds"], json!([1059]));
        assert_eq!(json["#p"], json!(["ab".repeat(32)]));
        assert_eq!(json["#g"], json!(["u4pruyd"]));
        assert_eq!(json["since"], json!(1700000000));
        assert!(json.get("ids").is_none());
        assert!(json.get("limit").is_none());
    }

    #[test]
    fn test_parse_event_frame() {
        let raw = r#"["EVENT","abcd1234",{"id":"00","pubkey":"11","created_at":5,"kind":1,"tags":[],"content":"x","sig":""}]"#;
        match parse_relay_message(raw) {
            Some(RelayMessage::Event { sub_id, event }) => {
                assert_eq!(sub_id, "abcd1234");
                assert_eq!(event.kind, 1);
                assert_eq!(event.content, "x");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ok_and_notice() {
        match parse_relay_message(r#"["OK","deadbeef",false,"blocked: spam"]"#) {
            Some(RelayMessage::Ok {
                event_id,
                accepted,
                message,
            }) => {
                assert_eq!(event_id, "deadbeef");
                assert!(!accepted);
                assert_eq!(message.as_deref(), Some("blocked: spam"));
            }
            other => panic!("unexpected parse: {other:?}"),
        }

        assert!(matches!(
            parse_relay_message(r#"["NOTICE","slow down"]"#),
            Some(RelayMessage::Notice { .. })
        ));
        assert!(matches!(
            parse_relay_message(r#"["EOSE","abcd1234"]"#),
            Some(RelayMessage::Eose { .. })
        ));
    }

    #[test]
    fn test_parse_garbage_returns_none() {
        assert!(parse_relay_message("not json").is_none());
        assert!(parse_relay_message(r#"{"obj":true}"#).is_none());
        assert!(parse_relay_message(r#"["AUTH","challenge"]"#).is_none());
        assert!(parse_relay_message(r#"["EVENT"]"#).is_none());
    }

    #[test]
    fn test_req_frame_shape() {
        let frame = req_frame("a1b2c3d4", &[Filter::new().kinds(vec![1])]).expect("frame");
        let parsed: Vec<Value> = serde_json::from_str(&frame).expect("json");
        assert_eq!(parsed[0], json!("REQ"));
        assert_eq!(parsed[1], json!("a1b2c3d4"));
        assert_eq!(parsed[2], json!({"kinds": [1]}));
    }
}
