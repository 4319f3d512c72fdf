//! Wire frames for the streaming protocol.
//!
//! Three frame shapes cross the WebSocket: the client's initial subscribe
//! request, the server's acknowledgement, and messages (both directions,
//! defined in `cachet-bins` so the routing layer and the wire agree on the
//! format).

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Required `type` value of the first client frame.
pub const SUBSCRIBE_TYPE: &str = "subscribe";

/// First frame of every session.
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub bin_ids: Vec<u64>,
    #[serde(default)]
    pub client_id: Option<String>,
}

/// Server acknowledgement of a subscription.
#[derive(Debug, Serialize)]
pub struct SubscribeAck {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub client_id: String,
    pub bin_count: usize,
    pub timestamp: String,
}

impl SubscribeAck {
    pub fn new(client_id: &str, bin_count: usize) -> Self {
        Self {
            kind: "subscribe_ack",
            client_id: client_id.to_string(),
            bin_count,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_request_parses() {
        let request: SubscribeRequest =
            serde_json::from_str(r#"{"type":"subscribe","bin_ids":[4096,8192],"client_id":"abc"}"#)
                .unwrap();

        assert_eq!(request.kind, SUBSCRIBE_TYPE);
        assert_eq!(request.bin_ids, vec![4096, 8192]);
        assert_eq!(request.client_id.as_deref(), Some("abc"));
    }

    #[test]
    fn client_id_is_optional() {
        let request: SubscribeRequest =
            serde_json::from_str(r#"{"type":"subscribe","bin_ids":[1]}"#).unwrap();
        assert!(request.client_id.is_none());
    }

    #[test]
    fn ack_serializes_expected_fields() {
        let ack = SubscribeAck::new("client-1", 3);
        let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&ack).unwrap()).unwrap();

        assert_eq!(json["type"], "subscribe_ack");
        assert_eq!(json["client_id"], "client-1");
        assert_eq!(json["bin_count"], 3);
        assert!(json["timestamp"].is_string());
    }
}
