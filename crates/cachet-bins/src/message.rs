//! Message type and wire representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One opaque blob routed through a bin.
///
/// The ciphertext is never inspected by the relay. The timestamp is assigned
/// server-side at admission and is deliberately excluded from the wire
/// format in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub bin_id: u64,
    pub message_id: String,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(skip, default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(bin_id: u64, message_id: impl Into<String>, ciphertext: Vec<u8>) -> Self {
        Self {
            bin_id,
            message_id: message_id.into(),
            ciphertext,
            timestamp: Utc::now(),
        }
    }
}

/// Base64 (standard alphabet, padded) serde adapter for binary fields.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_base64_without_timestamp() {
        let msg = Message::new(0x1000, "msg-1", b"sealed".to_vec());
        let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();

        assert_eq!(json["bin_id"], 0x1000);
        assert_eq!(json["message_id"], "msg-1");
        assert_eq!(json["ciphertext"], "c2VhbGVk");
        assert!(json.get("timestamp").is_none());
    }

    #[test]
    fn wire_message_decodes() {
        let msg: Message =
            serde_json::from_str(r#"{"bin_id":4096,"message_id":"m","ciphertext":"c2VhbGVk"}"#).unwrap();

        assert_eq!(msg.bin_id, 4096);
        assert_eq!(msg.ciphertext, b"sealed");
    }

    #[test]
    fn invalid_base64_rejected() {
        let result: Result<Message, _> =
            serde_json::from_str(r#"{"bin_id":1,"message_id":"m","ciphertext":"!!!"}"#);
        assert!(result.is_err());
    }
}
