//! Wire envelope exchanged with the device server
//!
//! Every frame is a flat JSON object: caller data plus reserved `$`-prefixed
//! fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DialogError, DialogResult};

/// Inbound or outbound message
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "$endpoint", default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(rename = "$devid", default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Correlation id linking a response to its request
    #[serde(rename = "$reqid", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Out-of-band notification, never correlated
    #[serde(rename = "$control", default, skip_serializing_if = "std::ops::Not::not")]
    pub control: bool,

    /// Caller data
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Message {
    /// Build an outbound message carrying the reserved routing fields
    pub fn outbound(
        endpoint: impl Into<String>,
        device_id: impl Into<String>,
        request_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            device_id: Some(device_id.into()),
            request_id: Some(request_id.into()),
            control: false,
            payload: into_payload(payload),
        }
    }

    /// Parse a frame received from the transport
    pub fn from_json_str(text: &str) -> DialogResult<Self> {
        serde_json::from_str(text).map_err(DialogError::malformed)
    }

    /// Serialize for the transport
    pub fn to_json_string(&self) -> DialogResult<String> {
        serde_json::to_string(self).map_err(DialogError::malformed)
    }

    /// Caller field by name
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Caller data as a JSON object
    pub fn payload_value(&self) -> Value {
        Value::Object(self.payload.clone())
    }
}

const RESERVED_FIELDS: [&str; 4] = ["$endpoint", "$devid", "$reqid", "$control"];

/// Objects are used as is minus reserved fields; any other value is wrapped
/// under `data`
fn into_payload(payload: Value) -> Map<String, Value> {
    match payload {
        Value::Object(mut map) => {
            map.retain(|key, _| !RESERVED_FIELDS.contains(&key.as_str()));
            map
        }
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_wire_shape() {
        let message = Message::outbound("audio/frame", "dev-1", "ab12", json!({ "seq": 3 }));
        let wire: Value = serde_json::from_str(&message.to_json_string().unwrap()).unwrap();

        assert_eq!(
            wire,
            json!({
                "seq": 3,
                "$endpoint": "audio/frame",
                "$devid": "dev-1",
                "$reqid": "ab12"
            })
        );
    }

    #[test]
    fn test_control_flag_parsed() {
        let message = Message::from_json_str(r#"{"$control": true, "event": "mute"}"#).unwrap();

        assert!(message.control);
        assert_eq!(message.request_id, None);
        assert_eq!(message.get("event"), Some(&json!("mute")));
    }

    #[test]
    fn test_reserved_fields_stay_out_of_payload() {
        let message =
            Message::from_json_str(r#"{"$reqid": "ff", "$endpoint": "x", "answer": 42}"#).unwrap();

        assert_eq!(message.request_id.as_deref(), Some("ff"));
        assert_eq!(message.payload.len(), 1);
        assert!(!message.control);
    }

    #[test]
    fn test_reserved_fields_in_caller_data_are_replaced() {
        let message = Message::outbound("real", "d", "r", json!({ "$endpoint": "spoofed", "k": 1 }));
        let wire: Value = serde_json::from_str(&message.to_json_string().unwrap()).unwrap();

        assert_eq!(wire["$endpoint"], json!("real"));
        assert_eq!(wire["k"], json!(1));
    }

    #[test]
    fn test_scalar_payload_wrapped() {
        let message = Message::outbound("e", "d", "r", json!([1, 2]));
        assert_eq!(message.get("data"), Some(&json!([1, 2])));
    }

    #[test]
    fn test_non_object_frame_is_malformed() {
        assert!(Message::from_json_str("[1, 2, 3]").is_err());
        assert!(Message::from_json_str("not json").is_err());
    }
}
