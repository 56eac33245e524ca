//! Wire payload types shared across endpoints.

use serde::{Deserialize, Serialize};

/// Client identity and capability flags, sent with registration, task
/// requests, failure reports, and heartbeats.
#[derive(Debug, Clone, Serialize)]
pub struct ClientMetadata {
    pub client_uid: String,
    pub client_name: String,
    pub version: String,
    /// Declared VRAM capacity in gigabytes.
    pub vram: u32,
    pub test_mode: bool,
    pub cpu_mode: bool,
}

/// Generic acknowledgement envelope returned by the server.
///
/// `status` uses the task wire codes (2 = done, 3 = error).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerAck {
    pub status: i64,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_serialises_all_wire_keys() {
        let meta = ClientMetadata {
            client_uid: "uid-1".to_string(),
            client_name: "gpu-box".to_string(),
            version: "0.4.0".to_string(),
            vram: 8,
            test_mode: false,
            cpu_mode: true,
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["client_uid"], "uid-1");
        assert_eq!(value["client_name"], "gpu-box");
        assert_eq!(value["vram"], 8);
        assert_eq!(value["cpu_mode"], true);
    }

    #[test]
    fn ack_message_is_optional() {
        let ack: ServerAck = serde_json::from_value(json!({"status": 2})).unwrap();
        assert_eq!(ack.status, 2);
        assert_eq!(ack.message, None);
    }

    #[test]
    fn ack_with_message_parses() {
        let ack: ServerAck =
            serde_json::from_value(json!({"status": 3, "message": "unknown client"})).unwrap();
        assert_eq!(ack.status, 3);
        assert_eq!(ack.message.as_deref(), Some("unknown client"));
    }
}
