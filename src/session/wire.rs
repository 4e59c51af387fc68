//! The wire protocol (§6): one UTF-8 JSON object per frame in each
//! direction. Kept as a pair of small, explicitly-shaped types rather than
//! free-form `serde_json::Value` so the dispatch boundary can reject a
//! malformed frame with a typed `ProtocolError` instead of panicking deep
//! in a handler.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// `{ "type": <string>, "data": <any>, "future_id": <string?> }`
#[derive(Clone, Debug, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub future_id: Option<String>,
}

/// Every outbound shape the specification names, as one serializable
/// enum keyed on `type`. `future_id` is only ever present on replies.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Reply {
        #[serde(rename = "type")]
        kind: String,
        data: serde_json::Value,
        time: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        future_id: Option<String>,
    },
    Event {
        #[serde(rename = "type")]
        kind: String,
        data: serde_json::Value,
        time: f64,
    },
    Error {
        #[serde(rename = "type")]
        kind: String,
        msg: String,
    },
    Redirect {
        #[serde(rename = "type")]
        kind: String,
        msg: String,
        url: String,
    },
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl OutboundFrame {
    pub fn reply(reqtype: &str, data: serde_json::Value, future_id: Option<String>) -> Self {
        OutboundFrame::Reply {
            kind: format!("{reqtype}_resp"),
            data,
            time: now_secs(),
            future_id,
        }
    }

    pub fn event(event: &str, data: serde_json::Value) -> Self {
        OutboundFrame::Event {
            kind: event.to_string(),
            data,
            time: now_secs(),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        OutboundFrame::Error {
            kind: "error".to_string(),
            msg: msg.into(),
        }
    }

    pub fn redirect(msg: impl Into<String>, url: impl Into<String>) -> Self {
        OutboundFrame::Redirect {
            kind: "redirect".to_string(),
            msg: msg.into(),
            url: url.into(),
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_type_gets_resp_suffix() {
        let frame = OutboundFrame::reply("ping", serde_json::json!("pong"), None);
        let text = frame.to_text().unwrap();
        assert!(text.contains("\"type\":\"ping_resp\""));
    }

    #[test]
    fn inbound_frame_parses_minimal_shape() {
        let frame: InboundFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(frame.kind, "ping");
        assert!(frame.data.is_null());
    }
}
