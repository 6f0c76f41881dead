//! SSE wire framing.
//!
//! Every frame is `event: <type>\ndata: <json>\n\n`. Payloads are marshalled
//! with `serde_json`; a payload that fails to marshal is logged and skipped,
//! it never reaches the client and never stops the caller.

use bytes::Bytes;
use chrono::Utc;
use log::*;
use serde::Serialize;

/// Trait for getting the SSE event type name
pub trait EventType {
    fn event_type(&self) -> &'static str;
}

/// Event type used for every new item a stream delivers.
pub const NEW_ENTRY: &str = "new-entry";

/// Control events produced by the streaming core itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Event {
    Connected { status: &'static str, timestamp: i64 },
    Heartbeat { timestamp: i64 },
    Ping { timestamp: i64 },
    Error { error: String, timestamp: i64 },
}

impl Event {
    pub fn connected() -> Self {
        Event::Connected {
            status: "connected",
            timestamp: unix_now(),
        }
    }

    pub fn heartbeat() -> Self {
        Event::Heartbeat {
            timestamp: unix_now(),
        }
    }

    pub fn ping() -> Self {
        Event::Ping {
            timestamp: unix_now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Event::Error {
            error: message.into(),
            timestamp: unix_now(),
        }
    }

    pub fn encode(&self) -> Option<Bytes> {
        encode(self.event_type(), self)
    }
}

impl EventType for Event {
    fn event_type(&self) -> &'static str {
        match self {
            Event::Connected { .. } => "connected",
            Event::Heartbeat { .. } => "heartbeat",
            Event::Ping { .. } => "ping",
            Event::Error { .. } => "error",
        }
    }
}

/// Encodes an item as a `new-entry` frame.
pub fn encode_entry<T: Serialize + ?Sized>(item: &T) -> Option<Bytes> {
    encode(NEW_ENTRY, item)
}

/// Marshals `payload` to JSON and wraps it in SSE framing.
pub fn encode<T: Serialize + ?Sized>(event_type: &str, payload: &T) -> Option<Bytes> {
    match serde_json::to_string(payload) {
        Ok(data) => Some(frame(event_type, &data)),
        Err(e) => {
            error!("Failed to serialize SSE {event_type} event: {e}");
            None
        }
    }
}

fn frame(event_type: &str, data: &str) -> Bytes {
    Bytes::from(format!("event: {event_type}\ndata: {data}\n\n"))
}

pub(crate) fn unix_now() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde_json::json;

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("not representable"))
        }
    }

    #[test]
    fn control_events_are_framed_bit_exact() {
        let connected = Event::Connected {
            status: "connected",
            timestamp: 1700000000,
        };
        assert_eq!(
            connected.encode().unwrap(),
            Bytes::from("event: connected\ndata: {\"status\":\"connected\",\"timestamp\":1700000000}\n\n")
        );

        let heartbeat = Event::Heartbeat { timestamp: 42 };
        assert_eq!(
            heartbeat.encode().unwrap(),
            Bytes::from("event: heartbeat\ndata: {\"timestamp\":42}\n\n")
        );

        let ping = Event::Ping { timestamp: 7 };
        assert_eq!(
            ping.encode().unwrap(),
            Bytes::from("event: ping\ndata: {\"timestamp\":7}\n\n")
        );

        let error = Event::Error {
            error: "Failed to fetch data: boom".to_string(),
            timestamp: 9,
        };
        assert_eq!(
            error.encode().unwrap(),
            Bytes::from(
                "event: error\ndata: {\"error\":\"Failed to fetch data: boom\",\"timestamp\":9}\n\n"
            )
        );
    }

    #[test]
    fn new_entry_payload_is_passed_through() {
        let frame = encode_entry(&json!({"id": "a", "status": "InTransit"})).unwrap();
        assert_eq!(
            frame,
            Bytes::from("event: new-entry\ndata: {\"id\":\"a\",\"status\":\"InTransit\"}\n\n")
        );
    }

    #[test]
    fn multiline_strings_stay_on_one_data_line() {
        let frame = encode_entry(&json!({"note": "line one\nline two"})).unwrap();
        let text = std::str::from_utf8(&frame).unwrap();

        assert_eq!(text.matches('\n').count(), 3);
    }

    #[test]
    fn marshal_failure_skips_the_frame() {
        assert!(encode_entry(&Unserializable).is_none());
    }

    #[test]
    fn constructors_stamp_current_time() {
        let before = unix_now();
        match Event::ping() {
            Event::Ping { timestamp } => assert!(timestamp >= before),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
