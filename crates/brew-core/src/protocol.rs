//! JSON wire protocol between a drinker's WebSocket and its kettle.
//!
//! Inbound frames are JSON objects carrying a `Method` discriminator:
//!
//! | `Method`       | Command                 |
//! |----------------|-------------------------|
//! | `"offer"`      | [`Command::Offer`]      |
//! | `"request"`    | [`Command::Request`]    |
//! | `"completion"` | [`Command::Completion`] |
//! | anything else  | [`Command::Unknown`]    |
//!
//! Outbound traffic is either a [`Response`] envelope acknowledging one
//! drinker's command, a serialized [`DrinkRequest`] delivered to the current
//! maker, or a [`RoundEvent`] broadcast to the whole kettle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProtocolError;
use crate::ids::{DrinkerId, KettleId};

/// A decoded inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Volunteer to make the current round.
    Offer,
    /// Order a drink from the current maker. Carries the whole inbound frame,
    /// which is opaque to the server.
    Request(Value),
    /// The maker has finished the round.
    Completion,
    /// Syntactically valid but not a method the server acts on.
    Unknown(String),
}

impl Command {
    /// Decode one text frame.
    ///
    /// A missing `Method` decodes as [`Command::Unknown`] with an empty name.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let frame: Value = serde_json::from_str(text.trim())?;
        let method = match &frame {
            Value::Object(map) => match map.get("Method") {
                Some(Value::String(m)) => m.clone(),
                None | Some(Value::Null) => String::new(),
                Some(_) => return Err(ProtocolError::InvalidMethod),
            },
            _ => return Err(ProtocolError::NotAnObject),
        };
        Ok(match method.as_str() {
            "offer" => Self::Offer,
            "request" => Self::Request(frame),
            "completion" => Self::Completion,
            _ => Self::Unknown(method),
        })
    }

    /// Decode one binary frame, which must hold UTF-8 JSON.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(data).map_err(|_| ProtocolError::NotUtf8)?;
        Self::parse(text)
    }

    /// The method name, for logging.
    pub fn method(&self) -> &str {
        match self {
            Self::Offer => "offer",
            Self::Request(_) => "request",
            Self::Completion => "completion",
            Self::Unknown(m) => m,
        }
    }
}

/// Outcome of a single drinker's command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Acknowledgement sent back to exactly one drinker. Never broadcast.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    pub msg: String,
}

impl Response {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Ok,
            msg: msg.into(),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            msg: msg.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A drink order on its way to the current maker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrinkRequest {
    pub drinker_id: DrinkerId,
    pub drinker_name: String,
    pub request: Value,
}

impl DrinkRequest {
    /// The exact bytes delivered to the maker's mailbox.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Kettle-wide notifications fanned out to every registered drinker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoundEvent {
    #[serde(rename = "round.completed", rename_all = "camelCase")]
    Completed {
        kettle_id: KettleId,
        completed_by: DrinkerId,
        timestamp: DateTime<Utc>,
    },
}

impl RoundEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_offer() {
        assert_eq!(Command::parse(r#"{"Method":"offer"}"#).unwrap(), Command::Offer);
    }

    #[test]
    fn parse_completion() {
        assert_eq!(
            Command::parse(r#"{"Method":"completion"}"#).unwrap(),
            Command::Completion
        );
    }

    #[test]
    fn parse_request_keeps_whole_frame() {
        let cmd = Command::parse(r#"{"Method":"request","choice":"tea","sugars":2}"#).unwrap();
        let Command::Request(frame) = cmd else {
            panic!("expected request, got {cmd:?}");
        };
        assert_eq!(frame["choice"], "tea");
        assert_eq!(frame["sugars"], 2);
        assert_eq!(frame["Method"], "request");
    }

    #[test]
    fn parse_unknown_method() {
        let cmd = Command::parse(r#"{"Method":"dance"}"#).unwrap();
        assert_eq!(cmd, Command::Unknown("dance".into()));
        assert_eq!(cmd.method(), "dance");
    }

    #[test]
    fn binary_frame_must_be_utf8() {
        assert_eq!(Command::from_bytes(br#"{"Method":"offer"}"#).unwrap(), Command::Offer);
        assert!(matches!(
            Command::from_bytes(&[0xff, 0xfe]),
            Err(ProtocolError::NotUtf8)
        ));
    }

    #[test]
    fn missing_method_is_unknown() {
        assert_eq!(
            Command::parse(r#"{"choice":"coffee"}"#).unwrap(),
            Command::Unknown(String::new())
        );
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(
            Command::parse("  {\"Method\":\"offer\"}\n").unwrap(),
            Command::Offer
        );
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = Command::parse("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(matches!(
            Command::parse(r#"["offer"]"#).unwrap_err(),
            ProtocolError::NotAnObject
        ));
    }

    #[test]
    fn non_string_method_is_rejected() {
        assert!(matches!(
            Command::parse(r#"{"Method":7}"#).unwrap_err(),
            ProtocolError::InvalidMethod
        ));
    }

    #[test]
    fn response_wire_shape() {
        let ok = Response::ok("").to_json().unwrap();
        assert_eq!(ok, r#"{"status":"ok","msg":""}"#);
        let err = Response::error("nobody currently offering to make drinks")
            .to_json()
            .unwrap();
        let parsed: Value = serde_json::from_str(&err).unwrap();
        assert_eq!(parsed["status"], "error");
        assert_eq!(parsed["msg"], "nobody currently offering to make drinks");
    }

    #[test]
    fn response_is_ok() {
        assert!(Response::ok("x").is_ok());
        assert!(!Response::error("x").is_ok());
    }

    #[test]
    fn drink_request_wire_shape() {
        let dr = DrinkRequest {
            drinker_id: DrinkerId::from_raw("drinker_b"),
            drinker_name: "bea".into(),
            request: json!({"Method": "request", "choice": "earl grey"}),
        };
        let parsed: Value = serde_json::from_str(&dr.to_json().unwrap()).unwrap();
        assert_eq!(parsed["drinkerId"], "drinker_b");
        assert_eq!(parsed["drinkerName"], "bea");
        assert_eq!(parsed["request"]["choice"], "earl grey");
    }

    #[test]
    fn round_completed_event_wire_shape() {
        let event = RoundEvent::Completed {
            kettle_id: KettleId::from_raw("kettle_k"),
            completed_by: DrinkerId::from_raw("drinker_a"),
            timestamp: "2026-01-01T00:00:00Z".parse().unwrap(),
        };
        let parsed: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(parsed["type"], "round.completed");
        assert_eq!(parsed["kettleId"], "kettle_k");
        assert_eq!(parsed["completedBy"], "drinker_a");
        assert!(parsed["timestamp"].is_string());
    }
}
