//! Wire protocol definitions for the remote statement protocol.
//!
//! Every frame is one UTF-8 JSON object per WebSocket text message:
//! `{ "id": u64, "type": string, "payload": ... }`. The `id` is assigned by
//! the request sender and echoed verbatim by the responder; each request gets
//! exactly one response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Requests a client can send to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Request {
    /// Compile a statement and allocate a server-side handle for it.
    #[serde(rename = "prepare")]
    Prepare(String),

    /// One-shot: compile, execute and discard a statement in one round trip.
    #[serde(rename = "run")]
    Run(RunPayload),

    /// Execute a prepared statement and return all rows.
    #[serde(rename = "prepare.all")]
    PrepareAll(StatementPayload),

    /// Execute a prepared statement and return the first row, if any.
    #[serde(rename = "prepare.get")]
    PrepareGet(StatementPayload),

    /// Release a prepared statement handle.
    #[serde(rename = "prepare.finalize")]
    PrepareFinalize(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPayload {
    pub sql: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementPayload {
    pub handle: u64,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Responses the server sends back, correlated by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Response {
    #[serde(rename = "respond")]
    Respond(Value),

    #[serde(rename = "error")]
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    #[serde(flatten)]
    pub response: Response,
}

/// Fallback decoding for frames that fail the typed decode above: salvages
/// the correlation id so the server can still answer with an `error` frame.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PartialFrame {
    pub id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let frame = RequestFrame {
            id: 0,
            request: Request::Prepare("SELECT 1".to_string()),
        };
        let encoded = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            encoded,
            json!({"id": 0, "type": "prepare", "payload": "SELECT 1"})
        );

        let frame = RequestFrame {
            id: 3,
            request: Request::PrepareAll(StatementPayload {
                handle: 0,
                args: vec![json!(5)],
            }),
        };
        let encoded = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            encoded,
            json!({"id": 3, "type": "prepare.all", "payload": {"handle": 0, "args": [5]}})
        );
    }

    #[test]
    fn test_request_decoding() {
        let frame: RequestFrame =
            serde_json::from_str(r#"{"id":7,"type":"run","payload":{"sql":"SELECT * FROM t"}}"#)
                .unwrap();
        assert_eq!(frame.id, 7);
        match frame.request {
            Request::Run(RunPayload { sql, args }) => {
                assert_eq!(sql, "SELECT * FROM t");
                assert!(args.is_empty(), "missing args must default to empty");
            }
            other => panic!("wrong request variant: {other:?}"),
        }

        let frame: RequestFrame =
            serde_json::from_str(r#"{"id":9,"type":"prepare.finalize","payload":4}"#).unwrap();
        assert_eq!(frame.request, Request::PrepareFinalize(4));
    }

    #[test]
    fn test_unknown_type_salvages_id() {
        let raw = r#"{"id":12,"type":"bogus","payload":null}"#;
        assert!(serde_json::from_str::<RequestFrame>(raw).is_err());
        let partial: PartialFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(partial.id, 12);
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        // Handle must be an integer; the typed decode refuses the frame.
        let raw = r#"{"id":2,"type":"prepare.all","payload":{"handle":"zero"}}"#;
        assert!(serde_json::from_str::<RequestFrame>(raw).is_err());
        assert_eq!(serde_json::from_str::<PartialFrame>(raw).unwrap().id, 2);
    }

    #[test]
    fn test_response_wire_format() {
        let frame = ResponseFrame {
            id: 1,
            response: Response::Respond(json!([{"a": 1}])),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"id": 1, "type": "respond", "payload": [{"a": 1}]})
        );

        let frame: ResponseFrame =
            serde_json::from_str(r#"{"id":5,"type":"error","payload":"Invalid Handle"}"#).unwrap();
        assert_eq!(frame.response, Response::Error("Invalid Handle".to_string()));
    }
}
