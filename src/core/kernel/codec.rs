//! JSON-RPC 2.0 framing used on the wire.
//!
//! Outbound frames are always requests with a numeric id. Inbound frames are
//! classified into one of two shapes:
//!
//! - a **response** carries the id of a previously sent request and exactly
//!   one of `result` or `error`;
//! - a **notification** carries a `method` and no id, with
//!   `params.subscription` naming the stream it belongs to and either
//!   `params.result` or `params.error` as its payload.
//!
//! Anything else decodes to [`JsonRpcMessage::Unknown`] and is ignored by the
//! client.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcFrame {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    subscription: u64,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    error: Option<Value>,
}

// Distinguishes an explicit `null` from a missing field.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// A classified inbound frame. `Err` payloads are the raw error objects.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Response {
        id: u64,
        outcome: Result<Value, Value>,
    },
    Notification {
        method: String,
        subscription: u64,
        outcome: Result<Value, Value>,
    },
    Unknown,
}

/// A JSON-RPC error object: must carry a numeric `code` and a string `message`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcErrorObject {
    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }
}

pub fn encode_request(id: u64, method: &str, params: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(&JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION,
        id,
        method,
        params,
    })
}

pub fn decode(frame: &str) -> Result<JsonRpcMessage, serde_json::Error> {
    let frame: JsonRpcFrame = serde_json::from_str(frame)?;

    if let Some(id) = frame.id.as_ref().and_then(Value::as_u64) {
        let outcome = match (frame.result, frame.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => return Ok(JsonRpcMessage::Unknown),
        };
        return Ok(JsonRpcMessage::Response { id, outcome });
    }

    let params = frame
        .params
        .as_ref()
        .and_then(|p| NotificationParams::deserialize(p).ok());
    match (frame.id, frame.method, params) {
        (None, Some(method), Some(params)) => {
            let outcome = match (params.result, params.error) {
                (_, Some(error)) => Err(error),
                (Some(result), None) => Ok(result),
                (None, None) => return Ok(JsonRpcMessage::Unknown),
            };
            Ok(JsonRpcMessage::Notification {
                method,
                subscription: params.subscription,
                outcome,
            })
        }
        _ => Ok(JsonRpcMessage::Unknown),
    }
}

/// Shorten a frame for log output without splitting a UTF-8 character.
pub fn truncate_for_log(frame: &str, max_len: usize) -> &str {
    if frame.len() <= max_len {
        return frame;
    }
    let mut end = max_len;
    while !frame.is_char_boundary(end) {
        end -= 1;
    }
    &frame[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_request_envelope() {
        let frame = encode_request(7, "v1beta7.quote", &json!({"a": 1})).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 7, "method": "v1beta7.quote", "params": {"a": 1}})
        );
    }

    #[test]
    fn test_decode_response_with_null_result() {
        let message = decode(r#"{"jsonrpc":"2.0","id":3,"result":null}"#).unwrap();
        assert_eq!(
            message,
            JsonRpcMessage::Response {
                id: 3,
                outcome: Ok(Value::Null)
            }
        );
    }

    #[test]
    fn test_decode_error_response() {
        let message =
            decode(r#"{"jsonrpc":"2.0","id":1,"error":{"code":1,"message":"Test error"}}"#)
                .unwrap();
        let JsonRpcMessage::Response { id, outcome } = message else {
            panic!("expected response");
        };
        assert_eq!(id, 1);
        let error = JsonRpcErrorObject::from_value(&outcome.unwrap_err()).unwrap();
        assert_eq!(error.code, 1);
        assert_eq!(error.message, "Test error");
    }

    #[test]
    fn test_decode_notification() {
        let message = decode(
            r#"{"jsonrpc":"2.0","method":"v1beta7.quote_event","params":{"subscription":5,"result":{"event":{"keep_alive":{}}}}}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            JsonRpcMessage::Notification {
                method: "v1beta7.quote_event".to_string(),
                subscription: 5,
                outcome: Ok(json!({"event": {"keep_alive": {}}})),
            }
        );
    }

    #[test]
    fn test_unrecognised_frames() {
        assert_eq!(decode(r#"{"jsonrpc":"2.0","id":1}"#).unwrap(), JsonRpcMessage::Unknown);
        assert_eq!(
            decode(r#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap(),
            JsonRpcMessage::Unknown
        );
        assert_eq!(
            decode(r#"{"jsonrpc":"2.0","method":"ping","params":[1]}"#).unwrap(),
            JsonRpcMessage::Unknown
        );
        assert!(decode("not json").is_err());
    }

    #[test]
    fn test_error_object_requires_code_and_message() {
        assert!(JsonRpcErrorObject::from_value(&json!({"message": "no code"})).is_none());
        assert!(JsonRpcErrorObject::from_value(&json!("text")).is_none());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_for_log("hello", 10), "hello");
        assert_eq!(truncate_for_log("héllo", 2), "h");
    }
}
