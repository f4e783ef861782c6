//! Encodes outbound command frames and decodes inbound frames into a tagged
//! union of `{Response, Event}`.
//!
//! This module knows nothing about NUL terminators or WebSocket text frames -
//! that framing lives in [`crate::transport`]. It only turns a [`MethodCall`]
//! into JSON bytes and JSON bytes back into a [`Message`].

use std::borrow::Cow;

use devtoxide_types::{CallId, JsonEvent, Message, MethodCall};

use crate::error::CdpError;

/// Serializes a command into the wire JSON object shape:
/// `{"id", "method", "params", "sessionId"?}`.
pub fn encode_command(
    id: CallId,
    method: Cow<'static, str>,
    params: serde_json::Value,
    session_id: Option<String>,
) -> Result<Vec<u8>, CdpError> {
    let call = MethodCall::new(id, method, params, session_id);
    Ok(serde_json::to_vec(&call)?)
}

/// Parses one inbound frame. A frame lacking all of `id`, `method`, and
/// `result`/`error` is reported as [`CdpError::Protocol`] - the dispatcher is
/// expected to log and discard it without tearing anything down.
pub fn decode_frame(bytes: &[u8]) -> Result<Message<JsonEvent>, CdpError> {
    match serde_json::from_slice::<Message<JsonEvent>>(bytes) {
        Ok(msg) => Ok(msg),
        Err(err) => {
            let text = String::from_utf8_lossy(bytes);
            Err(CdpError::Protocol(format!(
                "could not classify frame as response or event: {err} (raw: {text})"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devtoxide_types::Method;

    #[test]
    fn round_trips_a_command_frame() {
        let params = serde_json::json!({"url": "about:blank"});
        let bytes = encode_command(
            CallId::new(7),
            "Page.navigate".into(),
            params.clone(),
            Some("SESSION-1".into()),
        )
        .unwrap();

        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "Page.navigate");
        assert_eq!(value["sessionId"], "SESSION-1");
        assert_eq!(value["params"], params);
    }

    #[test]
    fn omits_session_id_when_absent() {
        let bytes =
            encode_command(CallId::new(1), "Target.getTargets".into(), serde_json::json!({}), None)
                .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("sessionId").is_none());
    }

    #[test]
    fn decodes_a_response_frame() {
        let raw = br#"{"id":1,"result":{"targetInfos":[]}}"#;
        match decode_frame(raw).unwrap() {
            Message::Response(resp) => {
                assert_eq!(resp.id, CallId::new(1));
                assert_eq!(resp.result.unwrap(), serde_json::json!({"targetInfos": []}));
            }
            Message::Event(_) => panic!("expected a response"),
        }
    }

    #[test]
    fn decodes_an_error_response() {
        let raw = br#"{"id":1,"error":{"code":-32601,"message":"not found"}}"#;
        match decode_frame(raw).unwrap() {
            Message::Response(resp) => {
                let err = resp.error.unwrap();
                assert_eq!(err.code, -32601);
                assert_eq!(err.message, "not found");
            }
            Message::Event(_) => panic!("expected a response"),
        }
    }

    #[test]
    fn decodes_an_event_frame() {
        let raw = br#"{"method":"Page.loadEventFired","params":{"timestamp":1.5}}"#;
        match decode_frame(raw).unwrap() {
            Message::Event(ev) => {
                assert_eq!(ev.identifier(), "Page.loadEventFired");
                assert_eq!(ev.params["timestamp"], 1.5);
            }
            Message::Response(_) => panic!("expected an event"),
        }
    }

    #[test]
    fn rejects_malformed_json() {
        let err = decode_frame(b"not json at all").unwrap_err();
        assert!(matches!(err, CdpError::Protocol(_)));
    }

    #[test]
    fn rejects_a_frame_with_neither_id_nor_method() {
        let err = decode_frame(br#"{"foo":"bar"}"#).unwrap_err();
        assert!(matches!(err, CdpError::Protocol(_)));
    }
}
