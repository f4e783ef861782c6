//! Wire-level vocabulary shared between the dispatcher and generated
//! per-domain command/event types.
//!
//! Nothing in this crate knows what `Page.navigate` or `Target.getTargets`
//! mean. A [`Command`] is anything that carries a canonical method name and
//! serializes to a JSON params object; a [`Event`] is anything that carries a
//! method name and an optional session id. The dispatcher only ever deals in
//! [`MethodCall`], [`Response`] and [`JsonEvent`] - the concrete generated
//! types plug into those through the traits below.

use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Identifier for one in-flight command.
///
/// Ids are assigned by the dispatcher, strictly increasing, and unique for
/// the lifetime of a single dispatcher (never reused, even after a response
/// is reaped).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(u64);

impl CallId {
    pub fn new(id: u64) -> Self {
        CallId(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A method identifier, e.g. `Page.navigate`.
///
/// Implemented by every generated command/event struct; the dispatcher never
/// needs more than this string to route a frame.
pub trait Method {
    /// The whole string identifier for this method, e.g. `DOM.removeNode`.
    fn identifier(&self) -> Cow<'static, str>;

    /// The domain this method belongs to, e.g. `DOM`.
    fn domain_name(&self) -> Cow<'static, str> {
        self.split().0
    }

    /// The standalone method name inside the domain, e.g. `removeNode`.
    fn method_name(&self) -> Cow<'static, str> {
        self.split().1
    }

    /// `(domain_name, method_name)`.
    fn split(&self) -> (Cow<'static, str>, Cow<'static, str>) {
        match self.identifier() {
            Cow::Borrowed(id) => {
                let mut iter = id.splitn(2, '.');
                (
                    iter.next().unwrap_or_default().into(),
                    iter.next().unwrap_or_default().into(),
                )
            }
            Cow::Owned(id) => {
                let mut iter = id.splitn(2, '.');
                (
                    Cow::Owned(iter.next().unwrap_or_default().to_string()),
                    Cow::Owned(iter.next().unwrap_or_default().to_string()),
                )
            }
        }
    }
}

/// A CDP command: something with a method name that serializes to a params
/// object and expects a typed result back.
pub trait Command: Serialize + Method {
    type Response: DeserializeOwned + fmt::Debug;
}

/// A CDP event: something with a method name, carrying an optional session id
/// once deserialized. The session id usually lives next to the event in the
/// envelope rather than inside `params`, but some domains duplicate it inline.
pub trait Event: Method + DeserializeOwned {
    fn session_id(&self) -> Option<&str> {
        None
    }
}

/// An outbound command frame, ready to hand to a [`Method`]-aware transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodCall {
    pub id: CallId,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub method: Cow<'static, str>,
    pub params: serde_json::Value,
}

impl MethodCall {
    pub fn new(
        id: CallId,
        method: Cow<'static, str>,
        params: serde_json::Value,
        session_id: Option<String>,
    ) -> Self {
        Self {
            id,
            session_id,
            method,
            params,
        }
    }
}

/// The `{code, message, data?}` error object the browser sends back for a
/// failed command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", self.code, self.message)
    }
}

impl std::error::Error for WireError {}

/// A response to a [`MethodCall`], matched back to its waiter by `id`.
///
/// Exactly one of `result`/`error` is populated in a well-formed frame; the
/// dispatcher does not assume that invariant holds for attacker-controlled
/// input and treats both absent as [`crate::WireError`]-free empty success.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    pub id: CallId,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<WireError>,
}

/// A typed view of a [`Response`] once its `result` has been deserialized
/// into `T`.
#[derive(Debug)]
pub struct CommandResponse<T: fmt::Debug> {
    pub id: CallId,
    pub method: Cow<'static, str>,
    pub result: T,
}

impl<T: fmt::Debug> Deref for CommandResponse<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.result
    }
}

/// An event whose `params` have not been interpreted. Used as the default
/// event payload until a generated, domain-specific event type is plugged in,
/// and as the vehicle for wildcard subscriptions that span several event
/// types.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonEvent {
    pub method: Cow<'static, str>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Method for JsonEvent {
    fn identifier(&self) -> Cow<'static, str> {
        self.method.clone()
    }
}

impl Event for JsonEvent {
    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

/// Tagged union an inbound frame decodes to: either a response to a command
/// this side issued, or an unsolicited event.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Message<T = JsonEvent> {
    Response(Response),
    Event(T),
}
