//! The wire unit exchanged between host and extension.
//!
//! An envelope is a flat JSON object. Requests carry `cmd`, replies carry
//! `result` (and `reason` on failure), non-blocking requests and their
//! replies carry `callbackId`, and unsolicited messages carry `event`.
//! Everything else is application-defined.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ExtensionError, ExtensionResult};

/// Well-known envelope field names.
pub mod fields {
    /// Command name on requests.
    pub const COMMAND: &str = "cmd";
    /// Correlation id on non-blocking requests and their replies.
    pub const CORRELATION_ID: &str = "callbackId";
    /// Two-valued reply status.
    pub const RESULT: &str = "result";
    /// Human readable failure reason.
    pub const REASON: &str = "reason";
    /// Optional machine readable failure code.
    pub const CODE: &str = "code";
    /// Event name on unsolicited messages.
    pub const EVENT: &str = "event";
    /// Native handle a proxied call or teardown refers to.
    pub const HANDLE_ID: &str = "handleId";
}

/// Reply status carried in the `result` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "FAIL")]
    Fail,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Fail => "FAIL",
        }
    }
}

/// A flat record of named fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope {
    fields: Map<String, Value>,
}

impl Envelope {
    /// Create an empty envelope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a request envelope for `command`.
    pub fn command(command: impl Into<String>) -> Self {
        Self::new().with(fields::COMMAND, command.into())
    }

    /// Create an unsolicited event envelope.
    pub fn event(name: impl Into<String>) -> Self {
        Self::new().with(fields::EVENT, name.into())
    }

    /// Create a successful reply.
    pub fn ok() -> Self {
        Self::new().with(fields::RESULT, Status::Ok.as_str())
    }

    /// Create a failed reply with a reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self::new()
            .with(fields::RESULT, Status::Fail.as_str())
            .with(fields::REASON, reason.into())
    }

    /// Create a successful reply addressed to `request`.
    ///
    /// The request's correlation id, if any, is copied over so the host can
    /// route the reply back to the waiting caller.
    pub fn reply_to(request: &Envelope) -> Self {
        Self::ok().correlated_with(request)
    }

    /// Copy the correlation id of `request` onto this envelope.
    pub fn correlated_with(mut self, request: &Envelope) -> Self {
        match request.get(fields::CORRELATION_ID) {
            Some(id) => {
                self.fields
                    .insert(fields::CORRELATION_ID.to_string(), id.clone());
            }
            None => {
                self.fields.remove(fields::CORRELATION_ID);
            }
        }
        self
    }

    /// Set a field, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Merge a field map into this envelope. Existing keys are overwritten.
    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Attach a correlation id.
    pub fn with_correlation_id(self, id: u64) -> Self {
        self.with(fields::CORRELATION_ID, id)
    }

    /// Set a field in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Remove a field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(value_as_u64)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    /// Command name, for requests.
    pub fn command_name(&self) -> Option<&str> {
        self.get_str(fields::COMMAND)
    }

    /// Event name, for unsolicited messages.
    pub fn event_name(&self) -> Option<&str> {
        self.get_str(fields::EVENT)
    }

    /// Correlation id, accepting either a number or a numeric string.
    pub fn correlation_id(&self) -> Option<u64> {
        self.get_u64(fields::CORRELATION_ID)
    }

    /// Whether a correlation field is present at all, parseable or not.
    pub fn has_correlation_field(&self) -> bool {
        self.fields.contains_key(fields::CORRELATION_ID)
    }

    pub fn handle_id(&self) -> Option<u64> {
        self.get_u64(fields::HANDLE_ID)
    }

    /// Reply status. Matching is case-insensitive.
    pub fn status(&self) -> Option<Status> {
        let raw = self.get_str(fields::RESULT)?;
        if raw.eq_ignore_ascii_case("ok") {
            Some(Status::Ok)
        } else if raw.eq_ignore_ascii_case("fail") {
            Some(Status::Fail)
        } else {
            None
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status() == Some(Status::Fail)
    }

    pub fn reason(&self) -> Option<&str> {
        self.get_str(fields::REASON)
    }

    pub fn code(&self) -> Option<&str> {
        self.get_str(fields::CODE)
    }

    /// Serialize to the text payload sent over a channel.
    pub fn encode(&self) -> ExtensionResult<String> {
        Ok(serde_json::to_string(&self.fields)?)
    }

    /// Parse a text payload. Anything other than a JSON object is rejected.
    pub fn decode(payload: &str) -> ExtensionResult<Self> {
        match serde_json::from_str::<Value>(payload)? {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(ExtensionError::MalformedEnvelope(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }
}

impl From<Map<String, Value>> for Envelope {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_encoding() {
        let env = Envelope::command("battery.level")
            .with("precision", 2)
            .with_correlation_id(7);

        let text = env.encode().unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            parsed,
            json!({"cmd": "battery.level", "precision": 2, "callbackId": 7})
        );
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        assert!(matches!(
            Envelope::decode("[1,2]"),
            Err(ExtensionError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            Envelope::decode("not json"),
            Err(ExtensionError::Json(_))
        ));
    }

    #[test]
    fn test_status_and_reason() {
        let reply = Envelope::decode(r#"{"result":"fail","reason":"denied","code":"E_PERM"}"#)
            .unwrap();
        assert_eq!(reply.status(), Some(Status::Fail));
        assert!(reply.is_failure());
        assert_eq!(reply.reason(), Some("denied"));
        assert_eq!(reply.code(), Some("E_PERM"));

        assert_eq!(Envelope::ok().status(), Some(Status::Ok));
        assert_eq!(Envelope::new().status(), None);
    }

    #[test]
    fn test_correlation_id_accepts_strings() {
        let env = Envelope::decode(r#"{"callbackId":"42"}"#).unwrap();
        assert_eq!(env.correlation_id(), Some(42));

        let env = Envelope::decode(r#"{"callbackId":"x"}"#).unwrap();
        assert_eq!(env.correlation_id(), None);
        assert!(env.has_correlation_field());
    }

    #[test]
    fn test_reply_to_copies_correlation_id() {
        let request = Envelope::command("read").with_correlation_id(3);
        let reply = Envelope::reply_to(&request).with("value", "abc");
        assert_eq!(reply.correlation_id(), Some(3));
        assert_eq!(reply.status(), Some(Status::Ok));

        let blocking = Envelope::command("read");
        let reply = Envelope::fail("nope").correlated_with(&blocking);
        assert!(!reply.has_correlation_field());
    }
}
