//! Envelope construction and reply classification.

use nativebridge_extension_sdk::{fields, Envelope, Status};
use serde_json::{Map, Value};

use crate::error::{BridgeError, Result};

/// An inbound payload after parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Carries a correlation id and no event name.
    Reply { id: u64, envelope: Envelope },
    /// Everything else that parsed. `name` is empty when the payload has no
    /// event field.
    Event { name: String, envelope: Envelope },
}

/// Build a request envelope for `command` carrying `payload`.
///
/// Reserved fields in `payload` are overwritten.
pub fn request(command: &str, payload: Map<String, Value>) -> Envelope {
    let mut envelope = Envelope::new().with_fields(payload);
    envelope.remove(fields::CORRELATION_ID);
    envelope.set(fields::COMMAND, command);
    envelope
}

/// Parse and classify an inbound payload.
pub fn classify(payload: &str) -> Result<Inbound> {
    let envelope = Envelope::decode(payload)?;
    if envelope.has_correlation_field() {
        if envelope.event_name().is_some() {
            return Err(BridgeError::Protocol(
                "message carries both an event name and a correlation id".to_string(),
            ));
        }
        let id = envelope.correlation_id().ok_or_else(|| {
            BridgeError::Protocol("correlation id is not an unsigned integer".to_string())
        })?;
        return Ok(Inbound::Reply { id, envelope });
    }
    let name = envelope.event_name().unwrap_or_default().to_string();
    Ok(Inbound::Event { name, envelope })
}

/// Parse the direct reply to a blocking call.
pub fn parse_reply(command: &str, payload: &str) -> Result<Envelope> {
    let envelope = Envelope::decode(payload)
        .map_err(|e| BridgeError::Protocol(format!("unparseable reply to '{}': {}", command, e)))?;
    reply_into_result(command, envelope)
}

/// Turn a reply into success or a call error according to its status.
///
/// A reply without a status field counts as success.
pub fn reply_into_result(command: &str, envelope: Envelope) -> Result<Envelope> {
    match envelope.get(fields::RESULT) {
        None => Ok(envelope),
        Some(_) => match envelope.status() {
            Some(Status::Ok) => Ok(envelope),
            Some(Status::Fail) => Err(BridgeError::CallFailed {
                command: command.to_string(),
                reason: envelope.reason().unwrap_or("unknown failure").to_string(),
                code: envelope.code().map(str::to_string),
            }),
            None => Err(BridgeError::Protocol(format!(
                "reply to '{}' has an unrecognized result status",
                command
            ))),
        },
    }
}
