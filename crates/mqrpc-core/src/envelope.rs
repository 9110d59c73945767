//! Request/response envelope codec
//!
//! Wire format (JSON, UTF-8):
//!
//! ```text
//! Request:  { "command": <string>, "data": { "0": <arg>, "1": <arg>, ... } }
//! Response: { "_data": <result> }   // key absent for void or failed calls
//! ```
//!
//! The argument container is a JSON object keyed by stringified position.
//! It is always read back by numeric index, never by map iteration order,
//! so `"10"` sorts after `"9"` regardless of how the object was serialized.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::args::RawArgs;
use crate::{Result, RpcError};

/// Key holding the command name in a request
pub const COMMAND_KEY: &str = "command";
/// Key holding the positional argument container in a request
pub const ARGS_KEY: &str = "data";
/// Key holding the handler result in a response
pub const RESULT_KEY: &str = "_data";

/// A decoded request whose arguments are still in raw form
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    /// Command to dispatch
    pub command: String,
    /// Positional arguments, decoded per handler parameter after lookup
    pub args: RawArgs,
}

struct PositionalArgs<'a>(&'a [Value]);

impl Serialize for PositionalArgs<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (index, value) in self.0.iter().enumerate() {
            map.serialize_entry(&index.to_string(), value)?;
        }
        map.end()
    }
}

#[derive(Serialize)]
struct OutboundRequest<'a> {
    command: &'a str,
    data: PositionalArgs<'a>,
}

#[derive(Serialize, Deserialize, Default)]
struct WireResponse {
    #[serde(rename = "_data", default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// Encode a request envelope.
///
/// Fails with [`RpcError::Protocol`] for an empty command.
pub fn encode_request(command: &str, args: &[Value]) -> Result<Vec<u8>> {
    if command.trim().is_empty() {
        return Err(RpcError::protocol("request command must not be empty"));
    }
    let request = OutboundRequest {
        command,
        data: PositionalArgs(args),
    };
    Ok(serde_json::to_vec(&request)?)
}

/// Decode a request envelope, keeping arguments in raw form.
///
/// Fails with [`RpcError::Protocol`] when the payload is not a JSON object,
/// the command is missing or empty, or the argument container is missing
/// or not keyed by position.
pub fn decode_request(bytes: &[u8]) -> Result<RequestEnvelope> {
    let root: Value = serde_json::from_slice(bytes)
        .map_err(|e| RpcError::protocol(format!("request is not valid JSON: {e}")))?;
    let Value::Object(mut root) = root else {
        return Err(RpcError::protocol("request is not a JSON object"));
    };

    let command = match root.remove(COMMAND_KEY) {
        Some(Value::String(command)) if !command.trim().is_empty() => command,
        Some(Value::String(_)) | Some(Value::Null) | None => {
            return Err(RpcError::protocol("request command is missing or empty"));
        }
        Some(other) => {
            return Err(RpcError::protocol(format!(
                "request command must be a string, got {other}"
            )));
        }
    };

    let data = match root.remove(ARGS_KEY) {
        Some(Value::Object(data)) => data,
        Some(Value::Null) | None => {
            return Err(RpcError::protocol(format!(
                "request '{command}' has no argument container"
            )));
        }
        Some(other) => {
            return Err(RpcError::protocol(format!(
                "request '{command}' argument container must be an object, got {other}"
            )));
        }
    };

    let args = positional_args(&command, data)?;
    Ok(RequestEnvelope { command, args })
}

fn positional_args(command: &str, data: Map<String, Value>) -> Result<RawArgs> {
    let mut indexed = Vec::with_capacity(data.len());
    for (key, value) in data {
        let index: usize = key.parse().map_err(|_| {
            RpcError::protocol(format!(
                "request '{command}' argument key '{key}' is not a position"
            ))
        })?;
        indexed.push((index, value));
    }

    let len = indexed.iter().map(|(index, _)| index.saturating_add(1)).max().unwrap_or(0);
    if len > indexed.len() * 2 + 16 {
        return Err(RpcError::protocol(format!(
            "request '{command}' argument positions are too sparse ({} values, highest position {})",
            indexed.len(),
            len - 1
        )));
    }

    let mut slots = vec![None; len];
    for (index, value) in indexed {
        slots[index] = Some(value);
    }
    Ok(RawArgs::from_slots(slots))
}

/// Encode a response envelope; `None` and JSON `null` both encode as void
pub fn encode_response(result: Option<&Value>) -> Result<Vec<u8>> {
    let response = WireResponse {
        data: result.filter(|value| !value.is_null()).cloned(),
    };
    Ok(serde_json::to_vec(&response)?)
}

/// Decode a response envelope into its optional result
pub fn decode_response(bytes: &[u8]) -> Result<Option<Value>> {
    let response: WireResponse = serde_json::from_slice(bytes)?;
    Ok(response.data.filter(|value| !value.is_null()))
}
