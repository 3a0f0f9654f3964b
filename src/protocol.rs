//! Call envelope and wire codec.
//!
//! Newline-delimited JSON over a connection-oriented stream. Each call is one
//! request line answered by exactly one response line:
//!
//! ```text
//! -> {"type":"call","command":"fetch","args":[...],"kwargs":{...}}
//! <- {"type":"result","value":{"t":"null"}}
//! <- {"type":"fault","code":"unknown_command","message":"..."}
//! ```
//!
//! Binary payloads ride inside [`Value::Bytes`](crate::Value) as base64 text,
//! so the envelope stays pure UTF-8. There is no chunking or streaming: a
//! response, however large, is buffered whole before it is written.

use crate::error::{CallResult, Fault, FaultCode};
use crate::value::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, BufRead, Read, Write};
use thiserror::Error;

/// Upper bound on one envelope line (guards against memory exhaustion).
pub const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

/// One command invocation as sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Name of the command to invoke.
    pub command: String,
    /// Ordered positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
}

impl CallRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: BTreeMap<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }
}

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Call(CallRequest),
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Result { value: Value },
    Fault { code: FaultCode, message: String },
}

impl Response {
    pub fn from_result(result: CallResult) -> Self {
        match result {
            Ok(value) => Response::Result { value },
            Err(fault) => Response::Fault {
                code: fault.code,
                message: fault.message,
            },
        }
    }

    pub fn into_result(self) -> CallResult {
        match self {
            Response::Result { value } => Ok(value),
            Response::Fault { code, message } => Err(Fault { code, message }),
        }
    }
}

/// Errors raised by the wire codec.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid message: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error("message too large: {0} bytes")]
    TooLarge(usize),
}

/// Encode a message as a single JSON line (newline included).
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let json = serde_json::to_string(message)?;
    if json.len() > MAX_LINE_BYTES {
        return Err(ProtocolError::TooLarge(json.len()));
    }
    Ok(format!("{json}\n"))
}

/// Decode a message from one JSON line.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    Ok(serde_json::from_str(line.trim_end())?)
}

/// Write one message and flush, so the peer never waits on a buffered line.
pub fn write_message<W: Write, T: Serialize>(
    writer: &mut W,
    message: &T,
) -> Result<(), ProtocolError> {
    let line = encode_line(message)?;
    writer.write_all(line.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Read one message. Returns `Ok(None)` on a clean EOF between messages.
///
/// The read is capped at [`MAX_LINE_BYTES`]: a peer streaming an oversized
/// or newline-free line is rejected without the whole line being buffered.
pub fn read_message<R: BufRead, T: DeserializeOwned>(
    reader: &mut R,
) -> Result<Option<T>, ProtocolError> {
    let mut line = String::new();
    let n = reader
        .by_ref()
        .take(MAX_LINE_BYTES as u64 + 1)
        .read_line(&mut line)?;
    if n == 0 {
        return Ok(None);
    }
    if n > MAX_LINE_BYTES {
        return Err(ProtocolError::TooLarge(n));
    }
    decode_line(&line).map(Some)
}
