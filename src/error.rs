//! Error taxonomy for the RPC bridge.
//!
//! Server-side failures always become a structured [`Fault`] on the wire,
//! never a dropped or hung call. Client-side failures are surfaced as
//! [`ClientError`] so callers can tell an unreachable server from a rejected
//! command from a command that itself failed. No layer retries anything;
//! retry policy belongs to the caller.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Outcome of dispatching one call: a value or a structured fault.
pub type CallResult = Result<Value, Fault>;

/// Category of a server-reported fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    /// The command name is not in the registry.
    UnknownCommand,
    /// The command ran and failed; the message is the host's error text.
    ExecutionError,
    /// A help lookup named a command the registry does not know.
    NotFound,
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultCode::UnknownCommand => "unknown_command",
            FaultCode::ExecutionError => "execution_error",
            FaultCode::NotFound => "not_found",
        };
        f.write_str(name)
    }
}

/// Structured error returned in place of a successful value.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct Fault {
    pub code: FaultCode,
    pub message: String,
}

impl Fault {
    pub fn unknown_command(name: &str) -> Self {
        Self {
            code: FaultCode::UnknownCommand,
            message: format!("unknown command `{name}`"),
        }
    }

    pub fn execution_error(message: impl fmt::Display) -> Self {
        Self {
            code: FaultCode::ExecutionError,
            message: message.to_string(),
        }
    }

    pub fn not_found(name: &str) -> Self {
        Self {
            code: FaultCode::NotFound,
            message: format!("no help entry for `{name}`"),
        }
    }
}

// Lets host command handlers fail with a bare message via `?` or `into()`;
// a bare message always means the command itself failed.
impl From<String> for Fault {
    fn from(message: String) -> Self {
        Fault::execution_error(message)
    }
}

impl From<&str> for Fault {
    fn from(message: &str) -> Self {
        Fault::execution_error(message)
    }
}

/// Errors surfaced to the caller of a client [`Session`](crate::Session).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server could not be reached at all.
    #[error("failed to connect to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// The connection broke mid-call (reset, timeout, premature EOF).
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The server sent something that is not a valid response envelope.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A request or value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The server reported a structured fault for this call.
    #[error(transparent)]
    Fault(#[from] Fault),
}

impl ClientError {
    /// Fault code if this error is a server-reported fault.
    pub fn fault_code(&self) -> Option<FaultCode> {
        match self {
            ClientError::Fault(fault) => Some(fault.code),
            _ => None,
        }
    }
}
