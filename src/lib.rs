// Library interface for mol-remote
// Server side: command registry, dispatcher, TCP listener.
// Client side: session with explicit call forwarding and a lazy help cache.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod value;

pub use client::Session;
pub use config::{ClientConfig, ServerConfig};
pub use error::{CallResult, ClientError, Fault, FaultCode};
pub use protocol::{CallRequest, Request, Response};
pub use registry::{CallArgs, CommandRegistry, HelpEntry};
pub use server::{RpcServer, ServerHandle};
pub use value::Value;
