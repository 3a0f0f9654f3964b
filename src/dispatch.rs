//! Executes one call request against the live host application state.
//!
//! A dispatch is total: every request produces exactly one [`CallResult`],
//! never a hang and never an escaped panic. Unknown names fault with
//! `unknown_command`; anything the handler raises, including a panic, is
//! captured as `execution_error` with the cause stringified verbatim.

use crate::error::{CallResult, Fault};
use crate::protocol::CallRequest;
use crate::registry::{CallArgs, CommandRegistry};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::debug;

/// Run `request` against `state` through the registry binding.
pub fn dispatch<S>(
    registry: &CommandRegistry<S>,
    state: &mut S,
    request: &CallRequest,
) -> CallResult {
    if !registry.contains(&request.command) {
        return Err(Fault::unknown_command(&request.command));
    }

    debug!(command = %request.command, args = request.args.len(), "dispatching");
    let args = CallArgs::new(request.args.clone(), request.kwargs.clone());

    // The handler runs while the caller holds the host-state lock, so a
    // panic must not unwind past the guard.
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        registry.invoke(state, &request.command, &args)
    }));

    match outcome {
        Ok(Some(result)) => result,
        Ok(None) => Err(Fault::unknown_command(&request.command)),
        Err(panic) => Err(Fault::execution_error(format!(
            "command `{}` panicked: {}",
            request.command,
            panic_message(&panic)
        ))),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FaultCode;
    use crate::value::Value;

    struct Host {
        document_loaded: bool,
    }

    fn registry() -> CommandRegistry<Host> {
        let mut registry = CommandRegistry::new();
        registry.register("get_title", |host: &mut Host, _args| {
            if host.document_loaded {
                Ok(Value::Str("6lyz".to_string()))
            } else {
                Err("no molecules loaded".into())
            }
        });
        registry.register("crash", |_host: &mut Host, _args| {
            panic!("internal renderer failure")
        });
        registry
    }

    #[test]
    fn test_dispatch_success() {
        let registry = registry();
        let mut host = Host {
            document_loaded: true,
        };
        let result = dispatch(&registry, &mut host, &CallRequest::new("get_title"));
        assert_eq!(result.unwrap(), Value::Str("6lyz".to_string()));
    }

    #[test]
    fn test_unknown_command_never_execution_error() {
        let registry = registry();
        let mut host = Host {
            document_loaded: true,
        };
        let fault = dispatch(&registry, &mut host, &CallRequest::new("no_such_cmd")).unwrap_err();
        assert_eq!(fault.code, FaultCode::UnknownCommand);
    }

    #[test]
    fn test_handler_error_forwarded_verbatim() {
        let registry = registry();
        let mut host = Host {
            document_loaded: false,
        };
        let fault = dispatch(&registry, &mut host, &CallRequest::new("get_title")).unwrap_err();
        assert_eq!(fault.code, FaultCode::ExecutionError);
        assert_eq!(fault.message, "no molecules loaded");
    }

    #[test]
    fn test_panic_captured_as_execution_error() {
        let registry = registry();
        let mut host = Host {
            document_loaded: true,
        };
        let fault = dispatch(&registry, &mut host, &CallRequest::new("crash")).unwrap_err();
        assert_eq!(fault.code, FaultCode::ExecutionError);
        assert!(fault.message.contains("internal renderer failure"));
    }
}
