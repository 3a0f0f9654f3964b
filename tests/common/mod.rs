//! Shared test fixture: a mock visualization host with an observable
//! command surface, served over a real TCP listener.

#![allow(dead_code)]

use mol_remote::{CallArgs, CommandRegistry, RpcServer, ServerConfig, ServerHandle, Value};
use std::thread;
use std::time::Duration;

/// Stand-in for the visualization application's mutable document state.
#[derive(Debug, Default)]
pub struct MockViz {
    /// Loaded object names, in load order.
    pub objects: Vec<String>,
    /// True only while `bump_two_step` is between its two steps.
    pub intermediate_visible: bool,
    /// Completed `bump_two_step` runs.
    pub bump_count: i64,
}

/// Deterministic pseudo-random bytes covering the full byte range.
pub fn pseudo_random_bytes(len: usize) -> Vec<u8> {
    (0..len as u32)
        .map(|i| (i.wrapping_mul(2_654_435_761).wrapping_add(12345) >> 24) as u8)
        .collect()
}

/// Command surface of the mock host.
pub fn mock_registry() -> CommandRegistry<MockViz> {
    let mut registry = CommandRegistry::new();

    registry.register_with_help(
        "fetch",
        "fetch(code)",
        "Load a structure by identifier.\n\nMay be slow: contacts the structure database.",
        |host: &mut MockViz, args: &CallArgs| {
            let code = args.require_str(0, "code")?;
            host.objects.push(code.to_string());
            Ok(Value::Null)
        },
    );

    registry.register_with_help(
        "get_names",
        "get_names()",
        "Names of all loaded objects, in load order.",
        |host: &mut MockViz, _args| {
            Ok(Value::List(
                host.objects.iter().cloned().map(Value::Str).collect(),
            ))
        },
    );

    registry.register_with_help(
        "delete_all",
        "delete_all()",
        "Remove every loaded object.",
        |host: &mut MockViz, _args| {
            host.objects.clear();
            Ok(Value::Null)
        },
    );

    registry.register_with_help(
        "render_png",
        "render_png()",
        "Render the current scene and return the image bytes.",
        |host: &mut MockViz, _args| {
            if host.objects.is_empty() {
                return Err("no molecules loaded".into());
            }
            Ok(Value::Bytes(pseudo_random_bytes(10_000)))
        },
    );

    registry.register_with_help(
        "echo",
        "echo(value)",
        "Return the first argument unchanged.",
        |_host, args: &CallArgs| Ok(args.arg(0).cloned().unwrap_or(Value::Null)),
    );

    // Deliberately registered without help text.
    registry.register("undocumented_tool", |_host, _args| Ok(Value::Int(1)));

    registry.register_with_help(
        "huge_result",
        "huge_result()",
        "Return a string too large for one envelope line.",
        |_host, _args| {
            Ok(Value::Str(
                "x".repeat(mol_remote::protocol::MAX_LINE_BYTES + 16),
            ))
        },
    );

    registry.register_with_help(
        "bump_two_step",
        "bump_two_step()",
        "Two-step mutation: raises an intermediate flag, holds it briefly,\n\
         then clears it and increments the bump counter.",
        |host: &mut MockViz, _args| {
            host.intermediate_visible = true;
            thread::sleep(Duration::from_millis(100));
            host.intermediate_visible = false;
            host.bump_count += 1;
            Ok(Value::Int(host.bump_count))
        },
    );

    registry.register_with_help(
        "observe_intermediate",
        "observe_intermediate()",
        "Whether the two-step intermediate state is currently visible.",
        |host: &mut MockViz, _args| Ok(Value::Bool(host.intermediate_visible)),
    );

    registry.register_with_help(
        "get_bump_count",
        "get_bump_count()",
        "Number of completed bump_two_step runs.",
        |host: &mut MockViz, _args| Ok(Value::Int(host.bump_count)),
    );

    registry
}

/// Spawn a server for the mock host on an ephemeral loopback port.
pub fn spawn_mock_server() -> ServerHandle {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();

    RpcServer::new(MockViz::default(), mock_registry())
        .with_config(ServerConfig::default().with_port(0))
        .spawn()
        .expect("mock server should bind an ephemeral loopback port")
}
