//! Command registry: the authoritative mapping from command name to an
//! executable binding plus optional help text.
//!
//! The registry is built by the host integration at server start, one
//! registration per command the host exposes at that moment. It is frozen
//! once the server takes ownership; the command surface never changes for
//! the lifetime of the server process.

use crate::error::{CallResult, Fault};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// Placeholder used wherever a command carries no documentation. Missing
/// help is never a fault.
pub const NO_DOC_PLACEHOLDER: &str = "(no documentation available)";

/// Positional and keyword arguments for one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new(args: Vec<Value>, kwargs: BTreeMap<String, Value>) -> Self {
        Self { args, kwargs }
    }

    pub fn positional(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: BTreeMap::new(),
        }
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }

    /// Argument at `index`, or the keyword of the same name. Host commands
    /// accept either spelling, like the scripting layer they mirror.
    pub fn arg_or_kwarg(&self, index: usize, name: &str) -> Option<&Value> {
        self.arg(index).or_else(|| self.kwarg(name))
    }

    /// Required string argument, with the host-style error text on a miss.
    pub fn require_str(&self, index: usize, name: &str) -> Result<&str, Fault> {
        self.arg_or_kwarg(index, name)
            .and_then(Value::as_str)
            .ok_or_else(|| Fault::execution_error(format!("expected a string for `{name}`")))
    }
}

/// Help metadata for one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelpEntry {
    pub name: String,
    /// Signature text, e.g. `fetch(code, type="pdb")`.
    pub signature: String,
    /// Free-text docstring; [`NO_DOC_PLACEHOLDER`] when the command has none.
    pub doc: String,
}

impl HelpEntry {
    /// First non-empty docstring line, for one-line listings.
    pub fn short_doc(&self) -> &str {
        self.doc
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or(NO_DOC_PLACEHOLDER)
    }

    /// Wire form: `{"name":.., "signature":.., "doc":..}` as a [`Value`].
    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::Str(self.name.clone()));
        map.insert("signature".to_string(), Value::Str(self.signature.clone()));
        map.insert("doc".to_string(), Value::Str(self.doc.clone()));
        Value::Map(map)
    }

    /// Rebuild an entry from its wire form. Missing fields fall back to the
    /// signature placeholder and the no-doc placeholder.
    pub fn from_value(name: &str, value: &Value) -> Self {
        let field = |key: &str| {
            value
                .as_map()
                .and_then(|map| map.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            name: name.to_string(),
            signature: field("signature").unwrap_or_else(|| format!("{name}(...)")),
            doc: field("doc").unwrap_or_else(|| NO_DOC_PLACEHOLDER.to_string()),
        }
    }
}

/// Handler bound to a command name. Runs with exclusive access to the host
/// state; a bare error message becomes an `execution_error` fault.
pub type CommandFn<S> = Box<dyn Fn(&mut S, &CallArgs) -> CallResult + Send>;

struct CommandBinding<S> {
    handler: CommandFn<S>,
    signature: Option<String>,
    doc: Option<String>,
}

/// Mapping of command name → executable binding + help, generic over the
/// host application state `S`.
pub struct CommandRegistry<S> {
    commands: BTreeMap<String, CommandBinding<S>>,
}

impl<S> Default for CommandRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> CommandRegistry<S> {
    pub fn new() -> Self {
        Self {
            commands: BTreeMap::new(),
        }
    }

    /// Register a command without help text. Re-registering a name replaces
    /// the previous binding.
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&mut S, &CallArgs) -> CallResult + Send + 'static,
    {
        self.commands.insert(
            name.to_string(),
            CommandBinding {
                handler: Box::new(handler),
                signature: None,
                doc: None,
            },
        );
    }

    /// Register a command with signature and docstring.
    pub fn register_with_help<F>(&mut self, name: &str, signature: &str, doc: &str, handler: F)
    where
        F: Fn(&mut S, &CallArgs) -> CallResult + Send + 'static,
    {
        self.commands.insert(
            name.to_string(),
            CommandBinding {
                handler: Box::new(handler),
                signature: Some(signature.to_string()),
                doc: Some(doc.to_string()),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// All command names, sorted.
    pub fn list_commands(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }

    /// Help entry for one command, or `None` if the name is unknown.
    pub fn get_help(&self, name: &str) -> Option<HelpEntry> {
        self.commands.get(name).map(|binding| HelpEntry {
            name: name.to_string(),
            signature: binding
                .signature
                .clone()
                .unwrap_or_else(|| format!("{name}(...)")),
            doc: binding
                .doc
                .clone()
                .unwrap_or_else(|| NO_DOC_PLACEHOLDER.to_string()),
        })
    }

    /// Invoke a command. `None` means the name is not registered; argument
    /// validation is entirely the handler's business.
    pub fn invoke(&self, state: &mut S, name: &str, args: &CallArgs) -> Option<CallResult> {
        self.commands
            .get(name)
            .map(|binding| (binding.handler)(state, args))
    }

    /// Install the built-in introspection commands and freeze a help
    /// snapshot for them to serve. Called once by the server after the host
    /// integration has registered everything else.
    pub fn install_introspection(&mut self) {
        let snapshot: Arc<OnceLock<BTreeMap<String, HelpEntry>>> = Arc::new(OnceLock::new());

        self.register_with_help(
            "is_alive",
            "is_alive()",
            "Ping the server to check that it is running and responsive.",
            |_state, _args| Ok(Value::Bool(true)),
        );

        let snap = Arc::clone(&snapshot);
        self.register_with_help(
            "list_commands",
            "list_commands()",
            "List the names of every command the server exposes.",
            move |_state, _args| {
                let names = snap
                    .get()
                    .map(|entries| entries.keys().cloned().map(Value::Str).collect())
                    .unwrap_or_default();
                Ok(Value::List(names))
            },
        );

        let snap = Arc::clone(&snapshot);
        self.register_with_help(
            "get_help",
            "get_help(command)",
            "Help entry (signature and docstring) for one command.",
            move |_state, args: &CallArgs| {
                let name = args.require_str(0, "command")?;
                snap.get()
                    .and_then(|entries| entries.get(name))
                    .map(HelpEntry::to_value)
                    .ok_or_else(|| Fault::not_found(name))
            },
        );

        let snap = Arc::clone(&snapshot);
        self.register_with_help(
            "describe_commands",
            "describe_commands()",
            "Full registry snapshot: every command with signature and docstring.",
            move |_state, _args| {
                let map = snap
                    .get()
                    .map(|entries| {
                        entries
                            .iter()
                            .map(|(name, entry)| (name.clone(), entry.to_value()))
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(Value::Map(map))
            },
        );

        // Snapshot taken after the built-ins themselves are registered, so
        // they show up in their own listings.
        let entries: BTreeMap<String, HelpEntry> = self
            .commands
            .keys()
            .filter_map(|name| self.get_help(name).map(|entry| (name.clone(), entry)))
            .collect();
        snapshot.set(entries).ok();
    }
}
