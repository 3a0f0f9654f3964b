//! Client session for a remote visualization host.
//!
//! A [`Session`] is a connection-oriented handle to one server. Every call
//! is forwarded explicitly through [`Session::call`]; the command set is
//! whatever the server registered at start, nothing is bound at build time.
//! Calls are strictly synchronous: the calling thread blocks for the full
//! request/response round trip, and there is exactly one outstanding call
//! per session.
//!
//! `help` and `print_help` are resolved locally against a lazily fetched
//! mirror of the server's registry metadata (see [`Session::help`]).

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::protocol::{self, CallRequest, ProtocolError, Request, Response};
use crate::registry::HelpEntry;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, BufReader};
use std::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info};

/// Client-held handle to a running RPC server.
pub struct Session {
    hostname: String,
    port: u16,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    /// Local mirror of the server's help metadata. No TTL, no invalidation:
    /// command-set changes after the first fetch are an accepted
    /// inconsistency. `refresh_help` is the explicit way out.
    help_cache: Option<BTreeMap<String, HelpEntry>>,
}

impl Session {
    /// Connect to `hostname:port` and verify the server answers an
    /// `is_alive` probe.
    pub fn connect(hostname: &str, port: u16) -> Result<Self, ClientError> {
        Self::connect_with(&ClientConfig::new(hostname, port))
    }

    /// Connect using explicit configuration (environment-sourced via
    /// [`ClientConfig::from_env`]).
    pub fn connect_with(config: &ClientConfig) -> Result<Self, ClientError> {
        let connect_failed = |source: io::Error| ClientError::ConnectionFailed {
            host: config.hostname.clone(),
            port: config.port,
            source,
        };

        let addr = (config.hostname.as_str(), config.port)
            .to_socket_addrs()
            .map_err(connect_failed)?
            .next()
            .ok_or_else(|| {
                connect_failed(io::Error::new(
                    io::ErrorKind::NotFound,
                    "hostname did not resolve",
                ))
            })?;

        info!(host = %config.hostname, port = config.port, "connecting to rpc server");
        let stream =
            TcpStream::connect_timeout(&addr, config.connect_timeout).map_err(connect_failed)?;
        stream.set_nodelay(true).map_err(connect_failed)?;
        let reader_stream = stream.try_clone().map_err(connect_failed)?;

        let mut session = Self {
            hostname: config.hostname.clone(),
            port: config.port,
            reader: BufReader::new(reader_stream),
            writer: stream,
            help_cache: None,
        };

        // Liveness probe: a listening socket is not enough, the dispatcher
        // behind it has to answer.
        match session.call("is_alive", vec![], BTreeMap::new())? {
            Value::Bool(true) => Ok(session),
            other => Err(ClientError::MalformedResponse(format!(
                "unexpected is_alive reply: {other:?}"
            ))),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Invoke a remote command with positional and keyword arguments.
    ///
    /// Blocks until the server replies; a slow host command (a structure
    /// fetch, a ray trace) keeps the caller blocked for its full duration.
    /// On success the decoded value is returned; a server-reported fault
    /// becomes [`ClientError::Fault`].
    pub fn call(
        &mut self,
        command: &str,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
    ) -> Result<Value, ClientError> {
        let request = Request::Call(
            CallRequest::new(command)
                .with_args(args)
                .with_kwargs(kwargs),
        );

        debug!(command, "forwarding call");
        protocol::write_message(&mut self.writer, &request).map_err(write_error)?;

        match protocol::read_message::<_, Response>(&mut self.reader) {
            Ok(Some(response)) => response.into_result().map_err(ClientError::from),
            Ok(None) => Err(ClientError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection before replying",
            ))),
            Err(e) => Err(read_error(e)),
        }
    }

    /// Invoke a remote command that takes no arguments.
    pub fn call0(&mut self, command: &str) -> Result<Value, ClientError> {
        self.call(command, vec![], BTreeMap::new())
    }

    /// With no argument: a one-line-per-command listing of everything the
    /// server exposes, fetching the full registry metadata on first use.
    /// With a command name: that command's full help text, fetched
    /// individually on a cache miss. An unknown name surfaces the server's
    /// `not_found` fault.
    pub fn help(&mut self, command: Option<&str>) -> Result<String, ClientError> {
        match command {
            None => {
                let cache = self.ensure_cache()?;
                let mut text = String::from("Available commands:\n");
                for entry in cache.values() {
                    text.push_str(&format!("  {:<24} {}\n", entry.name, entry.short_doc()));
                }
                Ok(text)
            }
            Some(name) => {
                let entry = self.help_entry(name)?;
                Ok(format!("{}\n    {}\n", entry.signature, entry.doc))
            }
        }
    }

    /// Cached [`HelpEntry`] for one command, fetching on a miss.
    pub fn help_entry(&mut self, name: &str) -> Result<HelpEntry, ClientError> {
        if let Some(entry) = self
            .help_cache
            .as_ref()
            .and_then(|cache| cache.get(name))
        {
            return Ok(entry.clone());
        }

        let value = self.call("get_help", vec![Value::Str(name.to_string())], BTreeMap::new())?;
        let entry = HelpEntry::from_value(name, &value);
        self.help_cache
            .get_or_insert_with(BTreeMap::new)
            .insert(name.to_string(), entry.clone());
        Ok(entry)
    }

    /// Render the full local help cache as text. Issues network traffic
    /// only if the cache has never been populated.
    pub fn help_text(&mut self) -> Result<String, ClientError> {
        let hostname = self.hostname.clone();
        let port = self.port;
        let cache = self.ensure_cache()?;

        let mut text = format!(
            "Remote session with the visualization host at {hostname}:{port}.\n\
             \n\
             Any host command can be invoked through `call`, for example:\n\
             \n\
                 session.call(\"fetch\", vec![\"6lyz\".into()], Default::default())?;\n\
             \n\
             Use `help(None)` for a one-line listing and `help(Some(name))`\n\
             for a single command.\n\
             \n\
             Commands:\n\n"
        );
        for entry in cache.values() {
            text.push_str(&format!("{}\n    {}\n\n", entry.signature, entry.doc));
        }
        Ok(text)
    }

    /// Print [`Session::help_text`] to stdout.
    pub fn print_help(&mut self) -> Result<(), ClientError> {
        let text = self.help_text()?;
        println!("{text}");
        Ok(())
    }

    /// Drop the local help cache and refetch it. The only way the mirror
    /// ever observes server-side changes.
    pub fn refresh_help(&mut self) -> Result<(), ClientError> {
        self.help_cache = None;
        self.ensure_cache()?;
        Ok(())
    }

    /// Number of locally cached help entries (0 before first use).
    pub fn cached_help_len(&self) -> usize {
        self.help_cache.as_ref().map_or(0, BTreeMap::len)
    }

    /// Shut down the underlying connection. Cached help stays usable;
    /// any further remote call fails with a transport error.
    pub fn close(&mut self) -> Result<(), ClientError> {
        self.writer
            .shutdown(std::net::Shutdown::Both)
            .map_err(ClientError::Transport)
    }

    /// Populate the cache from `describe_commands` if it is empty.
    fn ensure_cache(&mut self) -> Result<&BTreeMap<String, HelpEntry>, ClientError> {
        if self.help_cache.is_none() {
            let value = self.call0("describe_commands")?;
            let map = value.as_map().ok_or_else(|| {
                ClientError::MalformedResponse(
                    "describe_commands did not return a map".to_string(),
                )
            })?;

            let cache: BTreeMap<String, HelpEntry> = map
                .iter()
                .map(|(name, entry)| (name.clone(), HelpEntry::from_value(name, entry)))
                .collect();
            debug!(commands = cache.len(), "help cache populated");
            self.help_cache = Some(cache);
        }
        Ok(self.help_cache.as_ref().expect("populated above"))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({}:{})", self.hostname, self.port)
    }
}

fn write_error(e: ProtocolError) -> ClientError {
    match e {
        ProtocolError::Io(io) => ClientError::Transport(io),
        other => ClientError::Serialization(other.to_string()),
    }
}

fn read_error(e: ProtocolError) -> ClientError {
    match e {
        ProtocolError::Io(io) => ClientError::Transport(io),
        other => ClientError::MalformedResponse(other.to_string()),
    }
}
