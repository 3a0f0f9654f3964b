//! TCP listener for the RPC bridge.
//!
//! The listener runs inside the host application's process (started there by
//! the launcher). It accepts any number of connections, but command
//! execution is serialized: host state and registry live behind a single
//! mutex, so at most one command runs at a time no matter how many clients
//! are connected. The host application is not assumed safe under concurrent
//! mutation.

use crate::config::ServerConfig;
use crate::dispatch;
use crate::error::FaultCode;
use crate::protocol::{self, ProtocolError, Request, Response};
use crate::registry::CommandRegistry;
use anyhow::{anyhow, Context, Result};
use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Poll interval for the non-blocking accept loop.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Registry and host state, behind the one lock that serializes dispatch.
struct HostRuntime<S> {
    registry: CommandRegistry<S>,
    state: S,
}

/// The RPC server: owns the host state, the registry, and the socket.
pub struct RpcServer<S> {
    runtime: Arc<Mutex<HostRuntime<S>>>,
    config: ServerConfig,
}

impl<S: Send + 'static> RpcServer<S> {
    /// Take ownership of the host state and its command registry. The
    /// built-in introspection commands (`is_alive`, `list_commands`,
    /// `get_help`, `describe_commands`) are installed here; the command
    /// surface is frozen from this point on.
    pub fn new(state: S, mut registry: CommandRegistry<S>) -> Self {
        registry.install_introspection();
        Self {
            runtime: Arc::new(Mutex::new(HostRuntime { registry, state })),
            config: ServerConfig::from_env(),
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind and serve on the calling thread until the process exits.
    pub fn serve_forever(self) -> Result<()> {
        let listener = self.bind()?;
        let never_shutdown = Arc::new(AtomicBool::new(false));
        accept_loop(listener, self.runtime, &never_shutdown)
    }

    /// Bind, then serve on a background thread. The returned handle reports
    /// the bound address and stops the loop when shut down or dropped.
    pub fn spawn(self) -> Result<ServerHandle> {
        let listener = self.bind()?;
        let addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));

        let runtime = self.runtime;
        let flag = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name("molremote-listener".to_string())
            .spawn(move || {
                if let Err(e) = accept_loop(listener, runtime, &flag) {
                    warn!("listener stopped: {e}");
                }
            })
            .context("failed to spawn listener thread")?;

        Ok(ServerHandle {
            addr,
            shutdown,
            thread: Some(thread),
        })
    }

    /// Bind the configured address, trying consecutive ports when busy.
    fn bind(&self) -> Result<TcpListener> {
        let config = &self.config;
        if !config.is_loopback_only() {
            warn!(
                host = %config.host,
                "binding beyond loopback: the host application is reachable from the network"
            );
        }

        // Port 0 is an ephemeral-port request; retrying offsets of 0 makes
        // no sense there.
        let tries = if config.port == 0 {
            1
        } else {
            config.ports_to_try
        };

        for offset in 0..tries {
            let port = config.port.saturating_add(offset);
            match TcpListener::bind((config.host.as_str(), port)) {
                Ok(listener) => {
                    let addr = listener.local_addr()?;
                    info!(%addr, "rpc server listening");
                    return Ok(listener);
                }
                Err(e) => {
                    warn!(host = %config.host, port, "bind failed: {e}");
                }
            }
        }

        Err(anyhow!(
            "could not bind {} on any port in {}..={}",
            config.host,
            config.port,
            config.port.saturating_add(tries.saturating_sub(1))
        ))
    }
}

/// Handle to a server running on a background thread.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and join the listener thread. Connection threads are
    /// detached and keep serving their open connections until the clients
    /// disconnect.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Accept connections until the shutdown flag is set. Non-blocking accept
/// with a short sleep so the flag is observed promptly.
fn accept_loop<S: Send + 'static>(
    listener: TcpListener,
    runtime: Arc<Mutex<HostRuntime<S>>>,
    shutdown: &AtomicBool,
) -> Result<()> {
    listener.set_nonblocking(true)?;

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                debug!(%peer, "client connected");

                let runtime = Arc::clone(&runtime);
                thread::Builder::new()
                    .name(format!("molremote-conn-{peer}"))
                    .spawn(move || handle_connection(stream, &runtime))
                    .context("failed to spawn connection thread")?;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                warn!("accept failed: {e}");
                thread::sleep(Duration::from_millis(100));
            }
        }
    }

    Ok(())
}

/// Serve one connection: read a call, dispatch it under the host-state
/// lock, write exactly one response. Repeats until the client goes away.
fn handle_connection<S>(stream: TcpStream, runtime: &Arc<Mutex<HostRuntime<S>>>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let reader_stream = match stream.try_clone() {
        Ok(cloned) => cloned,
        Err(e) => {
            warn!(%peer, "could not clone stream: {e}");
            return;
        }
    };
    let mut reader = BufReader::new(reader_stream);
    let mut writer = stream;

    loop {
        let request = match protocol::read_message::<_, Request>(&mut reader) {
            Ok(Some(Request::Call(request))) => request,
            Ok(None) => {
                debug!(%peer, "client disconnected");
                return;
            }
            Err(e) => {
                debug!(%peer, "dropping connection after protocol error: {e}");
                return;
            }
        };

        let result = {
            // Serialization point: one command at a time, across all
            // connections. A poisoned lock is recovered rather than
            // wedging the server; dispatch already contains panics.
            let mut guard = match runtime.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let HostRuntime { registry, state } = &mut *guard;
            dispatch::dispatch(registry, state, &request)
        };

        let response = Response::from_result(result);
        match protocol::write_message(&mut writer, &response) {
            Ok(()) => {}
            Err(ProtocolError::Io(e)) => {
                // Client vanished mid-call; execution already happened, the
                // reply is simply discarded.
                debug!(%peer, command = %request.command, "reply discarded: {e}");
                return;
            }
            Err(e) => {
                // The result itself could not be put on the wire (oversized
                // or unencodable). The call still gets its fault entry.
                warn!(%peer, command = %request.command, "result not encodable: {e}");
                let fault = Response::Fault {
                    code: FaultCode::ExecutionError,
                    message: format!(
                        "result of `{}` could not be encoded: {e}",
                        request.command
                    ),
                };
                if let Err(e) = protocol::write_message(&mut writer, &fault) {
                    debug!(%peer, command = %request.command, "reply discarded: {e}");
                    return;
                }
            }
        }
    }
}
