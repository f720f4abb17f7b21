//! Local socket server: one connection, one request line, one response line.

pub mod channel;
pub mod client;
pub mod tracer;

pub use channel::{channel_name_from_env, socket_path, CHANNEL_ENV, DEFAULT_CHANNEL_NAME};
pub use client::BridgeClient;
pub use tracer::{Direction, ExchangeTracer};

use crate::protocol::{BridgeResult, Command, HookState, ReasonCode};
use crate::{debug_on_err, diagnostics, warn_on_err};
use anyhow::Context;
use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Longest accepted request line, terminator included.
pub const MAX_LINE_LEN: u64 = 64 * 1024;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Turns a decoded command into a result.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, command: &Command) -> BridgeResult;
}

/// Server configuration. Consumed by [`BridgeServer::start`].
pub struct BridgeServer {
    channel: String,
    handler: Option<Arc<dyn CommandHandler>>,
    tracer: Option<ExchangeTracer>,
}

impl BridgeServer {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            handler: None,
            tracer: None,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Record every exchange into the tracer.
    pub fn with_tracer(mut self, tracer: ExchangeTracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Decode a request line, dispatch it and encode the response.
    pub fn handle_raw_command(&self, line: &str) -> String {
        self.handle_command(Command::decode(line)).encode()
    }

    fn handle_command(&self, command: Command) -> BridgeResult {
        if command.command_id.is_empty() {
            log::warn!(target: "bridge", "request without commandId rejected");
            return BridgeResult::new(
                "",
                false,
                ReasonCode::CapabilityBackendUnavailable,
                HookState::InvalidCommand,
                "Command id is missing.",
                diagnostics! {"parseError" => "missing_commandId"},
            );
        }

        let Some(handler) = &self.handler else {
            return BridgeResult::new(
                &command.command_id,
                false,
                ReasonCode::CapabilityBackendUnavailable,
                HookState::HandlerMissing,
                "No command handler is registered.",
                diagnostics! {"featureId" => command.feature_id},
            );
        };

        let mut result = handler.handle(&command);
        if result.command_id.is_empty() {
            result.command_id = command.command_id;
        }
        if result.backend.is_empty() {
            result.backend = crate::protocol::BACKEND.to_string();
        }
        result
    }

    /// Bind the channel socket and spawn the worker serving it.
    ///
    /// Fails if the socket cannot be bound or a live server already owns the channel.
    pub fn start(self) -> anyhow::Result<ServerHandle> {
        let path = socket_path(&self.channel);
        let listener = bind(&path)?;
        log::info!(target: "bridge", "listening on {}", path.display());

        let running = Arc::new(AtomicBool::new(true));
        let worker = {
            let running = running.clone();
            thread::Builder::new()
                .name("extender-bridge".to_string())
                .spawn(move || self.serve(listener, &running))
                .context("spawn bridge worker")?
        };

        Ok(ServerHandle {
            path,
            running,
            worker: Some(worker),
        })
    }

    fn serve(&self, listener: UnixListener, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            let stream = match listener.accept() {
                Ok((stream, _)) => stream,
                Err(err) => {
                    log::warn!(target: "bridge", "accept failed: {err:#}");
                    thread::sleep(ACCEPT_RETRY_DELAY);
                    continue;
                }
            };
            if !running.load(Ordering::SeqCst) {
                break;
            }
            self.serve_connection(stream);
        }
        log::debug!(target: "bridge", "worker stopped");
    }

    fn serve_connection(&self, stream: UnixStream) {
        let mut request = Vec::new();
        let mut reader = BufReader::new(&stream).take(MAX_LINE_LEN);
        if warn_on_err!("bridge", "read request", reader.read_until(b'\n', &mut request)).is_none() {
            return;
        }
        if request.is_empty() {
            log::debug!(target: "bridge", "connection closed without a request");
            return;
        }

        let request = String::from_utf8_lossy(&request);
        let line = request.trim_end_matches(['\r', '\n']);
        if let Some(tracer) = &self.tracer {
            tracer.record(Direction::Request, line);
        }

        let mut response = self.handle_raw_command(line);
        if let Some(tracer) = &self.tracer {
            tracer.record(Direction::Response, &response);
        }
        response.push('\n');

        let mut stream = &stream;
        if warn_on_err!("bridge", "write response", stream.write_all(response.as_bytes())).is_some() {
            debug_on_err!("bridge", "flush response", stream.flush());
        }
    }
}

fn bind(path: &Path) -> anyhow::Result<UnixListener> {
    if path.exists() {
        if UnixStream::connect(path).is_ok() {
            anyhow::bail!("channel {} is already in use", path.display());
        }
        log::debug!(target: "bridge", "remove stale socket {}", path.display());
        fs::remove_file(path).with_context(|| format!("remove stale socket {}", path.display()))?;
    }

    let listener =
        UnixListener::bind(path).with_context(|| format!("bind socket {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("set permissions on {}", path.display()))?;
    Ok(listener)
}

/// Running server. Dropping the handle stops the server.
pub struct ServerHandle {
    path: PathBuf,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop accepting, wait for the worker and remove the socket file. Idempotent.
    ///
    /// If the worker cannot be woken up through its socket it is left detached
    /// in `accept` instead of being joined.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        self.running.store(false, Ordering::SeqCst);
        // accept is blocking, a connection wakes it up
        match UnixStream::connect(&self.path) {
            Ok(_wake) => {
                if worker.join().is_err() {
                    log::error!(target: "bridge", "bridge worker panicked");
                }
            }
            Err(err) => log::warn!(
                target: "bridge",
                "cannot wake bridge worker through {}: {err}, worker detached",
                self.path.display()
            ),
        }

        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => log::warn!(target: "bridge", "remove socket {}: {err}", self.path.display()),
        }
        log::info!(target: "bridge", "stopped listening on {}", self.path.display());
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
