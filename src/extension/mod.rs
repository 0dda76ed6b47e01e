//! Extension load contract
//!
//! [`Extension::register`] is called once by the host when the extension is
//! loaded. It adds the diagnostic scalar functions and the
//! `duckdb_pgwire_listen` entry point, and can start the wire server right
//! away. Registration is idempotent: functions already present are left alone.

pub mod abi;
pub mod functions;

pub use abi::{ExtensionHost, FunctionTable, RegistrationError, ScalarFunction, EXTENSION_ABI_VERSION};

use crate::bridge::{DataType, Engine, EngineError, Value};
use crate::config::ServerConfig;
use crate::server::{self, Server};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

/// Outcome of [`Extension::register`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistrationReport {
    /// Functions added by this call
    pub registered: Vec<String>,
    /// Functions the host already had
    pub already_present: Vec<String>,
    /// Non-fatal failures
    pub errors: Vec<RegistrationError>,
    /// Address of the server started on load, if any
    pub listening: Option<SocketAddr>,
}

impl RegistrationReport {
    /// Whether every function is now available on the host
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// The wire extension, loaded into one host
#[derive(Debug)]
pub struct Extension {
    autostart: bool,
    launcher: Arc<Launcher>,
}

impl Extension {
    /// Extension whose server uses `config`
    pub fn new(config: ServerConfig) -> Self {
        Self {
            autostart: false,
            launcher: Arc::new(Launcher {
                config,
                running: Mutex::new(None),
            }),
        }
    }

    /// Start the server on the configured address during registration
    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    /// Register the extension's functions with `host`.
    ///
    /// # Errors
    ///
    /// Only an invalid host handle or an ABI mismatch fail the call; other
    /// problems are collected in the report.
    pub fn register<H>(&self, host: &Arc<H>) -> std::result::Result<RegistrationReport, RegistrationError>
    where
        H: ExtensionHost + Engine,
    {
        if !host.is_valid() {
            return Err(RegistrationError::InvalidHost);
        }
        if host.abi_version() != EXTENSION_ABI_VERSION {
            return Err(RegistrationError::AbiMismatch {
                expected: EXTENSION_ABI_VERSION,
                found: host.abi_version(),
            });
        }

        let mut report = RegistrationReport::default();
        let mut all = functions::stateless();
        all.push(self.listen_function(Arc::downgrade(host)));

        for function in all {
            let name = function.name().to_string();
            if host.has_function(&name) {
                report.already_present.push(name);
                continue;
            }
            match host.register_scalar_function(function) {
                Ok(()) => report.registered.push(name),
                Err(e) if e.is_fatal() => return Err(e),
                Err(RegistrationError::DuplicateFunction(_)) => report.already_present.push(name),
                Err(e) => {
                    tracing::warn!(function = %name, "registration failed: {}", e);
                    report.errors.push(e);
                }
            }
        }

        if self.autostart {
            let addr = self.launcher.config.listen_addr.clone();
            match self.launcher.listen(&addr, host.clone()) {
                Ok(bound) => report.listening = Some(bound),
                Err(e) => {
                    tracing::error!(addr = %addr, "failed to start wire server: {}", e);
                    report.errors.push(RegistrationError::Rejected {
                        name: functions::LISTEN.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            registered = report.registered.len(),
            already_present = report.already_present.len(),
            errors = report.errors.len(),
            "extension registered"
        );
        Ok(report)
    }

    /// Address the server is bound to, if it was started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.launcher.running.lock().as_ref().map(|r| r.addr)
    }

    /// Stop the server, if running, and wait for its thread
    pub fn shutdown(&self) {
        self.launcher.stop();
    }

    fn listen_function<H>(&self, host: Weak<H>) -> ScalarFunction
    where
        H: ExtensionHost + Engine,
    {
        let launcher = self.launcher.clone();
        ScalarFunction::new(
            functions::LISTEN,
            vec![DataType::Varchar],
            DataType::Varchar,
            move |args| {
                let host = host.upgrade().ok_or_else(|| {
                    EngineError::new(
                        crate::protocol::sql_state::INTERNAL_ERROR,
                        "host has been unloaded",
                    )
                })?;
                let requested = functions::text_arg(&args[0]);
                let addr = if requested.is_empty() {
                    launcher.config.listen_addr.clone()
                } else {
                    requested
                };
                let bound = launcher.listen(&addr, host).map_err(functions::listen_failed)?;
                Ok(Value::Text(bound.to_string()))
            },
        )
    }
}

impl Drop for Extension {
    fn drop(&mut self) {
        self.launcher.stop();
    }
}

/// Starts the server at most once, on its own thread and runtime
#[derive(Debug)]
struct Launcher {
    config: ServerConfig,
    running: Mutex<Option<Running>>,
}

#[derive(Debug)]
struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Launcher {
    /// Bind `addr` and serve on a dedicated thread; returns the bound
    /// address, or the existing one if the server is already up.
    fn listen<E: Engine>(&self, addr: &str, engine: Arc<E>) -> Result<SocketAddr> {
        let mut running = self.running.lock();
        if let Some(existing) = running.as_ref() {
            tracing::debug!(addr = %existing.addr, "wire server already running");
            return Ok(existing.addr);
        }

        let (listener, bound) = server::bind_std(addr)?;
        let config = ServerConfig {
            listen_addr: bound.to_string(),
            ..self.config.clone()
        };
        let server = Server::new(config, engine)?;
        let shutdown = server.shutdown_token();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("duckdb-pgwire-worker")
            .build()?;
        let thread = std::thread::Builder::new()
            .name("duckdb-pgwire".into())
            .spawn(move || {
                runtime.block_on(async move {
                    let result = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => server.serve(listener).await,
                        Err(e) => Err(Error::Io(e)),
                    };
                    if let Err(e) = result {
                        tracing::error!("wire server stopped: {}", e);
                    }
                });
            })?;

        tracing::info!(addr = %bound, "wire server started");
        *running = Some(Running {
            addr: bound,
            shutdown,
            thread: Some(thread),
        });
        Ok(bound)
    }

    fn stop(&self) {
        let Some(mut running) = self.running.lock().take() else {
            return;
        };
        running.shutdown.cancel();
        if let Some(thread) = running.thread.take() {
            if thread.join().is_err() {
                tracing::error!("wire server thread panicked");
            }
        }
        tracing::info!(addr = %running.addr, "wire server stopped");
    }
}
