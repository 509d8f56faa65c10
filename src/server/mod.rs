//! Client-facing HTTP endpoint
//!
//! The [`Supervisor`] publishes the endpoint, then watches the
//! [`RestartFlag`]. When the flag is raised it tears the endpoint down,
//! re-reads settings, rebuilds the interface state and publishes again on
//! the same address. The model slot is untouched by a restart.

mod auth;
mod handlers;
mod interface;
mod routes;
mod tls;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::{GenerationConfig, ServerConfig};
use crate::engine::{Planner, Scheduler};
use crate::error::EndpointError;
use crate::extensions::Extension;

pub use auth::{require_basic_auth, Credential, Credentials};
pub use handlers::AppState;
pub use interface::{reset_cache, InterfaceState, StaticMount, CACHE_DIR};
pub use routes::{api_routes, build_router, interface_routes};
pub use tls::{load_tls_config, TlsListener};

/// How often the supervise loop checks the restart flag
pub const DEFAULT_RESTART_POLL: Duration = Duration::from_millis(500);

/// How long in-flight requests get to finish on teardown
pub const DEFAULT_TEARDOWN_GRACE: Duration = Duration::from_secs(5);

/// Rebinding the previous address is retried this many times, 100ms apart
const REBIND_ATTEMPTS: u32 = 20;

/// Process-wide "rebuild the interface" request
#[derive(Debug, Clone, Default)]
pub struct RestartFlag(Arc<AtomicBool>);

impl RestartFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a rebuild
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear the flag, returning whether it was set
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A published endpoint
pub struct EndpointHandle {
    local_addr: SocketAddr,
    generation: u64,
    tls: bool,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl EndpointHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Base URL clients should use
    pub fn url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}", scheme, self.local_addr)
    }

    fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Publishes the endpoint and rebuilds it on request
pub struct Supervisor {
    root: PathBuf,
    scheduler: Arc<Scheduler>,
    planner: Arc<RwLock<Planner>>,
    extensions: Vec<Extension>,
    restart: RestartFlag,
    poll_interval: Duration,
    grace: Duration,
    generation: u64,
    bound_addr: Option<SocketAddr>,
}

impl Supervisor {
    pub fn new(
        root: impl Into<PathBuf>,
        scheduler: Arc<Scheduler>,
        planner: Arc<RwLock<Planner>>,
        extensions: Vec<Extension>,
    ) -> Self {
        Self {
            root: root.into(),
            scheduler,
            planner,
            extensions,
            restart: RestartFlag::new(),
            poll_interval: DEFAULT_RESTART_POLL,
            grace: DEFAULT_TEARDOWN_GRACE,
            generation: 0,
            bound_addr: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_teardown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Handle for requesting a rebuild from elsewhere
    pub fn restart_flag(&self) -> RestartFlag {
        self.restart.clone()
    }

    /// Build the endpoint from current settings and start serving.
    ///
    /// Returns as soon as the listener is bound. After the first publish the
    /// same address is reused, even if the settings name a different one.
    pub async fn publish(&mut self) -> Result<EndpointHandle, EndpointError> {
        let (layers, model_dir) = {
            let planner = self.planner.read().unwrap_or_else(PoisonError::into_inner);
            (
                planner.layers().clone(),
                planner.metadata().model_dir().to_path_buf(),
            )
        };

        let config = layers.interface();
        let server: ServerConfig = config.view()?;
        let generation_defaults: GenerationConfig = config.view()?;

        if let Err(e) = reset_cache(&self.root) {
            tracing::warn!("Could not reset the interface cache: {}", e);
        }

        let generation = self.generation + 1;
        let interface = InterfaceState::build(
            &self.root,
            &config,
            &server,
            &self.extensions,
            layers.overrides.get("loader").and_then(|v| v.as_str()),
            generation,
        )?;

        let state = Arc::new(AppState {
            scheduler: self.scheduler.clone(),
            planner: self.planner.clone(),
            restart: self.restart.clone(),
            interface: Arc::new(interface),
            generation: generation_defaults,
            model_dir,
        });
        let app = build_router(state, &server);

        let tls_config = match server.tls_paths() {
            Some((key, cert)) => Some(load_tls_config(key, cert)?),
            None => None,
        };
        let tls = tls_config.is_some();

        let addr = match self.bound_addr {
            Some(addr) => addr,
            None => server.socket_addr().await?,
        };
        let listener = bind(addr, self.bound_addr.is_some()).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| EndpointError::Bind { addr, source })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };

        let task = match tls_config {
            Some(tls_config) => {
                let listener = TlsListener::new(listener, tls_config)
                    .map_err(|source| EndpointError::Bind { addr, source })?;
                tokio::spawn(async move {
                    axum::serve(listener, app)
                        .with_graceful_shutdown(shutdown)
                        .await
                })
            }
            None => tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown)
                    .await
            }),
        };

        self.generation = generation;
        self.bound_addr = Some(local_addr);

        let handle = EndpointHandle {
            local_addr,
            generation,
            tls,
            shutdown: Some(shutdown_tx),
            task,
        };
        tracing::info!(
            "Server listening on {}{}",
            handle.url(),
            server.mount_path().unwrap_or_default()
        );
        Ok(handle)
    }

    /// Stop serving and release the listener.
    ///
    /// In-flight requests get the grace period to finish, then the server
    /// task is aborted.
    pub async fn teardown(&self, mut handle: EndpointHandle) {
        if let Some(tx) = handle.shutdown.take() {
            let _ = tx.send(());
        }

        match tokio::time::timeout(self.grace, &mut handle.task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::warn!("Server error during teardown: {}", e),
            Ok(Err(e)) => tracing::warn!("Server task failed: {}", e),
            Err(_) => {
                tracing::warn!(
                    "Requests still running after {:?}, closing the endpoint",
                    self.grace
                );
                handle.task.abort();
                let _ = handle.task.await;
            }
        }
        tracing::info!("Endpoint generation {} closed", handle.generation);
    }

    /// Re-read the settings file, keeping the previous settings on error
    pub fn reload_settings(&self) {
        let reloaded = self
            .planner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .layers()
            .reload();

        match reloaded {
            Ok(layers) => self
                .planner
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .set_layers(layers),
            Err(e) => tracing::warn!("Keeping previous settings: {}", e),
        }
    }

    /// Tear down, reload settings and publish again
    pub async fn rebuild(&mut self, handle: EndpointHandle) -> Result<EndpointHandle, EndpointError> {
        tracing::info!("Restarting the interface");
        self.teardown(handle).await;
        self.reload_settings();
        self.publish().await
    }

    /// Run until `stop` is raised, rebuilding the endpoint on request
    pub async fn supervise(
        mut self,
        mut handle: EndpointHandle,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(), EndpointError> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    if self.restart.take() {
                        handle = self.rebuild(handle).await?;
                    } else if handle.is_finished() {
                        tracing::warn!("Endpoint stopped unexpectedly, publishing again");
                        handle = self.rebuild(handle).await?;
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        self.teardown(handle).await;
        Ok(())
    }
}

async fn bind(addr: SocketAddr, rebind: bool) -> Result<TcpListener, EndpointError> {
    let attempts = if rebind { REBIND_ATTEMPTS } else { 1 };
    let mut attempt = 1;
    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if attempt < attempts && e.kind() == std::io::ErrorKind::AddrInUse => {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(source) => return Err(EndpointError::Bind { addr, source }),
        }
    }
}
