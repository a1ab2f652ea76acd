//! # tether-server
//!
//! Server side of the tether RPC runtime.
//!
//! A [`Server`] binds a listener, hosts named services with
//! single-call/scoped/singleton lifetimes, performs the optional RSA+AES
//! handshake per connection, tracks sessions with activity-based expiry and
//! dispatches incoming calls onto bounded worker tasks. Server code can call
//! back into clients through delegate proxies.
//!
//! ```rust,no_run
//! use tether_proto::descriptor::{MethodDescriptor, ParamSpec};
//! use tether_server::service::{decode_arg, DynService, InvocationOutcome};
//! use tether_server::{Server, ServerConfig, ServiceRegistration};
//!
//! # async fn run() -> Result<(), tether_proto::RemotingError> {
//! let server = Server::bind(ServerConfig::default()).await?;
//!
//! let (descriptor, service) = DynService::builder("Echo")
//!     .method(
//!         MethodDescriptor::new("ping", vec![ParamSpec::input("s", "string")], Some("string")),
//!         |args| Box::pin(async move {
//!             let s: String = decode_arg(&args[0])?;
//!             Ok(InvocationOutcome::returning(&s))
//!         }),
//!     )
//!     .build();
//! server.services().register(ServiceRegistration::singleton(descriptor, service))?;
//! # Ok(()) }
//! ```

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod delegate;
pub mod dispatch;
pub mod registry;
pub mod service;
pub mod session;

mod handshake;

pub use auth::AuthProvider;
pub use config::ServerConfig;
pub use delegate::DelegateProxy;
pub use dispatch::{resolve_method, Dispatcher, ResolvedMethod};
pub use registry::{ServiceFactory, ServiceLifetime, ServiceRegistration, ServiceRegistry};
pub use service::{ArgValue, DynService, InvocationOutcome, OutValue, RemoteService, ServiceFuture};
pub use session::{ServerSession, SessionEvent, SessionRegistry};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use tether_crypto::RsaKeyPair;
use tether_proto::{ErrorKind, MessageCodec, RemotingError};
use tether_wire::{clamp_max_frame, spawn_stream_pump};

// ─── Shared state ────────────────────────────────────────────────────────────

/// State shared by the accept loop, connection tasks and the sweeper.
pub(crate) struct ServerShared {
    pub(crate) services: Arc<ServiceRegistry>,
    pub(crate) sessions: Arc<SessionRegistry>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) codec: Arc<dyn MessageCodec>,
    pub(crate) auth_provider: Option<Arc<dyn AuthProvider>>,
    rsa_key_size: usize,
    keys: OnceCell<Arc<RsaKeyPair>>,
}

impl ServerShared {
    /// The server keypair, generated once on first need.
    pub(crate) async fn server_keys(&self) -> Result<Arc<RsaKeyPair>, RemotingError> {
        let bits = self.rsa_key_size;
        self.keys
            .get_or_try_init(|| async move {
                let pair = tokio::task::spawn_blocking(move || RsaKeyPair::generate(bits))
                    .await
                    .map_err(|e| RemotingError::new(ErrorKind::InternalError, e.to_string()))?
                    .map_err(|e| RemotingError::new(ErrorKind::CryptoFailed, e.to_string()))?;
                Ok(Arc::new(pair))
            })
            .await
            .cloned()
    }
}

// ─── Server ──────────────────────────────────────────────────────────────────

/// A bound tether server. Cheap to clone — internally Arc-wrapped.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: ServerConfig,
    shared: Arc<ServerShared>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    directory_token: u64,
    disposed: AtomicBool,
}

impl Server {
    /// Bind the configured address and start accepting connections.
    ///
    /// Registers the instance in the process-wide [`directory`] under its
    /// channel name; [`Server::shutdown`] unregisters it.
    pub async fn bind(config: ServerConfig) -> Result<Self, RemotingError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| RemotingError::new(ErrorKind::ConnectionRefused, e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| RemotingError::new(ErrorKind::InternalError, e.to_string()))?;

        let services = Arc::new(ServiceRegistry::new());
        let sessions = Arc::new(SessionRegistry::new());
        let shared = Arc::new(ServerShared {
            services: services.clone(),
            sessions: sessions.clone(),
            dispatcher: Dispatcher::new(services, config.effective_concurrency()),
            codec: config.codec.clone(),
            auth_provider: config.auth_provider.clone(),
            rsa_key_size: config.rsa_key_size,
            keys: OnceCell::new(),
        });

        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();
        let max_frame = clamp_max_frame(config.max_frame_bytes);

        if config.message_encryption {
            shared.server_keys().await?;
        }

        // Accept loop.
        {
            let shared = shared.clone();
            let shutdown = shutdown.clone();
            let tasks_inner = tasks.clone();
            tasks.spawn(async move {
                loop {
                    let accepted = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        accepted = listener.accept() => accepted,
                    };
                    match accepted {
                        Ok((stream, peer)) => {
                            let _ = stream.set_nodelay(true);
                            let (sender, receiver) = spawn_stream_pump(stream, max_frame);
                            let shared = shared.clone();
                            let shutdown = shutdown.clone();
                            tasks_inner.spawn(handshake::run_connection(
                                shared,
                                sender,
                                receiver,
                                peer.to_string(),
                                shutdown,
                            ));
                        }
                        Err(e) => {
                            log::warn!("[tether] accept failed: {e}");
                        }
                    }
                }
            });
        }

        // Inactive-session sweeper.
        if !config.max_session_age.is_zero() {
            let sessions = sessions.clone();
            let shutdown = shutdown.clone();
            let interval = config.sweep_interval;
            let ceiling = config.max_session_age;
            tasks.spawn(async move {
                let mut tick = tokio::time::interval(interval);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tick.tick() => {
                            sessions.sweep(ceiling);
                        }
                    }
                }
            });
        }

        let directory_token = directory::register(config.channel_name.clone());
        log::info!("[tether] server listening on {local_addr}");

        Ok(Self {
            inner: Arc::new(ServerInner {
                config,
                shared,
                local_addr,
                shutdown,
                tasks,
                directory_token,
                disposed: AtomicBool::new(false),
            }),
        })
    }

    /// The service registry; registrations may be added at any time.
    pub fn services(&self) -> &ServiceRegistry {
        &self.inner.shared.services
    }

    /// The live-session registry.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.shared.sessions
    }

    /// The bound address (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// The configured channel name.
    pub fn channel_name(&self) -> &str {
        &self.inner.config.channel_name
    }

    /// Stop accepting, dispose every session and wait for connection tasks.
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        directory::unregister(self.inner.directory_token);
        self.inner.shutdown.cancel();
        self.inner.shared.sessions.dispose_all();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        log::info!("[tether] server on {} shut down", self.inner.local_addr);
    }
}

// ─── Directory ───────────────────────────────────────────────────────────────

/// Process-wide directory of live server instances, keyed by channel name.
///
/// Instances register on bind and unregister on shutdown; the default
/// instance is simply the earliest-registered live entry.
pub mod directory {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Mutex, OnceLock};

    static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

    fn entries() -> &'static Mutex<Vec<(u64, String)>> {
        static ENTRIES: OnceLock<Mutex<Vec<(u64, String)>>> = OnceLock::new();
        ENTRIES.get_or_init(|| Mutex::new(Vec::new()))
    }

    pub(crate) fn register(name: String) -> u64 {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        entries().lock().unwrap().push((token, name));
        token
    }

    pub(crate) fn unregister(token: u64) {
        entries().lock().unwrap().retain(|(t, _)| *t != token);
    }

    /// Snapshot of the channel names of all live servers, oldest first.
    pub fn list() -> Vec<String> {
        entries().lock().unwrap().iter().map(|(_, n)| n.clone()).collect()
    }

    /// The default instance's channel name (the oldest live registration).
    pub fn default_channel() -> Option<String> {
        entries().lock().unwrap().first().map(|(_, n)| n.clone())
    }
}
