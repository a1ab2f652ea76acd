//! Server configuration.

use std::sync::Arc;
use std::time::Duration;

use tether_proto::{BinaryCodec, MessageCodec};

use crate::auth::AuthProvider;

/// Configuration for [`crate::Server::bind`].
#[derive(Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Pre-generate the server keypair at bind time. Encrypted sessions are
    /// honored either way; without this flag the keypair is generated lazily
    /// on the first encrypted hello.
    pub message_encryption: bool,
    /// RSA modulus size in bits.
    pub rsa_key_size: usize,
    /// How often the inactive-session sweeper runs.
    pub sweep_interval: Duration,
    /// Sessions idle longer than this are swept. Zero disables sweeping.
    pub max_session_age: Duration,
    /// Cap on a single frame; zero selects the default (128 MiB).
    pub max_frame_bytes: usize,
    /// Bound on concurrently running service invocations; zero selects the
    /// number of hardware threads.
    pub invocation_concurrency: usize,
    /// Logical endpoint id; the key in the process-wide server directory.
    pub channel_name: String,
    /// When set, every session must authenticate before issuing calls.
    pub auth_provider: Option<Arc<dyn AuthProvider>>,
    /// Message serialization back-end.
    pub codec: Arc<dyn MessageCodec>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 9090,
            message_encryption: false,
            rsa_key_size: 4096,
            sweep_interval: Duration::from_secs(60),
            max_session_age: Duration::ZERO,
            max_frame_bytes: 0,
            invocation_concurrency: 0,
            channel_name: "default".to_owned(),
            auth_provider: None,
            codec: Arc::new(BinaryCodec),
        }
    }
}

impl ServerConfig {
    /// The effective invocation concurrency bound.
    pub(crate) fn effective_concurrency(&self) -> usize {
        if self.invocation_concurrency > 0 {
            return self.invocation_concurrency;
        }
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
    }
}
