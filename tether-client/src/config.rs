//! Client configuration.

use std::sync::Arc;
use std::time::Duration;

use tether_proto::messages::Credential;
use tether_proto::{BinaryCodec, MessageCodec};

/// Configuration for [`crate::Client::connect`].
#[derive(Clone)]
pub struct ClientConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Request the RSA+AES pipeline during the handshake.
    pub message_encryption: bool,
    /// RSA modulus size in bits for the client keypair.
    pub rsa_key_size: usize,
    /// Ceiling on dial + hello exchange; zero means no limit.
    pub connection_timeout: Duration,
    /// Ceiling on the credential exchange; zero means no limit.
    pub auth_timeout: Duration,
    /// Default per-call ceiling; zero means no limit.
    pub invocation_timeout: Duration,
    /// Credentials sent after the hello exchange; empty skips the auth step.
    pub credentials: Vec<Credential>,
    /// Redial transparently when an invoke finds the connection gone.
    pub auto_reconnect: bool,
    /// Cap on a single frame; zero selects the default (128 MiB).
    pub max_frame_bytes: usize,
    /// Logical endpoint id; the key in the process-wide client directory.
    pub channel_name: String,
    /// Message serialization back-end; must match the server's.
    pub codec: Arc<dyn MessageCodec>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 9090,
            message_encryption: false,
            rsa_key_size: 4096,
            connection_timeout: Duration::from_secs(15),
            auth_timeout: Duration::from_secs(15),
            invocation_timeout: Duration::from_secs(30),
            credentials: Vec::new(),
            auto_reconnect: false,
            max_frame_bytes: 0,
            channel_name: "default".to_owned(),
            codec: Arc::new(BinaryCodec),
        }
    }
}

impl ClientConfig {
    /// The `host:port` dial string.
    pub(crate) fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
