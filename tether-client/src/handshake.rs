//! Client-side handshake driver.
//!
//! States: idle → connecting → sending_hello → awaiting_hello_ack →
//! [sending_auth → awaiting_auth_ack] → ready. Any transport error before
//! `ready` aborts with `handshake_failed`; only the initial dial can surface
//! `connection_refused`.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tether_crypto::{public_key_from_der, unwrap_session_key, RsaKeyPair, SessionCrypto};
use tether_proto::messages::{decode_exact, AuthResponseMessage, ServerHelloPayload};
use tether_proto::{CallPhase, ErrorKind, RemotingError, Serializable, SessionId};
use tether_wire::{
    clamp_max_frame, connect_tcp, open_envelope, seal_envelope, FrameReceiver, FrameSender,
    MessageKind, WireMessage,
};

use crate::config::ClientConfig;

/// Everything `connect` produced: the channel pair, the issued session id
/// and the session crypto (fixed for the connection's lifetime).
pub(crate) struct Established {
    pub session_id: SessionId,
    pub sender: FrameSender,
    pub receiver: FrameReceiver,
    pub crypto: Option<Arc<SessionCrypto>>,
}

async fn bounded<F, T>(
    limit: Duration,
    phase: CallPhase,
    what: &str,
    fut: F,
) -> Result<T, RemotingError>
where
    F: Future<Output = Result<T, RemotingError>>,
{
    if limit.is_zero() {
        return fut.await;
    }
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RemotingError::new(
            ErrorKind::CallTimeout,
            format!("{what} exceeded {limit:?}"),
        )
        .with_phase(phase)),
    }
}

fn handshake_failed(detail: impl Into<String>) -> RemotingError {
    RemotingError::new(ErrorKind::HandshakeFailed, detail)
}

pub(crate) async fn establish(config: &ClientConfig) -> Result<Established, RemotingError> {
    let address = config.address();
    let max_frame = clamp_max_frame(config.max_frame_bytes);

    let hello_phase = async {
        // ── connecting ──────────────────────────────────────────────────
        let (sender, mut receiver) =
            connect_tcp(&address, max_frame).await.map_err(|e| match e.kind() {
                io::ErrorKind::ConnectionRefused => {
                    RemotingError::new(ErrorKind::ConnectionRefused, e.to_string())
                }
                _ => handshake_failed(e.to_string()),
            })?;

        // ── sending_hello ───────────────────────────────────────────────
        let keys = if config.message_encryption {
            let bits = config.rsa_key_size;
            let pair = tokio::task::spawn_blocking(move || RsaKeyPair::generate(bits))
                .await
                .map_err(|e| RemotingError::new(ErrorKind::InternalError, e.to_string()))?
                .map_err(|e| RemotingError::new(ErrorKind::CryptoFailed, e.to_string()))?;
            Some(pair)
        } else {
            None
        };

        let hello_payload = match &keys {
            Some(keys) => keys
                .public_key_der()
                .map_err(|e| RemotingError::new(ErrorKind::CryptoFailed, e.to_string()))?,
            None => Vec::new(),
        };
        let hello = WireMessage::plain(MessageKind::Hello, Vec::new(), hello_payload);
        sender
            .send(hello.encode())
            .await
            .map_err(|e| handshake_failed(e.to_string()))?;

        // ── awaiting_hello_ack ──────────────────────────────────────────
        let reply = receiver
            .recv()
            .await
            .ok_or_else(|| handshake_failed("connection closed during hello exchange"))?;
        let reply =
            WireMessage::decode(&reply).map_err(|e| handshake_failed(e.to_string()))?;
        if reply.kind() != Some(MessageKind::Hello) {
            return Err(handshake_failed(format!(
                "expected hello ack, got '{}'",
                reply.message_type
            )));
        }
        let session_id = SessionId::from_slice(&reply.correlation_id)
            .ok_or_else(|| handshake_failed("hello ack carries no session id"))?;

        // ── mode confirmation ───────────────────────────────────────────
        let crypto = match (keys, reply.payload.is_empty()) {
            (None, true) => None,
            (Some(keys), false) => {
                let payload: ServerHelloPayload = decode_exact(&reply.payload)
                    .map_err(|e| handshake_failed(e.to_string()))?;
                let server_key = public_key_from_der(&payload.server_public_key)
                    .map_err(|e| RemotingError::new(ErrorKind::CryptoFailed, e.to_string()))?;
                let session_key = unwrap_session_key(keys.private(), &payload.wrapped_key)
                    .map_err(|e| RemotingError::new(ErrorKind::CryptoFailed, e.to_string()))?;
                Some(Arc::new(SessionCrypto::new(
                    session_key,
                    keys.into_private(),
                    server_key,
                )))
            }
            (Some(_), true) => {
                return Err(handshake_failed(
                    "server confirmed a plaintext session but encryption was requested",
                ));
            }
            (None, false) => {
                return Err(handshake_failed(
                    "server replied with key material to a plaintext hello",
                ));
            }
        };

        log::info!(
            "[tether] connected to {address} (session {session_id}, {})",
            if crypto.is_some() { "encrypted" } else { "plaintext" },
        );
        Ok((sender, receiver, session_id, crypto))
    };

    let (sender, mut receiver, session_id, crypto) =
        bounded(config.connection_timeout, CallPhase::Connect, "connect", hello_phase).await?;

    // ── sending_auth / awaiting_auth_ack ────────────────────────────────
    if !config.credentials.is_empty() {
        let auth_phase = async {
            let envelope = seal_envelope(
                MessageKind::Auth,
                Vec::new(),
                false,
                config.credentials.to_bytes(),
                crypto.as_deref(),
            )
            .map_err(|e| RemotingError::new(ErrorKind::CryptoFailed, e.to_string()))?;
            sender
                .send(envelope.encode())
                .await
                .map_err(|e| handshake_failed(e.to_string()))?;

            let reply = receiver
                .recv()
                .await
                .ok_or_else(|| RemotingError::new(ErrorKind::AuthFailed, "connection closed"))?;
            let reply =
                WireMessage::decode(&reply).map_err(|e| handshake_failed(e.to_string()))?;
            let plaintext = open_envelope(&reply, crypto.as_deref())
                .map_err(|e| RemotingError::new(ErrorKind::CryptoFailed, e.to_string()))?;

            match reply.kind() {
                Some(MessageKind::AuthResponse) => {
                    let response: AuthResponseMessage = decode_exact(&plaintext)
                        .map_err(|e| handshake_failed(e.to_string()))?;
                    if !response.is_authenticated {
                        return Err(RemotingError::new(
                            ErrorKind::AuthFailed,
                            "server rejected the credentials",
                        ));
                    }
                    log::info!(
                        "[tether] authenticated as '{}' ({})",
                        response.identity.name,
                        response.identity.auth_type,
                    );
                    Ok(())
                }
                Some(MessageKind::Error) => {
                    let detail = config
                        .codec
                        .decode_fault(&plaintext)
                        .map(|f| f.message)
                        .unwrap_or_else(|e| e.to_string());
                    Err(RemotingError::new(ErrorKind::AuthFailed, detail))
                }
                _ => Err(handshake_failed(format!(
                    "expected auth response, got '{}'",
                    reply.message_type
                ))),
            }
        };
        bounded(config.auth_timeout, CallPhase::Authenticate, "authentication", auth_phase)
            .await?;
    }

    Ok(Established { session_id, sender, receiver, crypto })
}
