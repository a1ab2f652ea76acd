//! Per-connection server handshake and receive loop.
//!
//! Connection states: awaiting_hello → (session created, mode decided) →
//! [awaiting_auth] → active → terminating → closed. Any transport failure
//! before `active` aborts the connection without a session trace; afterwards
//! the session is disposed through the registry.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tether_crypto::{generate_session_key, public_key_from_der, wrap_session_key, SessionCrypto};
use tether_proto::messages::{decode_exact, Credential, ServerHelloPayload};
use tether_proto::{CorrelationId, ErrorKind, FaultRecord, Serializable};
use tether_wire::{open_envelope, FrameReceiver, FrameSender, MessageKind, WireMessage};

use crate::dispatch::Dispatcher;
use crate::session::ServerSession;
use crate::ServerShared;

pub(crate) async fn run_connection(
    shared: Arc<ServerShared>,
    sender: FrameSender,
    mut receiver: FrameReceiver,
    peer: String,
    shutdown: CancellationToken,
) {
    // ── awaiting_hello ──────────────────────────────────────────────────
    let hello = tokio::select! {
        _ = shutdown.cancelled() => return,
        frame = receiver.recv() => match frame {
            Some(bytes) => bytes,
            None => return,
        },
    };

    let hello = match WireMessage::decode(&hello) {
        Ok(m) if m.kind() == Some(MessageKind::Hello) => m,
        Ok(m) => {
            log::warn!("[tether] {peer}: expected hello, got '{}'", m.message_type);
            return;
        }
        Err(e) => {
            log::warn!("[tether] {peer}: malformed first envelope: {e}");
            return;
        }
    };

    // ── mode decision ───────────────────────────────────────────────────
    let (crypto, hello_reply) = if hello.payload.is_empty() {
        (None, Vec::new())
    } else {
        let client_key = match public_key_from_der(&hello.payload) {
            Ok(key) => key,
            Err(e) => {
                log::warn!("[tether] {peer}: unreadable client public key: {e}");
                return;
            }
        };
        let server_keys = match shared.server_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                log::error!("[tether] {peer}: server keypair unavailable: {e}");
                return;
            }
        };
        let session_key = generate_session_key();
        let wrapped = match wrap_session_key(&client_key, &session_key) {
            Ok(wrapped) => wrapped,
            Err(e) => {
                log::warn!("[tether] {peer}: session key wrap failed: {e}");
                return;
            }
        };
        let reply = ServerHelloPayload {
            wrapped_key: wrapped,
            server_public_key: match server_keys.public_key_der() {
                Ok(der) => der,
                Err(e) => {
                    log::error!("[tether] {peer}: public key encoding failed: {e}");
                    return;
                }
            },
        };
        let crypto =
            SessionCrypto::new(session_key, server_keys.private().clone(), client_key);
        (Some(Arc::new(crypto)), reply.to_bytes())
    };

    let session =
        shared.sessions.create(crypto, peer.clone(), sender.clone(), shared.codec.clone());

    // The hello reply is always unencrypted; its correlation id carries the
    // new session id.
    let reply = WireMessage::plain(MessageKind::Hello, session.id().0.to_vec(), hello_reply);
    if sender.send(reply.encode()).await.is_err() {
        shared.sessions.dispose_session(&session.id());
        return;
    }

    // ── awaiting_auth ───────────────────────────────────────────────────
    if let Some(provider) = &shared.auth_provider {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => {
                shared.sessions.dispose_session(&session.id());
                return;
            }
            frame = receiver.recv() => match frame {
                Some(bytes) => bytes,
                None => {
                    shared.sessions.dispose_session(&session.id());
                    return;
                }
            },
        };

        let verdict = authenticate(&session, provider.as_ref(), &frame);
        match verdict {
            Ok(response) => {
                if session
                    .send_sealed(MessageKind::AuthResponse, Vec::new(), false, response)
                    .await
                    .is_err()
                {
                    shared.sessions.dispose_session(&session.id());
                    return;
                }
            }
            Err(fault) => {
                let payload = session.codec().encode_fault(&fault);
                let _ = session.send_sealed(MessageKind::Error, Vec::new(), true, payload).await;
                shared.sessions.dispose_session(&session.id());
                return;
            }
        }
    }

    // ── active ──────────────────────────────────────────────────────────
    active_loop(&shared, &session, &mut receiver, &shutdown).await;

    // ── terminating ─────────────────────────────────────────────────────
    shared.sessions.dispose_session(&session.id());
}

fn authenticate(
    session: &Arc<ServerSession>,
    provider: &dyn crate::auth::AuthProvider,
    frame: &[u8],
) -> Result<Vec<u8>, FaultRecord> {
    let auth_failed = |detail: String| {
        FaultRecord::new(ErrorKind::AuthFailed.wire_name(), detail)
    };

    let envelope = WireMessage::decode(frame).map_err(|e| auth_failed(e.to_string()))?;
    if envelope.kind() != Some(MessageKind::Auth) {
        return Err(auth_failed(format!(
            "expected auth envelope, got '{}'",
            envelope.message_type
        )));
    }
    session.touch();

    let plaintext = open_envelope(&envelope, session.crypto().map(Arc::as_ref))
        .map_err(|e| auth_failed(e.to_string()))?;
    let credentials: Vec<Credential> =
        decode_exact(&plaintext).map_err(|e| auth_failed(e.to_string()))?;

    let identity =
        provider.authenticate(&credentials).map_err(|e| auth_failed(e.message))?;
    log::info!("[tether] session {} authenticated as '{}'", session.id(), identity.name);
    session.set_identity(identity.clone());

    let response = tether_proto::messages::AuthResponseMessage {
        is_authenticated: true,
        identity,
    };
    Ok(response.to_bytes())
}

async fn active_loop(
    shared: &Arc<ServerShared>,
    session: &Arc<ServerSession>,
    receiver: &mut FrameReceiver,
    shutdown: &CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = session.cancel_token().cancelled() => return,
            frame = receiver.recv() => match frame {
                Some(bytes) => bytes,
                None => return,
            },
        };

        let envelope = match WireMessage::decode(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("[tether] session {}: malformed envelope: {e}", session.id());
                return;
            }
        };
        session.touch();

        match envelope.kind() {
            Some(MessageKind::Call) => {
                handle_call(session, &shared.dispatcher, envelope).await;
            }
            Some(MessageKind::Result) => handle_delegate_reply(session, envelope),
            Some(MessageKind::Goodbye) => {
                log::debug!("[tether] session {}: goodbye", session.id());
                return;
            }
            Some(MessageKind::Error) => {
                log::warn!("[tether] session {}: peer error envelope", session.id());
            }
            Some(other) => {
                log::warn!(
                    "[tether] session {}: unexpected '{other}' envelope discarded",
                    session.id()
                );
            }
            None => {
                log::warn!(
                    "[tether] session {}: unknown envelope type '{}' discarded",
                    session.id(),
                    envelope.message_type
                );
            }
        }
    }
}

async fn handle_call(
    session: &Arc<ServerSession>,
    dispatcher: &Dispatcher,
    envelope: WireMessage,
) {
    let plaintext = match open_envelope(&envelope, session.crypto().map(Arc::as_ref)) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            log::warn!("[tether] session {}: rejected call envelope: {e}", session.id());
            let fault = FaultRecord::new(ErrorKind::CryptoFailed.wire_name(), e.to_string());
            let payload = session.codec().encode_fault(&fault);
            let _ = session
                .send_sealed(MessageKind::Result, envelope.correlation_id, true, payload)
                .await;
            return;
        }
    };

    match session.codec().decode_call(&plaintext) {
        Ok(call) => dispatcher.spawn_call(session.clone(), envelope.correlation_id, call),
        Err(e) => {
            log::warn!("[tether] session {}: undecodable call: {e}", session.id());
            let fault =
                FaultRecord::new(ErrorKind::SerializationFailed.wire_name(), e.to_string());
            let payload = session.codec().encode_fault(&fault);
            let _ = session
                .send_sealed(MessageKind::Result, envelope.correlation_id, true, payload)
                .await;
        }
    }
}

fn handle_delegate_reply(session: &Arc<ServerSession>, envelope: WireMessage) {
    let Some(correlation) = CorrelationId::from_slice(&envelope.correlation_id) else {
        log::warn!("[tether] session {}: result without correlation id", session.id());
        return;
    };

    let outcome = match open_envelope(&envelope, session.crypto().map(Arc::as_ref)) {
        Ok(plaintext) if envelope.error => match session.codec().decode_fault(&plaintext) {
            Ok(fault) => Err(tether_proto::RemotingError::from_fault(fault)),
            Err(e) => Err(tether_proto::RemotingError::new(
                ErrorKind::SerializationFailed,
                e.to_string(),
            )),
        },
        Ok(plaintext) => match session.codec().decode_result(&plaintext) {
            Ok(result) => Ok(result),
            Err(e) => Err(tether_proto::RemotingError::new(
                ErrorKind::SerializationFailed,
                e.to_string(),
            )),
        },
        Err(e) => {
            Err(tether_proto::RemotingError::new(ErrorKind::CryptoFailed, e.to_string()))
        }
    };

    session.complete_delegate_reply(&correlation, outcome);
}
