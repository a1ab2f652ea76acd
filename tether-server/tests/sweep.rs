use std::sync::Arc;
use std::time::Duration;

use tether_proto::BinaryCodec;
use tether_server::session::{SessionEvent, SessionRegistry};
use tether_wire::{spawn_stream_pump, FrameSender, DEFAULT_MAX_FRAME_BYTES};

fn test_sender() -> FrameSender {
    let (stream, _other) = tokio::io::duplex(1 << 12);
    let (sender, _receiver) = spawn_stream_pump(stream, DEFAULT_MAX_FRAME_BYTES);
    sender
}

#[tokio::test]
async fn sweep_removes_only_idle_sessions() {
    let registry = SessionRegistry::new();
    let codec = Arc::new(BinaryCodec);

    let idle = registry.create(None, "idle", test_sender(), codec.clone());
    let active = registry.create(None, "active", test_sender(), codec);
    assert_eq!(registry.len(), 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    active.touch();

    let swept = registry.sweep(Duration::from_millis(25));
    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].id(), idle.id());

    assert_eq!(registry.len(), 1);
    assert!(registry.get(&idle.id()).is_none());
    assert!(registry.get(&active.id()).is_some());

    assert!(idle.is_disposed());
    assert!(idle.cancel_token().is_cancelled());
    assert!(!active.is_disposed());
}

#[tokio::test]
async fn lifecycle_events_are_emitted() {
    let registry = SessionRegistry::new();
    let mut events = registry.subscribe();

    let session = registry.create(None, "peer", test_sender(), Arc::new(BinaryCodec));
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Created(session.id()));

    registry.dispose_session(&session.id());
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Disposed(session.id()));
}

#[tokio::test]
async fn dispose_is_idempotent() {
    let registry = SessionRegistry::new();
    let session = registry.create(None, "peer", test_sender(), Arc::new(BinaryCodec));

    registry.dispose_session(&session.id());
    registry.dispose_session(&session.id());
    assert!(session.is_disposed());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn touch_resets_idle_time() {
    let registry = SessionRegistry::new();
    let session = registry.create(None, "peer", test_sender(), Arc::new(BinaryCodec));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(session.idle_for() >= Duration::from_millis(25));

    session.touch();
    assert!(session.idle_for() < Duration::from_millis(25));
}
