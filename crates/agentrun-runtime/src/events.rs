//! Event emitters - fire-and-forget notification fan-out.
//!
//! Notification collaborators (HTTP responders, SSE bridges, web sockets)
//! subscribe to runtime events; the runtime never waits on them.

use agentrun_models::RuntimeEvent;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::trace;

/// Receives runtime events. Delivery is at-least-once to local subscribers;
/// failures are the emitter's problem, never the scheduler's.
#[async_trait]
pub trait TaskEventEmitter: Send + Sync {
    async fn emit(&self, event: RuntimeEvent);
}

/// Emitter that drops every event.
pub struct NoopEventEmitter;

#[async_trait]
impl TaskEventEmitter for NoopEventEmitter {
    async fn emit(&self, _event: RuntimeEvent) {}
}

/// Fan-out to local subscribers over a tokio broadcast channel.
///
/// Slow subscribers lag and miss events rather than back-pressuring the
/// dispatcher.
pub struct BroadcastEventEmitter {
    tx: broadcast::Sender<RuntimeEvent>,
}

impl BroadcastEventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl TaskEventEmitter for BroadcastEventEmitter {
    async fn emit(&self, event: RuntimeEvent) {
        // Send fails only when there are no subscribers, which is fine.
        if self.tx.send(event).is_err() {
            trace!("No subscribers for runtime event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscriber() {
        let emitter = BroadcastEventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter
            .emit(RuntimeEvent::RuntimeStarted { timestamp: 42 })
            .await;

        match rx.recv().await.unwrap() {
            RuntimeEvent::RuntimeStarted { timestamp } => assert_eq!(timestamp, 42),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_does_not_panic() {
        let emitter = BroadcastEventEmitter::new(16);
        emitter
            .emit(RuntimeEvent::RuntimeStopped { timestamp: 1 })
            .await;
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive() {
        let emitter = BroadcastEventEmitter::new(16);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter
            .emit(RuntimeEvent::RuntimeStarted { timestamp: 7 })
            .await;

        assert!(matches!(
            rx1.recv().await.unwrap(),
            RuntimeEvent::RuntimeStarted { .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            RuntimeEvent::RuntimeStarted { .. }
        ));
    }
}
