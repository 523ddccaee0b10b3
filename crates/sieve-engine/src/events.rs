//! Scheduler event stream.
//!
//! Emits [`SchedulerEvent`]s over a [`tokio::sync::broadcast`] channel so the
//! CLI (or any other observer) can follow a run without reaching into the
//! scheduler.

use serde::{Deserialize, Serialize};
use sieve_types::BotStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SchedulerEvent {
    Started {
        total: usize,
        skip: usize,
        parallelism: usize,
    },
    Paused,
    Resumed,
    Stopping,
    Aborting,
    ParallelismChanged {
        from: usize,
        to: usize,
    },
    RecordCompleted {
        status: BotStatus,
        /// Output line as written to the status file.
        line: String,
        attempts: usize,
    },
    CheckpointSaved {
        progress: u64,
    },
    Completed {
        checked: u64,
        duration_ms: u64,
    },
    Aborted {
        checked: u64,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<SchedulerEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers. Dropped when nobody listens.
    pub fn emit(&self, event: SchedulerEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SchedulerEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(SchedulerEvent::ParallelismChanged { from: 1, to: 4 });

        match rx.recv().await.unwrap() {
            SchedulerEvent::ParallelismChanged { from, to } => {
                assert_eq!(from, 1);
                assert_eq!(to, 4);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let emitter = EventEmitter::new(16);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.emit(SchedulerEvent::RecordCompleted {
            status: BotStatus::Success,
            line: "a:b | Plan = gold".into(),
            attempts: 1,
        });

        let json1 = serde_json::to_string(&rx1.recv().await.unwrap()).unwrap();
        let json2 = serde_json::to_string(&rx2.recv().await.unwrap()).unwrap();
        assert_eq!(json1, json2);
        assert!(json1.contains("\"success\""));
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(SchedulerEvent::Aborted { checked: 0 });
    }
}
