use minerva_contract::ProgressEvent;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Default per-observer in-flight buffer.
pub const DEFAULT_OBSERVER_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum SubscribeError {
    /// The task already published its terminal event; no further events
    /// will ever arrive.
    #[error("progress channel for task {0} is closed")]
    Closed(String),
}

struct TaskChannel {
    observers: Vec<mpsc::Sender<ProgressEvent>>,
    closed: bool,
}

/// Per-task fan-out of ordered progress events to any number of observers.
///
/// Single publisher per task (the owning orchestrator). Publishing never
/// blocks: an observer whose buffer is full is dropped, not waited on.
/// Observers joining after event `k` see `k+1, k+2, …` — nothing is
/// replayed. After the terminal event has been handed to every attached
/// observer the channel closes and refuses new subscriptions.
pub struct ProgressBus {
    channels: Mutex<HashMap<String, TaskChannel>>,
    buffer: usize,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_OBSERVER_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Attach an observer to a task's event stream.
    pub fn subscribe(&self, task_id: &str) -> Result<mpsc::Receiver<ProgressEvent>, SubscribeError> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let channel = channels.entry(task_id.to_string()).or_insert(TaskChannel {
            observers: Vec::new(),
            closed: false,
        });
        if channel.closed {
            return Err(SubscribeError::Closed(task_id.to_string()));
        }
        let (tx, rx) = mpsc::channel(self.buffer);
        channel.observers.push(tx);
        Ok(rx)
    }

    /// Publish one event to every attached observer, in publication order.
    ///
    /// A terminal event (`completed`/`failed`) closes the channel after
    /// delivery: observer senders are dropped so their streams end, and
    /// later subscriptions are refused.
    pub fn publish(&self, event: ProgressEvent) {
        let terminal = event.kind.is_terminal();
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let channel = channels
            .entry(event.task_id.clone())
            .or_insert(TaskChannel {
                observers: Vec::new(),
                closed: false,
            });
        if channel.closed {
            return;
        }

        channel.observers.retain(|observer| {
            match observer.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(task_id = %event.task_id, "dropping slow progress observer");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        if terminal {
            channel.closed = true;
            channel.observers.clear();
        }
    }

    /// Number of currently attached observers for a task.
    pub fn observer_count(&self, task_id: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.get(task_id).map_or(0, |c| c.observers.len())
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minerva_contract::ProgressKind;

    fn event(task_id: &str, kind: ProgressKind, message: &str) -> ProgressEvent {
        ProgressEvent::new(task_id, kind, message, None)
    }

    #[tokio::test]
    async fn observers_see_events_in_publication_order() {
        let bus = ProgressBus::new();
        let mut rx = bus.subscribe("t1").unwrap();

        bus.publish(event("t1", ProgressKind::Started, "a"));
        bus.publish(event("t1", ProgressKind::Planning, "b"));
        bus.publish(event("t1", ProgressKind::Iteration, "c"));

        assert_eq!(rx.recv().await.unwrap().message, "a");
        assert_eq!(rx.recv().await.unwrap().message, "b");
        assert_eq!(rx.recv().await.unwrap().message, "c");
    }

    #[tokio::test]
    async fn late_joiner_misses_earlier_events_only() {
        let bus = ProgressBus::new();
        let mut early = bus.subscribe("t1").unwrap();
        bus.publish(event("t1", ProgressKind::Started, "a"));

        let mut late = bus.subscribe("t1").unwrap();
        bus.publish(event("t1", ProgressKind::Planning, "b"));

        assert_eq!(early.recv().await.unwrap().message, "a");
        assert_eq!(early.recv().await.unwrap().message, "b");
        assert_eq!(late.recv().await.unwrap().message, "b");
    }

    #[tokio::test]
    async fn terminal_event_closes_channel_for_new_subscribers() {
        let bus = ProgressBus::new();
        let mut rx = bus.subscribe("t1").unwrap();
        bus.publish(event("t1", ProgressKind::Completed, "done"));

        assert_eq!(rx.recv().await.unwrap().message, "done");
        // Stream ends after terminal delivery.
        assert!(rx.recv().await.is_none());
        assert!(matches!(
            bus.subscribe("t1"),
            Err(SubscribeError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn slow_observer_is_dropped_without_affecting_others() {
        let bus = ProgressBus::with_buffer(2);
        let slow = bus.subscribe("t1").unwrap();
        let mut fast = bus.subscribe("t1").unwrap();

        // Two events fill the slow observer's buffer; the third drops it.
        for i in 0..3 {
            bus.publish(event("t1", ProgressKind::Evidence, &format!("e{i}")));
            if let Ok(received) = fast.try_recv() {
                assert_eq!(received.message, format!("e{i}"));
            }
        }
        assert_eq!(bus.observer_count("t1"), 1);

        bus.publish(event("t1", ProgressKind::Evaluation, "after"));
        assert_eq!(fast.recv().await.unwrap().message, "after");
        drop(slow);
    }

    #[tokio::test]
    async fn publish_without_observers_is_cheap_and_channel_forms() {
        let bus = ProgressBus::new();
        bus.publish(event("t1", ProgressKind::Started, "a"));
        assert_eq!(bus.observer_count("t1"), 0);

        // Channel exists now; a subscriber attached later still works.
        let mut rx = bus.subscribe("t1").unwrap();
        bus.publish(event("t1", ProgressKind::Planning, "b"));
        assert_eq!(rx.recv().await.unwrap().message, "b");
    }

    #[tokio::test]
    async fn events_for_other_tasks_are_not_delivered() {
        let bus = ProgressBus::new();
        let mut rx = bus.subscribe("t1").unwrap();
        bus.publish(event("t2", ProgressKind::Started, "other"));
        bus.publish(event("t1", ProgressKind::Started, "mine"));
        assert_eq!(rx.recv().await.unwrap().message, "mine");
    }
}
