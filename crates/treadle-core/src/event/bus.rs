//! Run event fan-out.
//!
//! The engine publishes every run's events on one broadcast channel. Observers
//! either take the whole stream with [`EventBus::subscribe`] or follow a single
//! run with [`EventBus::subscribe_run`], which drops other runs' events and
//! ends once that run reports `RunFinished`.

use tokio::sync::broadcast;
use treadle_types::event::WorkflowEvent;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    /// Observers further behind than `capacity` events lose the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Every event of every run published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Events of `run_id` only. Subscribe before starting the run to see its
    /// `RunStarted`.
    pub fn subscribe_run(&self, run_id: Uuid) -> RunEvents {
        RunEvents {
            run_id,
            receiver: self.sender.subscribe(),
            finished: false,
        }
    }

    /// Dropped when nobody is listening.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }
}

/// Event stream of a single run.
#[derive(Debug)]
pub struct RunEvents {
    run_id: Uuid,
    receiver: broadcast::Receiver<WorkflowEvent>,
    finished: bool,
}

impl RunEvents {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Next event of this run. `None` after the run's `RunFinished` has been
    /// returned, or once every bus handle is gone. Lag skips ahead.
    pub async fn recv(&mut self) -> Option<WorkflowEvent> {
        if self.finished {
            return None;
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.run_id() != self.run_id => continue,
                Ok(event) => {
                    self.finished = matches!(event, WorkflowEvent::RunFinished { .. });
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(run_id = %self.run_id, missed, "run observer lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treadle_types::node::{NodePhase, WorkflowPhase};

    fn node_event(run_id: Uuid, node: &str) -> WorkflowEvent {
        WorkflowEvent::NodePhaseChanged {
            run_id,
            node: node.to_string(),
            phase: NodePhase::Running,
            message: None,
        }
    }

    fn finished(run_id: Uuid) -> WorkflowEvent {
        WorkflowEvent::RunFinished {
            run_id,
            workflow: "wf".to_string(),
            phase: WorkflowPhase::Succeeded,
            duration_ms: 0,
        }
    }

    fn node_name(event: Option<WorkflowEvent>) -> String {
        match event {
            Some(WorkflowEvent::NodePhaseChanged { node, .. }) => node,
            other => panic!("expected a node event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_run() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.clone().subscribe();

        bus.publish(node_event(Uuid::now_v7(), "wf.a"));
        bus.publish(node_event(Uuid::now_v7(), "wf.b"));

        for rx in [&mut rx1, &mut rx2] {
            assert!(matches!(rx.recv().await.unwrap(), WorkflowEvent::NodePhaseChanged { .. }));
            assert!(matches!(rx.recv().await.unwrap(), WorkflowEvent::NodePhaseChanged { .. }));
        }
    }

    #[test]
    fn test_publish_without_observers() {
        let bus = EventBus::new(16);
        bus.publish(node_event(Uuid::now_v7(), "wf.a"));
    }

    #[tokio::test]
    async fn test_run_subscription_skips_other_runs() {
        let bus = EventBus::new(16);
        let mine = Uuid::now_v7();
        let other = Uuid::now_v7();
        let mut events = bus.subscribe_run(mine);

        bus.publish(node_event(other, "other.a"));
        bus.publish(node_event(mine, "wf.a"));
        bus.publish(node_event(other, "other.b"));
        bus.publish(node_event(mine, "wf.b"));

        assert_eq!(events.run_id(), mine);
        assert_eq!(node_name(events.recv().await), "wf.a");
        assert_eq!(node_name(events.recv().await), "wf.b");
    }

    #[tokio::test]
    async fn test_run_subscription_ends_after_run_finished() {
        let bus = EventBus::new(16);
        let run_id = Uuid::now_v7();
        let mut events = bus.subscribe_run(run_id);

        bus.publish(node_event(run_id, "wf.a"));
        bus.publish(finished(Uuid::now_v7()));
        bus.publish(finished(run_id));
        bus.publish(node_event(run_id, "wf.late"));

        assert_eq!(node_name(events.recv().await), "wf.a");
        assert!(matches!(
            events.recv().await,
            Some(WorkflowEvent::RunFinished { run_id: id, .. }) if id == run_id
        ));
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_run_subscription_recovers_from_lag() {
        let bus = EventBus::new(4);
        let run_id = Uuid::now_v7();
        let mut events = bus.subscribe_run(run_id);

        for i in 0..10 {
            bus.publish(node_event(run_id, &format!("wf.n{i}")));
        }

        // The four newest survive.
        assert_eq!(node_name(events.recv().await), "wf.n6");
    }

    #[tokio::test]
    async fn test_run_subscription_ends_when_bus_dropped() {
        let bus = EventBus::new(4);
        let mut events = bus.subscribe_run(Uuid::now_v7());
        drop(bus);
        assert!(events.recv().await.is_none());
    }
}
