use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use super::dispatcher::RunStatus;

/// Run lifecycle events, emitted only when a sender is attached to the executor.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
        pipeline_id: String,
        timestamp: DateTime<Utc>,
    },

    NodeStarted {
        run_id: String,
        node_id: String,
        node_type: String,
        runner: String,
        timestamp: DateTime<Utc>,
    },

    NodeSucceeded {
        run_id: String,
        node_id: String,
        execution_time_ms: u64,
        timestamp: DateTime<Utc>,
    },

    NodeFailed {
        run_id: String,
        node_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    RunFinished {
        run_id: String,
        status: RunStatus,
        total_time_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

pub type EventSender = mpsc::UnboundedSender<PipelineEvent>;

pub type EventReceiver = mpsc::UnboundedReceiver<PipelineEvent>;

pub fn create_event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_channel() {
        let (sender, mut receiver) = create_event_channel();

        sender
            .send(PipelineEvent::NodeStarted {
                run_id: "r".to_string(),
                node_id: "node1".to_string(),
                node_type: "InlineDataNode".to_string(),
                runner: "builtin".to_string(),
                timestamp: Utc::now(),
            })
            .unwrap();

        let event = receiver.recv().await.unwrap();
        match event {
            PipelineEvent::NodeStarted { node_id, .. } => {
                assert_eq!(node_id, "node1");
            }
            _ => panic!("Unexpected event type"),
        }
    }

    #[test]
    fn test_event_serialises_with_tag() {
        let event = PipelineEvent::RunFinished {
            run_id: "r".into(),
            status: RunStatus::Completed,
            total_time_ms: 3,
            timestamp: Utc::now(),
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["event"], "run_finished");
        assert_eq!(v["status"], "completed");
    }
}
