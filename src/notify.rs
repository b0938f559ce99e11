use std::collections::HashMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::models::{NodeInfo, TaskRecord, TaskStatus};

/// Events pushed to browser clients, framed as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
  WorkflowCreated {
    task_id: Option<String>,
    client_id: String,
    status: TaskStatus,
    unique_id: Uuid,
    created_at: DateTime<Utc>,
    node_info_list: Vec<NodeInfo>,
  },
  WorkflowStatusUpdate {
    unique_id: Uuid,
    original_created_at: DateTime<Utc>,
    task_id: Option<String>,
    status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
  },
  TaskRecoveryUpdate {
    client_id: String,
    unique_id: Uuid,
    task_id: Option<String>,
    status: TaskStatus,
    message: String,
  },
  ClientTasks {
    client_id: String,
    tasks: Vec<TaskRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
  },
  TaskDeleted {
    unique_id: Option<Uuid>,
    task_id: Option<String>,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
  },
  WorkflowError {
    error: String,
  },
}

pub type Subscriber = mpsc::UnboundedSender<ServerEvent>;

/// Topic hub keyed by clientId. Connections subscribe when they first
/// identify themselves; task events published to the topic reach every
/// connection currently subscribed, so delivery survives reconnects.
#[derive(Default)]
pub struct Notifier {
  topics: Mutex<HashMap<String, Vec<(u64, Subscriber)>>>,
}

impl Notifier {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn subscribe(&self, client_id: &str, conn_id: u64, tx: Subscriber) {
    let mut topics = self.topics.lock().await;
    let subs = topics.entry(client_id.to_string()).or_default();
    if subs.iter().all(|(id, _)| *id != conn_id) {
      subs.push((conn_id, tx));
    }
  }

  pub async fn unsubscribe(&self, conn_id: u64) {
    let mut topics = self.topics.lock().await;
    for subs in topics.values_mut() {
      subs.retain(|(id, _)| *id != conn_id);
    }
    topics.retain(|_, subs| !subs.is_empty());
  }

  /// Publish to every live subscriber of the client's topic; closed
  /// connections are pruned. Returns the delivery count.
  pub async fn publish(&self, client_id: &str, event: ServerEvent) -> usize {
    let mut topics = self.topics.lock().await;
    let Some(subs) = topics.get_mut(client_id) else {
      return 0;
    };
    subs.retain(|(_, tx)| !tx.is_closed());
    let mut delivered = 0;
    for (_, tx) in subs.iter() {
      if tx.send(event.clone()).is_ok() {
        delivered += 1;
      }
    }
    if subs.is_empty() {
      topics.remove(client_id);
    }
    delivered
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn error_event() -> ServerEvent {
    ServerEvent::WorkflowError { error: "nope".into() }
  }

  #[test]
  fn events_use_the_event_data_frame() {
    let json = serde_json::to_value(ServerEvent::TaskDeleted {
      unique_id: None,
      task_id: Some("T1".into()),
      success: true,
      error: None,
    })
    .unwrap();
    assert_eq!(json["event"], "taskDeleted");
    assert_eq!(json["data"]["taskId"], "T1");
    assert_eq!(json["data"]["success"], true);
    assert!(json["data"].get("error").is_none());
  }

  #[tokio::test]
  async fn publish_reaches_only_the_matching_topic() {
    let notifier = Notifier::new();
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    notifier.subscribe("client-a", 1, tx_a).await;
    notifier.subscribe("client-b", 2, tx_b).await;

    assert_eq!(notifier.publish("client-a", error_event()).await, 1);
    assert!(rx_a.try_recv().is_ok());
    assert!(rx_b.try_recv().is_err());
  }

  #[tokio::test]
  async fn duplicate_subscription_is_idempotent() {
    let notifier = Notifier::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    notifier.subscribe("client-a", 7, tx.clone()).await;
    notifier.subscribe("client-a", 7, tx).await;

    assert_eq!(notifier.publish("client-a", error_event()).await, 1);
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn closed_subscribers_are_pruned() {
    let notifier = Notifier::new();
    let (tx, rx) = mpsc::unbounded_channel();
    notifier.subscribe("client-a", 1, tx).await;
    drop(rx);
    assert_eq!(notifier.publish("client-a", error_event()).await, 0);
  }

  #[tokio::test]
  async fn unsubscribe_removes_the_connection_everywhere() {
    let notifier = Notifier::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    notifier.subscribe("client-a", 3, tx.clone()).await;
    notifier.subscribe("client-b", 3, tx).await;
    notifier.unsubscribe(3).await;
    assert_eq!(notifier.publish("client-a", error_event()).await, 0);
    assert_eq!(notifier.publish("client-b", error_event()).await, 0);
  }
}
