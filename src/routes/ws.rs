use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error};
use uuid::Uuid;
use warp::Filter;
use warp::ws::{Message, WebSocket};

use crate::coordinator::Coordinator;
use crate::models::CreateWorkflowRequest;
use crate::notify::{ServerEvent, Subscriber};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Messages received from browsers, framed as `{"event": ..., "data": ...}`.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
  CreateWorkflow(CreateWorkflowRequest),
  TaskCompleted {
    task_id: String,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
  },
  DeleteTask {
    #[serde(default)]
    unique_id: Option<Uuid>,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    is_waiting: bool,
  },
  GetClientTasks {
    client_id: String,
  },
}

fn with_coordinator(
  coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = (Arc<Coordinator>,), Error = Infallible> + Clone {
  warp::any().map(move || coordinator.clone())
}

pub fn ws_route(
  coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("ws")
    .and(warp::ws())
    .and(with_coordinator(coordinator))
    .map(|ws: warp::ws::Ws, coordinator: Arc<Coordinator>| {
      ws.on_upgrade(move |socket| handle_connection(socket, coordinator))
    })
}

async fn handle_connection(ws: WebSocket, coordinator: Arc<Coordinator>) {
  let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
  let (mut ws_tx, mut ws_rx) = ws.split();
  let (tx, rx) = mpsc::unbounded_channel::<ServerEvent>();
  let mut rx = UnboundedReceiverStream::new(rx);

  tokio::spawn(async move {
    while let Some(event) = rx.next().await {
      match serde_json::to_string(&event) {
        Ok(text) => {
          if ws_tx.send(Message::text(text)).await.is_err() {
            break;
          }
        }
        Err(e) => error!(conn_id, error = %e, "failed to serialize event"),
      }
    }
  });

  while let Some(result) = ws_rx.next().await {
    let msg = match result {
      Ok(msg) => msg,
      Err(e) => {
        debug!(conn_id, error = %e, "websocket closed with error");
        break;
      }
    };
    let Ok(text) = msg.to_str() else {
      continue;
    };
    match serde_json::from_str::<ClientEvent>(text) {
      Ok(event) => dispatch(conn_id, event, &tx, &coordinator).await,
      Err(e) => {
        let _ = tx.send(ServerEvent::WorkflowError {
          error: format!("Unrecognized message: {e}"),
        });
      }
    }
  }

  coordinator.notifier().unsubscribe(conn_id).await;
  debug!(conn_id, "connection closed");
}

async fn dispatch(
  conn_id: u64,
  event: ClientEvent,
  tx: &Subscriber,
  coordinator: &Arc<Coordinator>,
) {
  match event {
    ClientEvent::CreateWorkflow(req) => {
      // Subscribe before submitting so queue-driver events for this task
      // reach the connection that created it.
      if let Some(client_id) = req.client_id.as_deref() {
        coordinator.notifier().subscribe(client_id, conn_id, tx.clone()).await;
      }
      coordinator.submit(req, tx).await;
    }
    ClientEvent::TaskCompleted { task_id, result, error } => {
      coordinator.task_completed(task_id, result, error).await;
    }
    ClientEvent::DeleteTask { unique_id, task_id, created_at, is_waiting } => {
      coordinator.delete_task(unique_id, task_id, created_at, is_waiting, tx).await;
    }
    ClientEvent::GetClientTasks { client_id } => {
      coordinator.notifier().subscribe(&client_id, conn_id, tx.clone()).await;
      let event = match coordinator.reconcile(&client_id).await {
        Ok(tasks) => ServerEvent::ClientTasks { client_id, tasks, error: None },
        Err(e) => {
          error!(%client_id, error = %e, "failed to load client tasks");
          ServerEvent::ClientTasks {
            client_id,
            tasks: vec![],
            error: Some("Failed to load task history".into()),
          }
        }
      };
      let _ = tx.send(event);
    }
  }
}
