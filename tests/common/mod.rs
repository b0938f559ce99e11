#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use workflow_relay::coordinator::Coordinator;
use workflow_relay::models::{CreateWorkflowRequest, NodeInfo, TaskRecord, TaskStatus};
use workflow_relay::notify::{Notifier, ServerEvent};
use workflow_relay::store::{StoreError, TaskStore};
use workflow_relay::upstream::{SubmitOutcome, UpstreamApi, UpstreamError};

#[derive(Default)]
pub struct MemoryTaskStore {
  tasks: Mutex<Vec<TaskRecord>>,
}

impl MemoryTaskStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn get(&self, unique_id: Uuid) -> Option<TaskRecord> {
    self.tasks.lock().await.iter().find(|t| t.unique_id == unique_id).cloned()
  }

  pub async fn count(&self) -> usize {
    self.tasks.lock().await.len()
  }

  pub async fn seed(&self, record: TaskRecord) {
    self.tasks.lock().await.push(record);
  }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
  async fn insert(&self, record: &TaskRecord) -> Result<(), StoreError> {
    self.tasks.lock().await.push(record.clone());
    Ok(())
  }

  async fn set_accepted(
    &self,
    unique_id: Uuid,
    task_id: &str,
    status: TaskStatus,
  ) -> Result<(), StoreError> {
    let mut tasks = self.tasks.lock().await;
    if let Some(task) = tasks.iter_mut().find(|t| t.unique_id == unique_id) {
      task.task_id = Some(task_id.to_string());
      task.status = status;
    }
    Ok(())
  }

  async fn set_succeeded(&self, unique_id: Uuid) -> Result<(), StoreError> {
    let mut tasks = self.tasks.lock().await;
    if let Some(task) = tasks.iter_mut().find(|t| t.unique_id == unique_id) {
      task.status = TaskStatus::Success;
      task.completed_at = Some(Utc::now());
    }
    Ok(())
  }

  async fn set_failed(&self, unique_id: Uuid, error: &str) -> Result<(), StoreError> {
    let mut tasks = self.tasks.lock().await;
    if let Some(task) = tasks.iter_mut().find(|t| t.unique_id == unique_id) {
      task.status = TaskStatus::Failed;
      task.error = Some(error.to_string());
      task.completed_at = Some(Utc::now());
    }
    Ok(())
  }

  async fn complete_by_task_id(
    &self,
    task_id: &str,
    status: TaskStatus,
    result: Option<serde_json::Value>,
    error: Option<String>,
  ) -> Result<Option<TaskRecord>, StoreError> {
    let mut tasks = self.tasks.lock().await;
    let task = tasks.iter_mut().find(|t| {
      t.task_id.as_deref() == Some(task_id)
        && matches!(t.status, TaskStatus::Queued | TaskStatus::Running)
    });
    Ok(task.map(|t| {
      t.status = status;
      t.result = result;
      t.error = error;
      t.completed_at = Some(Utc::now());
      t.clone()
    }))
  }

  async fn tasks_for_client(&self, client_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
    let tasks = self.tasks.lock().await;
    let mut matching: Vec<TaskRecord> = tasks
      .iter()
      .filter(|t| t.client_id == client_id)
      .cloned()
      .collect();
    matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(matching)
  }

  async fn delete(
    &self,
    unique_id: Option<Uuid>,
    task_id: Option<&str>,
    created_at: Option<DateTime<Utc>>,
  ) -> Result<bool, StoreError> {
    let mut tasks = self.tasks.lock().await;
    let before = tasks.len();
    if let Some(id) = unique_id {
      tasks.retain(|t| t.unique_id != id);
    } else if let Some(id) = task_id {
      tasks.retain(|t| t.task_id.as_deref() != Some(id));
    } else if let Some(ts) = created_at {
      tasks.retain(|t| t.created_at != ts);
    }
    Ok(tasks.len() < before)
  }
}

/// Upstream fake: pops scripted responses in order, then repeats the
/// fallback. Records the workflowId of every call for ordering assertions.
pub struct ScriptedUpstream {
  script: Mutex<VecDeque<Result<SubmitOutcome, String>>>,
  fallback: SubmitOutcome,
  calls: Mutex<Vec<String>>,
}

impl ScriptedUpstream {
  pub fn new(fallback: SubmitOutcome) -> Self {
    Self::with_script(vec![], fallback)
  }

  pub fn with_script(script: Vec<Result<SubmitOutcome, String>>, fallback: SubmitOutcome) -> Self {
    Self {
      script: Mutex::new(script.into()),
      fallback,
      calls: Mutex::new(vec![]),
    }
  }

  pub async fn calls(&self) -> Vec<String> {
    self.calls.lock().await.clone()
  }

  pub async fn call_count(&self) -> usize {
    self.calls.lock().await.len()
  }
}

#[async_trait]
impl UpstreamApi for ScriptedUpstream {
  async fn create_task(
    &self,
    _api_key: &str,
    workflow_id: &str,
    _node_info_list: &[NodeInfo],
  ) -> Result<SubmitOutcome, UpstreamError> {
    self.calls.lock().await.push(workflow_id.to_string());
    match self.script.lock().await.pop_front() {
      Some(Ok(outcome)) => Ok(outcome),
      Some(Err(msg)) => Err(UpstreamError::Malformed(msg)),
      None => Ok(self.fallback.clone()),
    }
  }
}

pub fn accepted(task_id: &str, status: TaskStatus) -> SubmitOutcome {
  SubmitOutcome::Accepted { task_id: task_id.to_string(), status }
}

pub fn rejected() -> SubmitOutcome {
  SubmitOutcome::Rejected { code: 500, msg: "APIKEY_INVALID_NODE_INFO".into() }
}

pub fn setup(
  upstream: Arc<ScriptedUpstream>,
) -> (Arc<Coordinator>, Arc<MemoryTaskStore>, Arc<Notifier>) {
  let store = Arc::new(MemoryTaskStore::new());
  let notifier = Arc::new(Notifier::new());
  let coordinator = Coordinator::new(store.clone(), upstream, notifier.clone());
  (coordinator, store, notifier)
}

pub fn request(workflow_id: &str, client_id: Option<&str>) -> CreateWorkflowRequest {
  CreateWorkflowRequest {
    api_key: "test-key".into(),
    workflow_id: workflow_id.to_string(),
    node_info_list: vec![NodeInfo {
      node_id: "6".into(),
      field_name: "text".into(),
      field_value: json!("a portrait"),
    }],
    client_id: client_id.map(str::to_string),
    created_at: None,
  }
}

pub fn stored_record(
  client_id: &str,
  status: TaskStatus,
  created_at: DateTime<Utc>,
) -> TaskRecord {
  TaskRecord {
    unique_id: Uuid::new_v4(),
    task_id: matches!(status, TaskStatus::Queued | TaskStatus::Running)
      .then(|| format!("T-{}", Uuid::new_v4())),
    client_id: client_id.to_string(),
    api_key: "test-key".into(),
    workflow_id: "wf-stored".into(),
    node_info_list: vec![NodeInfo {
      node_id: "6".into(),
      field_name: "text".into(),
      field_value: json!("stored"),
    }],
    status,
    result: None,
    error: None,
    created_at,
    completed_at: None,
  }
}

pub fn reply_channel() -> (
  mpsc::UnboundedSender<ServerEvent>,
  mpsc::UnboundedReceiver<ServerEvent>,
) {
  mpsc::unbounded_channel()
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
  let mut events = vec![];
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }
  events
}
