use serde::{Serialize, Deserialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
  Waiting,
  Retry,
  Queued,
  Running,
  Success,
  Failed,
}

impl TaskStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      TaskStatus::Waiting => "WAITING",
      TaskStatus::Retry => "RETRY",
      TaskStatus::Queued => "QUEUED",
      TaskStatus::Running => "RUNNING",
      TaskStatus::Success => "SUCCESS",
      TaskStatus::Failed => "FAILED",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "WAITING" => Some(TaskStatus::Waiting),
      "RETRY" => Some(TaskStatus::Retry),
      "QUEUED" => Some(TaskStatus::Queued),
      "RUNNING" => Some(TaskStatus::Running),
      "SUCCESS" => Some(TaskStatus::Success),
      "FAILED" => Some(TaskStatus::Failed),
      _ => None,
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, TaskStatus::Success | TaskStatus::Failed)
  }

  pub fn is_pending(&self) -> bool {
    matches!(self, TaskStatus::Waiting | TaskStatus::Retry)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
  pub node_id: String,
  pub field_name: String,
  pub field_value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
  pub unique_id: Uuid,
  pub task_id: Option<String>,
  pub client_id: String,
  #[serde(skip_serializing)]
  pub api_key: String,
  pub workflow_id: String,
  pub node_info_list: Vec<NodeInfo>,
  pub status: TaskStatus,
  pub result: Option<serde_json::Value>,
  pub error: Option<String>,
  pub created_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkflowRequest {
  pub api_key: String,
  pub workflow_id: String,
  #[serde(default)]
  pub node_info_list: Vec<NodeInfo>,
  #[serde(default)]
  pub client_id: Option<String>,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
}
