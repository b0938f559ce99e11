use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, types::Json};
use uuid::Uuid;

use crate::models::{NodeInfo, TaskRecord, TaskStatus};

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    unique_id, task_id, client_id, api_key, workflow_id, \
    node_info_list, status, result, error, created_at, completed_at";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
  #[error("corrupt task record: {0}")]
  Decode(String),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
  async fn insert(&self, record: &TaskRecord) -> Result<(), StoreError>;
  async fn set_accepted(
    &self,
    unique_id: Uuid,
    task_id: &str,
    status: TaskStatus,
  ) -> Result<(), StoreError>;
  async fn set_succeeded(&self, unique_id: Uuid) -> Result<(), StoreError>;
  async fn set_failed(&self, unique_id: Uuid, error: &str) -> Result<(), StoreError>;
  /// Terminal transition reported by the polling client. Only touches
  /// tasks still in QUEUED/RUNNING; returns the updated record.
  async fn complete_by_task_id(
    &self,
    task_id: &str,
    status: TaskStatus,
    result: Option<serde_json::Value>,
    error: Option<String>,
  ) -> Result<Option<TaskRecord>, StoreError>;
  async fn tasks_for_client(&self, client_id: &str) -> Result<Vec<TaskRecord>, StoreError>;
  async fn delete(
    &self,
    unique_id: Option<Uuid>,
    task_id: Option<&str>,
    created_at: Option<DateTime<Utc>>,
  ) -> Result<bool, StoreError>;
}

#[derive(sqlx::FromRow)]
struct TaskRow {
  unique_id: Uuid,
  task_id: Option<String>,
  client_id: String,
  api_key: String,
  workflow_id: String,
  node_info_list: Json<Vec<NodeInfo>>,
  status: String,
  result: Option<serde_json::Value>,
  error: Option<String>,
  created_at: DateTime<Utc>,
  completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for TaskRecord {
  type Error = StoreError;

  fn try_from(row: TaskRow) -> Result<Self, StoreError> {
    let status = TaskStatus::parse(&row.status)
      .ok_or_else(|| StoreError::Decode(format!("unknown status '{}'", row.status)))?;
    Ok(TaskRecord {
      unique_id: row.unique_id,
      task_id: row.task_id,
      client_id: row.client_id,
      api_key: row.api_key,
      workflow_id: row.workflow_id,
      node_info_list: row.node_info_list.0,
      status,
      result: row.result,
      error: row.error,
      created_at: row.created_at,
      completed_at: row.completed_at,
    })
  }
}

pub struct PgTaskStore {
  pool: PgPool,
}

impl PgTaskStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl TaskStore for PgTaskStore {
  async fn insert(&self, record: &TaskRecord) -> Result<(), StoreError> {
    sqlx::query(
      "INSERT INTO tasks (unique_id, task_id, client_id, api_key, workflow_id, \
       node_info_list, status, result, error, created_at, completed_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(record.unique_id)
    .bind(&record.task_id)
    .bind(&record.client_id)
    .bind(&record.api_key)
    .bind(&record.workflow_id)
    .bind(Json(&record.node_info_list))
    .bind(record.status.as_str())
    .bind(&record.result)
    .bind(&record.error)
    .bind(record.created_at)
    .bind(record.completed_at)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn set_accepted(
    &self,
    unique_id: Uuid,
    task_id: &str,
    status: TaskStatus,
  ) -> Result<(), StoreError> {
    sqlx::query("UPDATE tasks SET task_id = $2, status = $3 WHERE unique_id = $1")
      .bind(unique_id)
      .bind(task_id)
      .bind(status.as_str())
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn set_succeeded(&self, unique_id: Uuid) -> Result<(), StoreError> {
    sqlx::query(
      "UPDATE tasks SET status = 'SUCCESS', completed_at = NOW() WHERE unique_id = $1",
    )
    .bind(unique_id)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn set_failed(&self, unique_id: Uuid, error: &str) -> Result<(), StoreError> {
    sqlx::query(
      "UPDATE tasks SET status = 'FAILED', error = $2, completed_at = NOW() \
       WHERE unique_id = $1",
    )
    .bind(unique_id)
    .bind(error)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn complete_by_task_id(
    &self,
    task_id: &str,
    status: TaskStatus,
    result: Option<serde_json::Value>,
    error: Option<String>,
  ) -> Result<Option<TaskRecord>, StoreError> {
    let query = format!(
      "UPDATE tasks SET status = $2, result = $3, error = $4, completed_at = NOW() \
       WHERE task_id = $1 AND status IN ('QUEUED', 'RUNNING') \
       RETURNING {COLUMNS}"
    );
    let row = sqlx::query_as::<_, TaskRow>(&query)
      .bind(task_id)
      .bind(status.as_str())
      .bind(result)
      .bind(error)
      .fetch_optional(&self.pool)
      .await?;
    row.map(TaskRecord::try_from).transpose()
  }

  async fn tasks_for_client(&self, client_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
    let query = format!(
      "SELECT {COLUMNS} FROM tasks WHERE client_id = $1 ORDER BY created_at DESC"
    );
    let rows = sqlx::query_as::<_, TaskRow>(&query)
      .bind(client_id)
      .fetch_all(&self.pool)
      .await?;
    rows.into_iter().map(TaskRecord::try_from).collect()
  }

  async fn delete(
    &self,
    unique_id: Option<Uuid>,
    task_id: Option<&str>,
    created_at: Option<DateTime<Utc>>,
  ) -> Result<bool, StoreError> {
    // First-present key wins; the identifiers are alternatives, not a union.
    let done = if let Some(unique_id) = unique_id {
      sqlx::query("DELETE FROM tasks WHERE unique_id = $1")
        .bind(unique_id)
        .execute(&self.pool)
        .await?
    } else if let Some(task_id) = task_id {
      sqlx::query("DELETE FROM tasks WHERE task_id = $1")
        .bind(task_id)
        .execute(&self.pool)
        .await?
    } else if let Some(created_at) = created_at {
      sqlx::query("DELETE FROM tasks WHERE created_at = $1")
        .bind(created_at)
        .execute(&self.pool)
        .await?
    } else {
      return Ok(false);
    };
    Ok(done.rows_affected() > 0)
  }
}
