use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{info, warn, error, debug};
use uuid::Uuid;

use crate::models::{CreateWorkflowRequest, TaskRecord, TaskStatus};
use crate::notify::{Notifier, ServerEvent, Subscriber};
use crate::scheduler::{
  backoff_delay, PendingReason, WaitingEntry, WaitingQueue, KICK_DELAY, MAX_RETRY_ATTEMPTS,
};
use crate::store::{StoreError, TaskStore};
use crate::upstream::{SubmitOutcome, UpstreamApi};

static MISSING_CLIENT_ID: &str = "MISSING_CLIENT_ID";
static INVALID_CLIENT_ID: &str = "INVALID_CLIENT_ID";
static RETRIES_EXHAUSTED: &str = "Task submission failed after maximum retry attempts";
static CREATE_FAILED: &str = "Failed to create workflow task";

fn valid_client_id(client_id: &str) -> bool {
  Regex::new(r"^[\w.:\-]{1,128}$").unwrap().is_match(client_id)
}

/// Owns the waiting queue, the advisory in-flight counter, and handles to
/// the store, upstream API, and notification hub. All task lifecycle
/// decisions go through here.
pub struct Coordinator {
  store: Arc<dyn TaskStore>,
  upstream: Arc<dyn UpstreamApi>,
  notifier: Arc<Notifier>,
  queue: WaitingQueue,
  inflight: AtomicU32,
  driver_busy: AtomicBool,
}

impl Coordinator {
  pub fn new(
    store: Arc<dyn TaskStore>,
    upstream: Arc<dyn UpstreamApi>,
    notifier: Arc<Notifier>,
  ) -> Arc<Self> {
    Arc::new(Self {
      store,
      upstream,
      notifier,
      queue: WaitingQueue::new(),
      inflight: AtomicU32::new(0),
      driver_busy: AtomicBool::new(false),
    })
  }

  pub fn notifier(&self) -> &Arc<Notifier> {
    &self.notifier
  }

  pub async fn queue_len(&self) -> usize {
    self.queue.len().await
  }

  pub fn inflight_count(&self) -> u32 {
    self.inflight.load(Ordering::SeqCst)
  }

  /// Accept a creation request, attempt the upstream submission, and route
  /// the task to active, pending, or rejected.
  pub async fn submit(self: &Arc<Self>, req: CreateWorkflowRequest, reply: &Subscriber) {
    let client_id = match req.client_id.as_deref().map(str::trim) {
      None | Some("") => {
        let _ = reply.send(ServerEvent::WorkflowError { error: MISSING_CLIENT_ID.into() });
        return;
      }
      Some(id) if !valid_client_id(id) => {
        let _ = reply.send(ServerEvent::WorkflowError { error: INVALID_CLIENT_ID.into() });
        return;
      }
      Some(id) => id.to_string(),
    };

    let unique_id = Uuid::new_v4();
    let created_at = req.created_at.unwrap_or_else(Utc::now);

    let outcome = self.upstream
      .create_task(&req.api_key, &req.workflow_id, &req.node_info_list)
      .await;

    match outcome {
      Ok(SubmitOutcome::Accepted { task_id, status }) => {
        info!(%unique_id, %task_id, status = status.as_str(), "workflow accepted upstream");
        let record = TaskRecord {
          unique_id,
          task_id: Some(task_id.clone()),
          client_id: client_id.clone(),
          api_key: req.api_key,
          workflow_id: req.workflow_id,
          node_info_list: req.node_info_list,
          status,
          result: None,
          error: None,
          created_at,
          completed_at: None,
        };
        self.persist(&record).await;
        self.inflight.fetch_add(1, Ordering::SeqCst);
        let _ = reply.send(ServerEvent::WorkflowCreated {
          task_id: Some(task_id),
          client_id,
          status,
          unique_id,
          created_at,
          node_info_list: record.node_info_list,
        });
      }
      Ok(SubmitOutcome::Completed) => {
        info!(%unique_id, "workflow completed immediately without a task id");
        let record = TaskRecord {
          unique_id,
          task_id: None,
          client_id: client_id.clone(),
          api_key: req.api_key,
          workflow_id: req.workflow_id,
          node_info_list: req.node_info_list,
          status: TaskStatus::Success,
          result: None,
          error: None,
          created_at,
          completed_at: Some(Utc::now()),
        };
        self.persist(&record).await;
        let _ = reply.send(ServerEvent::WorkflowCreated {
          task_id: None,
          client_id,
          status: TaskStatus::Success,
          unique_id,
          created_at,
          node_info_list: record.node_info_list,
        });
      }
      Ok(SubmitOutcome::QueueFull) => {
        self.enqueue_pending(req, client_id, unique_id, created_at, PendingReason::QueueFull, reply)
          .await;
      }
      Ok(SubmitOutcome::Rejected { code, msg }) => {
        warn!(%unique_id, code, %msg, "upstream rejected workflow, will retry");
        self.enqueue_pending(req, client_id, unique_id, created_at, PendingReason::UpstreamError, reply)
          .await;
      }
      Err(e) => {
        error!(%unique_id, error = %e, "upstream call failed during creation");
        let _ = reply.send(ServerEvent::WorkflowError { error: CREATE_FAILED.into() });
      }
    }
  }

  async fn enqueue_pending(
    self: &Arc<Self>,
    req: CreateWorkflowRequest,
    client_id: String,
    unique_id: Uuid,
    created_at: DateTime<Utc>,
    reason: PendingReason,
    reply: &Subscriber,
  ) {
    let status = reason.display_status();
    let entry = WaitingEntry {
      unique_id,
      client_id: client_id.clone(),
      api_key: req.api_key.clone(),
      workflow_id: req.workflow_id.clone(),
      node_info_list: req.node_info_list.clone(),
      created_at,
      reason,
      retry_count: 0,
    };
    self.queue.push(entry).await;
    info!(%unique_id, status = status.as_str(), "workflow enqueued for resubmission");

    let record = TaskRecord {
      unique_id,
      task_id: None,
      client_id: client_id.clone(),
      api_key: req.api_key,
      workflow_id: req.workflow_id,
      node_info_list: req.node_info_list,
      status,
      result: None,
      error: None,
      created_at,
      completed_at: None,
    };
    self.persist(&record).await;

    let _ = reply.send(ServerEvent::WorkflowCreated {
      task_id: None,
      client_id,
      status,
      unique_id,
      created_at,
      node_info_list: record.node_info_list,
    });

    if self.inflight.load(Ordering::SeqCst) == 0 {
      self.schedule_kick(KICK_DELAY);
    }
  }

  /// Attempt the head of the waiting queue. Guarded so overlapping
  /// invocations (completion events racing with backoff timers) collapse
  /// into one outstanding attempt.
  pub async fn try_submit_head(self: Arc<Self>) {
    if self.driver_busy.swap(true, Ordering::SeqCst) {
      return;
    }
    let retry_after = self.drive_head().await;
    self.driver_busy.store(false, Ordering::SeqCst);
    if let Some(delay) = retry_after {
      self.schedule_kick(delay);
    }
  }

  async fn drive_head(&self) -> Option<Duration> {
    let entry = self.queue.peek().await?;
    let outcome = self.upstream
      .create_task(&entry.api_key, &entry.workflow_id, &entry.node_info_list)
      .await;

    match outcome {
      // Head stays put; the next completion or timer will try again.
      Ok(SubmitOutcome::QueueFull) => None,
      Ok(SubmitOutcome::Accepted { task_id, status }) => {
        // The entry may have been deleted while the call was in flight.
        if self.queue.pop_front_if(entry.unique_id).await.is_some() {
          info!(unique_id = %entry.unique_id, %task_id, "waiting task accepted upstream");
          if let Err(e) = self.store.set_accepted(entry.unique_id, &task_id, status).await {
            error!(unique_id = %entry.unique_id, error = %e, "failed to persist acceptance");
          }
          self.inflight.fetch_add(1, Ordering::SeqCst);
          self.notifier
            .publish(&entry.client_id, ServerEvent::TaskRecoveryUpdate {
              client_id: entry.client_id.clone(),
              unique_id: entry.unique_id,
              task_id: Some(task_id),
              status,
              message: "Task submitted after waiting".into(),
            })
            .await;
        }
        None
      }
      Ok(SubmitOutcome::Completed) => {
        if self.queue.pop_front_if(entry.unique_id).await.is_some() {
          info!(unique_id = %entry.unique_id, "waiting task completed without a task id");
          if let Err(e) = self.store.set_succeeded(entry.unique_id).await {
            error!(unique_id = %entry.unique_id, error = %e, "failed to persist completion");
          }
          self.notifier
            .publish(&entry.client_id, ServerEvent::TaskRecoveryUpdate {
              client_id: entry.client_id.clone(),
              unique_id: entry.unique_id,
              task_id: None,
              status: TaskStatus::Success,
              message: "Task completed after waiting".into(),
            })
            .await;
        }
        None
      }
      Ok(SubmitOutcome::Rejected { code, msg }) => {
        warn!(unique_id = %entry.unique_id, code, %msg, "retry attempt rejected upstream");
        self.count_failure(&entry).await
      }
      Err(e) => {
        warn!(unique_id = %entry.unique_id, error = %e, "retry attempt failed");
        self.count_failure(&entry).await
      }
    }
  }

  async fn count_failure(&self, entry: &WaitingEntry) -> Option<Duration> {
    let retries = entry.retry_count + 1;
    if retries <= MAX_RETRY_ATTEMPTS {
      self.queue.set_retry_count(entry.unique_id, retries).await;
      Some(backoff_delay(retries))
    } else {
      if self.queue.pop_front_if(entry.unique_id).await.is_some() {
        warn!(unique_id = %entry.unique_id, "retries exhausted, marking task failed");
        if let Err(e) = self.store.set_failed(entry.unique_id, RETRIES_EXHAUSTED).await {
          error!(unique_id = %entry.unique_id, error = %e, "failed to persist failure");
        }
        self.notifier
          .publish(&entry.client_id, ServerEvent::WorkflowStatusUpdate {
            unique_id: entry.unique_id,
            original_created_at: entry.created_at,
            task_id: None,
            status: TaskStatus::Failed,
            error: Some(RETRIES_EXHAUSTED.into()),
          })
          .await;
      }
      None
    }
  }

  fn schedule_kick(self: &Arc<Self>, delay: Duration) {
    let coordinator = self.clone();
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      coordinator.try_submit_head().await;
    });
  }

  /// Terminal notice from the polling client; the relay never polls
  /// upstream itself.
  pub async fn task_completed(
    self: &Arc<Self>,
    task_id: String,
    result: Option<serde_json::Value>,
    error: Option<String>,
  ) {
    let status = if error.is_some() { TaskStatus::Failed } else { TaskStatus::Success };
    match self.store.complete_by_task_id(&task_id, status, result, error.clone()).await {
      Ok(Some(record)) => {
        info!(%task_id, status = status.as_str(), "task reached terminal state");
        self.notifier
          .publish(&record.client_id, ServerEvent::WorkflowStatusUpdate {
            unique_id: record.unique_id,
            original_created_at: record.created_at,
            task_id: Some(task_id),
            status,
            error,
          })
          .await;
        let _ =
          self.inflight.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
      }
      Ok(None) => debug!(%task_id, "completion notice for unknown or already-terminal task"),
      Err(e) => error!(%task_id, error = %e, "failed to persist completion notice"),
    }

    self.clone().try_submit_head().await;
  }

  /// Rehydrate a client's history and re-enroll anything still pending.
  /// Idempotent: queue membership is checked by unique_id.
  pub async fn reconcile(self: &Arc<Self>, client_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
    let tasks = self.store.tasks_for_client(client_id).await?;
    let mut enqueued = 0usize;

    for record in &tasks {
      let reason = match record.status {
        TaskStatus::Waiting | TaskStatus::Queued => PendingReason::QueueFull,
        TaskStatus::Retry => PendingReason::UpstreamError,
        _ => continue,
      };
      if self.queue.contains(record.unique_id).await {
        continue;
      }
      let entry = WaitingEntry {
        unique_id: record.unique_id,
        client_id: record.client_id.clone(),
        api_key: record.api_key.clone(),
        workflow_id: record.workflow_id.clone(),
        node_info_list: record.node_info_list.clone(),
        created_at: record.created_at,
        reason,
        retry_count: 0,
      };
      if self.queue.push(entry).await {
        enqueued += 1;
        info!(unique_id = %record.unique_id, %client_id, "re-enrolled pending task after reconnect");
        self.notifier
          .publish(client_id, ServerEvent::TaskRecoveryUpdate {
            client_id: client_id.to_string(),
            unique_id: record.unique_id,
            task_id: record.task_id.clone(),
            status: record.status,
            message: "Task re-queued after reconnect".into(),
          })
          .await;
      }
    }

    if enqueued > 0 && self.inflight.load(Ordering::SeqCst) == 0 {
      self.schedule_kick(KICK_DELAY);
    }
    Ok(tasks)
  }

  /// Remove a task. Waiting tasks come out of the queue and the store;
  /// active ones only lose their record (upstream cancellation is the
  /// caller's responsibility).
  pub async fn delete_task(
    &self,
    unique_id: Option<Uuid>,
    task_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    is_waiting: bool,
    reply: &Subscriber,
  ) {
    let removed = if is_waiting {
      let mut removed = match unique_id {
        Some(id) => self.queue.remove(id).await,
        None => false,
      };
      if !removed {
        if let Some(ts) = created_at {
          removed = self.queue.remove_by_created_at(ts).await;
        }
      }
      removed
    } else {
      true
    };

    let deleted = match self.store.delete(unique_id, task_id.as_deref(), created_at).await {
      Ok(deleted) => deleted,
      Err(e) => {
        error!(?unique_id, ?task_id, error = %e, "failed to delete task record");
        false
      }
    };

    let success = if is_waiting { removed } else { deleted };
    info!(?unique_id, ?task_id, is_waiting, success, "task deletion handled");
    let _ = reply.send(ServerEvent::TaskDeleted {
      unique_id,
      task_id,
      success,
      error: if success { None } else { Some("No matching task found".into()) },
    });
  }

  /// Storage is best-effort: a persistence failure must never take down
  /// the queue or the notification path.
  async fn persist(&self, record: &TaskRecord) {
    if let Err(e) = self.store.insert(record).await {
      error!(unique_id = %record.unique_id, error = %e, "failed to persist task record");
    }
  }
}
