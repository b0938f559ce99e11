use std::collections::VecDeque;
use std::time::Duration;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{NodeInfo, TaskStatus};

pub const MAX_RETRY_ATTEMPTS: u32 = 5;
pub const INITIAL_DELAY: Duration = Duration::from_secs(1);
pub const MAX_DELAY: Duration = Duration::from_secs(30);
/// One-shot delay before kicking the queue when an enqueue happens with
/// nothing in flight; an immediate retry would just hit the same full queue.
pub const KICK_DELAY: Duration = Duration::from_secs(1);

/// `delay = min(INITIAL_DELAY * 2^retry_count, MAX_DELAY)`. Capacity
/// rejections never reach this path; only counted failures do.
pub fn backoff_delay(retry_count: u32) -> Duration {
  let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
  INITIAL_DELAY.checked_mul(factor).unwrap_or(MAX_DELAY).min(MAX_DELAY)
}

/// Why a task is sitting in the waiting queue. WAITING and RETRY are
/// handled identically; the reason only changes the status shown to the
/// client (upstream full vs upstream rejecting).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingReason {
  QueueFull,
  UpstreamError,
}

impl PendingReason {
  pub fn display_status(self) -> TaskStatus {
    match self {
      PendingReason::QueueFull => TaskStatus::Waiting,
      PendingReason::UpstreamError => TaskStatus::Retry,
    }
  }
}

/// Everything needed to resubmit without consulting the store.
#[derive(Debug, Clone)]
pub struct WaitingEntry {
  pub unique_id: Uuid,
  pub client_id: String,
  pub api_key: String,
  pub workflow_id: String,
  pub node_info_list: Vec<NodeInfo>,
  pub created_at: DateTime<Utc>,
  pub reason: PendingReason,
  pub retry_count: u32,
}

/// Strict FIFO over waiting entries; only the head is ever attempted.
/// At most one entry per unique_id.
#[derive(Default)]
pub struct WaitingQueue {
  entries: Mutex<VecDeque<WaitingEntry>>,
}

impl WaitingQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Enqueue at the tail. Refused when an entry with the same unique_id
  /// is already present.
  pub async fn push(&self, entry: WaitingEntry) -> bool {
    let mut entries = self.entries.lock().await;
    if entries.iter().any(|e| e.unique_id == entry.unique_id) {
      return false;
    }
    entries.push_back(entry);
    true
  }

  pub async fn peek(&self) -> Option<WaitingEntry> {
    self.entries.lock().await.front().cloned()
  }

  /// Pop the head only if it is still the entry we attempted; the queue
  /// may have been mutated across the upstream suspension point.
  pub async fn pop_front_if(&self, unique_id: Uuid) -> Option<WaitingEntry> {
    let mut entries = self.entries.lock().await;
    if entries.front().map(|e| e.unique_id) == Some(unique_id) {
      entries.pop_front()
    } else {
      None
    }
  }

  pub async fn set_retry_count(&self, unique_id: Uuid, retry_count: u32) {
    let mut entries = self.entries.lock().await;
    if let Some(entry) = entries.iter_mut().find(|e| e.unique_id == unique_id) {
      entry.retry_count = retry_count;
    }
  }

  pub async fn remove(&self, unique_id: Uuid) -> bool {
    let mut entries = self.entries.lock().await;
    let before = entries.len();
    entries.retain(|e| e.unique_id != unique_id);
    entries.len() < before
  }

  pub async fn remove_by_created_at(&self, created_at: DateTime<Utc>) -> bool {
    let mut entries = self.entries.lock().await;
    let before = entries.len();
    entries.retain(|e| e.created_at != created_at);
    entries.len() < before
  }

  pub async fn contains(&self, unique_id: Uuid) -> bool {
    self.entries.lock().await.iter().any(|e| e.unique_id == unique_id)
  }

  pub async fn len(&self) -> usize {
    self.entries.lock().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.entries.lock().await.is_empty()
  }
}
