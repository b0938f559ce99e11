use std::time::Duration;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use anyhow::Result;

use crate::models::{NodeInfo, TaskStatus};

static QUEUE_MAXED_CODE: i64 = 421;
static QUEUE_MAXED_MSG: &str = "TASK_QUEUE_MAXED";

#[derive(Debug, Clone)]
pub enum SubmitOutcome {
  /// Upstream accepted the task and assigned an id.
  Accepted { task_id: String, status: TaskStatus },
  /// Success code with no data payload; the task is already done.
  Completed,
  /// Upstream queue is full; resubmit later.
  QueueFull,
  /// Any other business rejection.
  Rejected { code: i64, msg: String },
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
  #[error("upstream request failed: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("upstream returned malformed response: {0}")]
  Malformed(String),
}

#[async_trait]
pub trait UpstreamApi: Send + Sync {
  async fn create_task(
    &self,
    api_key: &str,
    workflow_id: &str,
    node_info_list: &[NodeInfo],
  ) -> Result<SubmitOutcome, UpstreamError>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
  code: i64,
  msg: Option<String>,
  data: Option<ApiTaskData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiTaskData {
  task_id: String,
  task_status: Option<String>,
}

fn interpret(resp: ApiResponse) -> SubmitOutcome {
  if resp.code == 200 || resp.code == 0 {
    return match resp.data {
      Some(data) => {
        let status = match data.task_status.as_deref() {
          Some("RUNNING") => TaskStatus::Running,
          _ => TaskStatus::Queued,
        };
        SubmitOutcome::Accepted { task_id: data.task_id, status }
      }
      None => SubmitOutcome::Completed,
    };
  }
  let msg = resp.msg.unwrap_or_default();
  if resp.code == QUEUE_MAXED_CODE && msg == QUEUE_MAXED_MSG {
    return SubmitOutcome::QueueFull;
  }
  SubmitOutcome::Rejected { code: resp.code, msg }
}

pub struct RunningHubClient {
  http: reqwest::Client,
  base_url: String,
}

impl RunningHubClient {
  pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
    let http = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self { http, base_url })
  }
}

#[async_trait]
impl UpstreamApi for RunningHubClient {
  async fn create_task(
    &self,
    api_key: &str,
    workflow_id: &str,
    node_info_list: &[NodeInfo],
  ) -> Result<SubmitOutcome, UpstreamError> {
    let mut body = json!({
      "apiKey": api_key,
      "workflowId": workflow_id,
    });
    if !node_info_list.is_empty() {
      body["nodeInfoList"] = serde_json::to_value(node_info_list)
        .map_err(|e| UpstreamError::Malformed(e.to_string()))?;
    }

    let resp = self.http
      .post(format!("{}/task/openapi/create", self.base_url))
      .json(&body)
      .send()
      .await?
      .json::<ApiResponse>()
      .await?;
    Ok(interpret(resp))
  }
}
