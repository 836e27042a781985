//! REST client for the external-task API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::types::command::CommandRequest;
use crate::types::task::{Task, TaskOutput};

use super::{QueueError, TaskQueue};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// [`TaskQueue`] over the engine's external-task HTTP endpoints.
pub struct RestTaskQueue {
    http: reqwest::Client,
    base: Url,
}

impl RestTaskQueue {
    /// Builds a client for the API rooted at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, QueueError> {
        let base = parse_base(base_url)?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, QueueError> {
        self.base
            .join(path)
            .map_err(|e| QueueError::Transport(format!("bad endpoint '{path}': {e}")))
    }

    async fn send_expecting_empty<B: Serialize>(
        &self,
        method: reqwest::Method,
        url: Url,
        body: &B,
    ) -> Result<(), QueueError> {
        let response = self
            .http
            .request(method, url)
            .json(body)
            .send()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(QueueError::Rejected { status: status.as_u16(), body })
    }
}

#[async_trait]
impl TaskQueue for RestTaskQueue {
    async fn fetch_and_lock(
        &self,
        worker_id: &str,
        max_tasks: u32,
        topic: &str,
        lock_duration: Duration,
    ) -> Result<Vec<Task>, QueueError> {
        let body = fetch_body(worker_id, max_tasks, topic, lock_duration);
        let response = self
            .http
            .post(self.endpoint("external-task/fetchAndLock")?)
            .json(&body)
            .send()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Rejected { status: status.as_u16(), body });
        }
        response
            .json::<Vec<Task>>()
            .await
            .map_err(|e| QueueError::Decode(e.to_string()))
    }

    async fn set_retries(&self, task_id: &str, retries: i64) -> Result<(), QueueError> {
        let url = self.endpoint(&format!("external-task/{task_id}/retries"))?;
        self.send_expecting_empty(reqwest::Method::PUT, url, &RetriesBody { retries })
            .await
    }

    async fn complete(
        &self,
        task_id: &str,
        worker_id: &str,
        output: Option<&TaskOutput>,
    ) -> Result<(), QueueError> {
        let url = self.endpoint(&format!("external-task/{task_id}/complete"))?;
        self.send_expecting_empty(
            reqwest::Method::POST,
            url,
            &complete_body(worker_id, output),
        )
        .await
    }

    async fn fail(
        &self,
        task_id: &str,
        worker_id: &str,
        error_message: &str,
    ) -> Result<(), QueueError> {
        let url = self.endpoint(&format!("external-task/{task_id}/failure"))?;
        let body = FailBody {
            worker_id,
            error_message,
            error_details: error_message,
            retries: 0,
        };
        self.send_expecting_empty(reqwest::Method::POST, url, &body).await
    }
}

fn parse_base(base_url: &str) -> Result<Url, QueueError> {
    // Url::join treats a base without a trailing slash as a file and
    // would drop its last path segment.
    let normalized = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    };
    Url::parse(&normalized)
        .map_err(|e| QueueError::Transport(format!("bad base url '{base_url}': {e}")))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchBody<'a> {
    worker_id: &'a str,
    max_tasks: u32,
    topics: [TopicSpec<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TopicSpec<'a> {
    topic_name: &'a str,
    lock_duration: u64,
}

fn fetch_body<'a>(
    worker_id: &'a str,
    max_tasks: u32,
    topic: &'a str,
    lock_duration: Duration,
) -> FetchBody<'a> {
    FetchBody {
        worker_id,
        max_tasks,
        topics: [TopicSpec {
            topic_name: topic,
            lock_duration: lock_duration.as_millis() as u64,
        }],
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteBody<'a> {
    worker_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<HashMap<&'a str, OutputVariable<'a>>>,
}

#[derive(Serialize)]
struct OutputVariable<'a> {
    value: &'a CommandRequest,
}

fn complete_body<'a>(worker_id: &'a str, output: Option<&'a TaskOutput>) -> CompleteBody<'a> {
    CompleteBody {
        worker_id,
        variables: output.map(|out| {
            HashMap::from([(out.name.as_str(), OutputVariable { value: &out.value })])
        }),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FailBody<'a> {
    worker_id: &'a str,
    error_message: &'a str,
    error_details: &'a str,
    retries: i64,
}

#[derive(Serialize)]
struct RetriesBody {
    retries: i64,
}
