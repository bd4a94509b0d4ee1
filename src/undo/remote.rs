use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::board::models::{Task, TaskWithAssignee};

/// The server-side half of a delete.
#[async_trait]
pub trait TaskRemote: Send + Sync {
    async fn delete_task(&self, task_id: i64) -> Result<()>;
}

/// `TaskRemote` over the board's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpTaskRemote {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpTaskRemote {
    /// `base_url` is the API root, e.g. `http://127.0.0.1:3141/api`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn task_url(&self, task_id: i64) -> String {
        format!("{}/tasks/{}", self.base_url, task_id)
    }

    /// `GET {base}/tasks/{id}`: the task as the server currently has it.
    pub async fn fetch_task(&self, task_id: i64) -> Result<Task> {
        let task: TaskWithAssignee = self
            .client
            .get(self.task_url(task_id))
            .bearer_auth(&self.token)
            .header("User-Agent", "taskdeck")
            .send()
            .await
            .context("Failed to send task request")?
            .error_for_status()
            .with_context(|| format!("Failed to fetch task {}", task_id))?
            .json()
            .await
            .context("Failed to parse task response")?;
        Ok(task.task)
    }
}

#[async_trait]
impl TaskRemote for HttpTaskRemote {
    async fn delete_task(&self, task_id: i64) -> Result<()> {
        self.client
            .delete(self.task_url(task_id))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", "taskdeck")
            .send()
            .await
            .context("Failed to send delete request")?
            .error_for_status()
            .context("Task delete returned error status")?;
        Ok(())
    }
}
