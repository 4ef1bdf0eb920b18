use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use super::types::ReorderRequest;
use crate::backend::TaskBackend;
use crate::config::Config;
use crate::model::{ActivityEntry, Board, Column, NewTask, Project, Task, TaskPatch, TaskStatus};

/// JSON-over-HTTP task API
#[derive(Clone)]
pub struct RestBackend {
  client: reqwest::Client,
  base: Url,
  token: String,
}

impl RestBackend {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;
    Self::with_token(&config.api.url, token)
  }

  pub fn with_token(url: &str, token: String) -> Result<Self> {
    let base = Url::parse(url).map_err(|e| eyre!("Invalid API URL {}: {}", url, e))?;
    if base.cannot_be_a_base() {
      return Err(eyre!("Invalid API URL {}: not a base URL", url));
    }

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      token,
    })
  }

  /// `base` with `segments` appended, each percent-encoded.
  fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
    self
      .client
      .request(method, self.endpoint(segments))
      .bearer_auth(&self.token)
  }

  async fn send(&self, request: RequestBuilder, what: &str) -> Result<reqwest::Response> {
    request
      .send()
      .await
      .map_err(|e| eyre!("Failed to {}: {}", what, e))?
      .error_for_status()
      .map_err(|e| eyre!("Failed to {}: {}", what, e))
  }

  async fn fetch<R: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<R> {
    self
      .send(request, what)
      .await?
      .json::<R>()
      .await
      .map_err(|e| eyre!("Failed to parse response to {}: {}", what, e))
  }
}

#[async_trait]
impl TaskBackend for RestBackend {
  async fn list_projects(&self) -> Result<Vec<Project>> {
    self
      .fetch(self.request(Method::GET, &["projects"]), "list projects")
      .await
  }

  async fn list_boards(&self, project_id: &str) -> Result<Vec<Board>> {
    self
      .fetch(
        self.request(Method::GET, &["projects", project_id, "boards"]),
        "list boards",
      )
      .await
  }

  async fn list_columns(&self, board_id: &str) -> Result<Vec<Column>> {
    self
      .fetch(
        self.request(Method::GET, &["boards", board_id, "columns"]),
        "list columns",
      )
      .await
  }

  async fn list_tasks(&self, board_id: &str) -> Result<Vec<Task>> {
    self
      .fetch(
        self.request(Method::GET, &["boards", board_id, "tasks"]),
        "list tasks",
      )
      .await
  }

  async fn create_task(&self, task: &NewTask) -> Result<Task> {
    self
      .fetch(
        self.request(Method::POST, &["tasks"]).json(task),
        "create task",
      )
      .await
  }

  async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task> {
    self
      .fetch(
        self.request(Method::PATCH, &["tasks", id]).json(patch),
        &format!("update task {}", id),
      )
      .await
  }

  async fn delete_task(&self, id: &str) -> Result<()> {
    self
      .send(
        self.request(Method::DELETE, &["tasks", id]),
        &format!("delete task {}", id),
      )
      .await?;
    Ok(())
  }

  async fn reorder_tasks(
    &self,
    board_id: &str,
    status: TaskStatus,
    ordered_ids: &[String],
  ) -> Result<()> {
    let body = ReorderRequest {
      task_ids: ordered_ids,
    };
    self
      .send(
        self
          .request(
            Method::PUT,
            &["boards", board_id, "columns", status.as_str(), "order"],
          )
          .json(&body),
        "reorder tasks",
      )
      .await?;
    Ok(())
  }

  async fn record_activity(&self, entry: &ActivityEntry) -> Result<()> {
    self
      .send(
        self
          .request(Method::POST, &["boards", &entry.board_id, "activity"])
          .json(entry),
        "record activity",
      )
      .await?;
    Ok(())
  }
}
