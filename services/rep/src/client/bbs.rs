//! BBS API client.

use std::time::Duration;

use async_trait::async_trait;
use cell_models::bbs::{ActualLrpFilter, ActualLrpGroup, ActualLrpInstanceKey, ActualLrpKey, Task};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{BbsClient, BbsError};

/// BBS client speaking JSON over HTTP.
pub struct HttpBbsClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBbsClient {
    /// Create a new BBS client.
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<reqwest::Response, BbsError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "BBS request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| BbsError::Request(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(BbsError::ResourceNotFound(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, path, "BBS request failed");
            return Err(BbsError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, BbsError> {
        self.post(path, body)
            .await?
            .json()
            .await
            .map_err(|e| BbsError::Decode(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct TasksByCellIdRequest<'a> {
    cell_id: &'a str,
}

#[derive(Debug, Serialize)]
struct TaskByGuidRequest<'a> {
    task_guid: &'a str,
}

#[derive(Debug, Serialize)]
struct RemoveActualLrpRequest<'a> {
    process_guid: &'a str,
    index: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    actual_lrp_instance_key: Option<&'a ActualLrpInstanceKey>,
}

#[derive(Debug, Serialize)]
struct RemoveEvacuatingActualLrpRequest<'a> {
    actual_lrp_key: &'a ActualLrpKey,
    actual_lrp_instance_key: &'a ActualLrpInstanceKey,
}

#[derive(Debug, Serialize)]
struct FailTaskRequest<'a> {
    task_guid: &'a str,
    failure_reason: &'a str,
}

#[derive(Debug, Deserialize)]
struct ActualLrpGroupsResponse {
    #[serde(default)]
    actual_lrp_groups: Vec<ActualLrpGroup>,
}

#[derive(Debug, Deserialize)]
struct TasksResponse {
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    task: Task,
}

#[async_trait]
impl BbsClient for HttpBbsClient {
    async fn actual_lrp_groups(
        &self,
        filter: &ActualLrpFilter,
    ) -> Result<Vec<ActualLrpGroup>, BbsError> {
        let response: ActualLrpGroupsResponse =
            self.post_json("/v1/actual_lrp_groups/list", filter).await?;
        Ok(response.actual_lrp_groups)
    }

    async fn tasks_by_cell_id(&self, cell_id: &str) -> Result<Vec<Task>, BbsError> {
        let response: TasksResponse = self
            .post_json("/v1/tasks/list", &TasksByCellIdRequest { cell_id })
            .await?;
        Ok(response.tasks)
    }

    async fn task_by_guid(&self, task_guid: &str) -> Result<Task, BbsError> {
        let response: TaskResponse = self
            .post_json("/v1/tasks/get_by_task_guid", &TaskByGuidRequest { task_guid })
            .await?;
        Ok(response.task)
    }

    async fn remove_actual_lrp(
        &self,
        process_guid: &str,
        index: i32,
        instance_key: Option<&ActualLrpInstanceKey>,
    ) -> Result<(), BbsError> {
        let request = RemoveActualLrpRequest {
            process_guid,
            index,
            actual_lrp_instance_key: instance_key,
        };
        self.post("/v1/actual_lrps/remove", &request).await?;
        Ok(())
    }

    async fn remove_evacuating_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<(), BbsError> {
        let request = RemoveEvacuatingActualLrpRequest {
            actual_lrp_key: key,
            actual_lrp_instance_key: instance_key,
        };
        self.post("/v1/actual_lrps/remove_evacuating", &request).await?;
        Ok(())
    }

    async fn fail_task(&self, task_guid: &str, reason: &str) -> Result<(), BbsError> {
        let request = FailTaskRequest {
            task_guid,
            failure_reason: reason,
        };
        self.post("/v1/tasks/fail", &request).await?;
        Ok(())
    }
}
