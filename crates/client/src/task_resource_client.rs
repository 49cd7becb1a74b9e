use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use conductor_config::Configuration;
use conductor_domain::{Task, TaskExecLog, TaskResult};
use conductor_errors::{ConductorError, ConductorResult};
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::task_api::TaskApi;

/// 基于 reqwest 的 `/tasks` 资源客户端
pub struct TaskResourceClient {
    host: String,
    http_client: reqwest::Client,
}

impl TaskResourceClient {
    pub fn new(configuration: &Configuration) -> ConductorResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(configuration.http_timeout_seconds))
            .build()
            .map_err(|e| ConductorError::config_error(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self::with_client(configuration.host(), http_client))
    }

    pub fn with_client<S: Into<String>>(host: S, http_client: reqwest::Client) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            http_client,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// 在 host 之后追加路径段，每一段都会做百分号编码
    fn url(&self, segments: &[&str]) -> ConductorResult<Url> {
        let invalid_host = || ConductorError::config_error(format!("无效的服务地址: {}", self.host));
        let mut url = Url::parse(&self.host).map_err(|_| invalid_host())?;
        url.path_segments_mut()
            .map_err(|_| invalid_host())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check_status(response: Response) -> ConductorResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!("Conductor请求失败: HTTP {} - {}", status, body);
        Err(ConductorError::http_status(status.as_u16(), body))
    }

    /// 204 或空正文视为没有数据
    async fn optional_json<T: DeserializeOwned>(response: Response) -> ConductorResult<Option<T>> {
        let response = Self::check_status(response).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }

    async fn json<T: DeserializeOwned>(response: Response) -> ConductorResult<T> {
        let response = Self::check_status(response).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

fn push_query<'a>(query: &mut Vec<(&'a str, String)>, key: &'a str, value: Option<String>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        query.push((key, value));
    }
}

#[async_trait]
impl TaskApi for TaskResourceClient {
    async fn poll(
        &self,
        task_type: &str,
        worker_id: Option<&str>,
        domain: Option<&str>,
    ) -> ConductorResult<Option<Task>> {
        let mut query = Vec::new();
        push_query(&mut query, "workerid", worker_id.map(str::to_string));
        push_query(&mut query, "domain", domain.map(str::to_string));

        let url = self.url(&["tasks", "poll", task_type])?;
        debug!("Polling task: {} {:?}", url, query);
        let response = self.http_client.get(url).query(&query).send().await?;
        Self::optional_json(response).await
    }

    async fn batch_poll(
        &self,
        task_type: &str,
        worker_id: Option<&str>,
        count: Option<u32>,
        timeout_ms: Option<u64>,
        domain: Option<&str>,
    ) -> ConductorResult<Vec<Task>> {
        let mut query = Vec::new();
        push_query(&mut query, "workerid", worker_id.map(str::to_string));
        push_query(&mut query, "count", count.map(|c| c.to_string()));
        push_query(&mut query, "timeout", timeout_ms.map(|t| t.to_string()));
        push_query(&mut query, "domain", domain.map(str::to_string));

        let url = self.url(&["tasks", "poll", "batch", task_type])?;
        let response = self.http_client.get(url).query(&query).send().await?;
        Ok(Self::optional_json(response).await?.unwrap_or_default())
    }

    async fn get_task(&self, task_id: &str) -> ConductorResult<Task> {
        let url = self.url(&["tasks", task_id])?;
        let response = self.http_client.get(url).send().await?;
        Self::json(response).await
    }

    async fn update_task(&self, result: &TaskResult) -> ConductorResult<String> {
        let url = self.url(&["tasks"])?;
        let response = self.http_client.post(url).json(result).send().await?;
        let response = Self::check_status(response).await?;
        Ok(response.text().await?)
    }

    async fn append_log(&self, task_id: &str, message: &str) -> ConductorResult<()> {
        let url = self.url(&["tasks", task_id, "log"])?;
        let response = self.http_client.post(url).json(&message).send().await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn get_logs(&self, task_id: &str) -> ConductorResult<Vec<TaskExecLog>> {
        let url = self.url(&["tasks", task_id, "log"])?;
        let response = self.http_client.get(url).send().await?;
        Ok(Self::optional_json(response).await?.unwrap_or_default())
    }

    async fn queue_size(&self, task_type: &str) -> ConductorResult<i64> {
        let url = self.url(&["tasks", "queue", "sizes"])?;
        let response = self
            .http_client
            .get(url)
            .query(&[("taskType", task_type)])
            .send()
            .await?;
        let sizes: HashMap<String, i64> = Self::json(response).await?;
        Ok(sizes.get(task_type).copied().unwrap_or(0))
    }
}
