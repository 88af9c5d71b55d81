use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

use crate::cli::config::ServiceSettings;
use crate::error::LaunchError;
use crate::progress::model::TaskId;

/// Body of a task-creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub task: String,
    pub max_results: u32,
    pub use_ai_analysis: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateTaskResponse {
    #[serde(default)]
    task_id: Option<String>,
}

/// Starts tasks on the task-launching service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskLauncher: Send + Sync {
    async fn launch(&self, request: &CreateTaskRequest) -> Result<TaskId, LaunchError>;
}

/// `POST {base_url}/search` over reqwest
pub struct HttpLauncher {
    client: Client,
    endpoint: Url,
}

impl HttpLauncher {
    pub fn new(base_url: &Url, settings: &ServiceSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let endpoint = base_url
            .join("search")
            .context(format!("Cannot build task endpoint from {}", base_url))?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TaskLauncher for HttpLauncher {
    async fn launch(&self, request: &CreateTaskRequest) -> Result<TaskId, LaunchError> {
        debug!("Sending task to search service: {}", request.task);

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("Unknown").to_string();
            error!("Search service refused task: HTTP {}", status.as_u16());
            return Err(LaunchError::Rejected {
                status: status.as_u16(),
                reason,
            });
        }

        let body = response.text().await?;
        let parsed: CreateTaskResponse =
            serde_json::from_str(&body).map_err(|e| LaunchError::InvalidResponse(e.to_string()))?;

        match parsed.task_id.filter(|id| !id.is_empty()) {
            Some(id) => {
                debug!("Search service assigned task {}", id);
                Ok(TaskId::new(id))
            }
            None => Err(LaunchError::MissingTaskId),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CreateTaskRequest {
        CreateTaskRequest {
            task: "Find a used road bike under $400".to_string(),
            max_results: 20,
            use_ai_analysis: true,
        }
    }

    async fn launcher_for(server: &MockServer) -> HttpLauncher {
        let base = Url::parse(&server.uri()).unwrap();
        HttpLauncher::new(&base, &ServiceSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn returns_task_id_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_json(serde_json::json!({
                "task": "Find a used road bike under $400",
                "max_results": 20,
                "use_ai_analysis": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "task_id": "t1",
                "status": "planning"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let launcher = launcher_for(&server).await;
        let task_id = assert_ok!(launcher.launch(&request()).await);
        assert_eq!(task_id, TaskId::new("t1"));
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = launcher_for(&server).await.launch(&request()).await.unwrap_err();
        assert!(matches!(err, LaunchError::Rejected { status: 503, .. }));
        assert_eq!(err.to_string(), "HTTP 503: Service Unavailable");
    }

    #[tokio::test]
    async fn missing_task_id_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "queued"})))
            .mount(&server)
            .await;

        let err = launcher_for(&server).await.launch(&request()).await.unwrap_err();
        assert!(matches!(err, LaunchError::MissingTaskId));
    }

    #[tokio::test]
    async fn non_json_body_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let err = launcher_for(&server).await.launch(&request()).await.unwrap_err();
        assert!(matches!(err, LaunchError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_service() {
        let base = Url::parse("http://127.0.0.1:9").unwrap();
        let launcher = HttpLauncher::new(&base, &ServiceSettings::default()).unwrap();
        let err = launcher.launch(&request()).await.unwrap_err();
        assert!(matches!(err, LaunchError::Unreachable(_)));
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let base = Url::parse("https://api.example/v1/").unwrap();
        let launcher = HttpLauncher::new(&base, &ServiceSettings::default()).unwrap();
        assert_eq!(launcher.endpoint().as_str(), "https://api.example/v1/search");
    }
}
