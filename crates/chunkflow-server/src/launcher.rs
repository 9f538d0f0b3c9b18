//! Client for the external job-execution service.
//!
//! The staging trigger submits one job per new-chunk notification. The
//! service is only reachable over HTTP here; everything the trigger needs to
//! know about an outcome is captured by [`LaunchError`]: transient failures
//! must bubble up so the bus redelivers the notification, everything else is
//! acknowledged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::LauncherConfig;

/// Submission statuses worth a redelivery. Anything else either cannot
/// succeed on retry or already landed server-side.
const RETRYABLE_STATUSES: [u16; 3] = [429, 500, 503];

/// Fully-resolved parameters for one staging-job submission.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub job_name: String,
    pub template_path: String,
    pub input_path: String,
    pub dataset_id: String,
    pub service_account: String,
    pub temp_location: String,
}

/// Job-launch request body.
#[derive(Debug, Serialize)]
struct LaunchRequest<'a> {
    job_name: &'a str,
    template_path: &'a str,
    parameters: LaunchParameters<'a>,
    environment: LaunchEnvironment<'a>,
}

#[derive(Debug, Serialize)]
struct LaunchParameters<'a> {
    input_path: &'a str,
    dataset_id: &'a str,
}

#[derive(Debug, Serialize)]
struct LaunchEnvironment<'a> {
    service_account: &'a str,
    temp_location: &'a str,
}

#[derive(Debug, Deserialize)]
struct LaunchResponse {
    job: Option<LaunchedJob>,
}

/// The job identifier reported by a successful submission.
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchedJob {
    pub id: String,
}

/// Classified submission failure.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// Rate limiting or server-side unavailability; the notification should
    /// be redelivered.
    #[error("Transient launch failure: {0}")]
    Transient(String),

    /// The service rejected the request; redelivery would not help.
    #[error("Launch rejected: {0}")]
    Rejected(String),

    /// The service accepted the request but the response carried no job
    /// identifier, so the launch cannot be confirmed. The request presumably
    /// landed server-side, so this is not retried.
    #[error("Launch not observed: {0}")]
    NotObserved(String),
}

/// Seam to the job-execution service.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedJob, LaunchError>;
}

/// HTTP implementation against the configured launch endpoint.
pub struct HttpJobLauncher {
    client: reqwest::Client,
    launch_url: String,
}

impl HttpJobLauncher {
    pub fn new(config: &LauncherConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            launch_url: config.launch_url.clone(),
        })
    }
}

#[async_trait]
impl JobLauncher for HttpJobLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedJob, LaunchError> {
        let request = LaunchRequest {
            job_name: &spec.job_name,
            template_path: &spec.template_path,
            parameters: LaunchParameters {
                input_path: &spec.input_path,
                dataset_id: &spec.dataset_id,
            },
            environment: LaunchEnvironment {
                service_account: &spec.service_account,
                temp_location: &spec.temp_location,
            },
        };

        let response = self
            .client
            .post(&self.launch_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LaunchError::Transient(format!("Launch request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = format!("HTTP {}: {}", status.as_u16(), body);

            return if RETRYABLE_STATUSES.contains(&status.as_u16()) {
                Err(LaunchError::Transient(detail))
            } else {
                Err(LaunchError::Rejected(detail))
            };
        }

        let parsed: LaunchResponse = response.json().await.map_err(|e| {
            LaunchError::NotObserved(format!("Unreadable launch response: {}", e))
        })?;

        parsed.job.ok_or_else(|| {
            LaunchError::NotObserved("Launch response missing 'job' field".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spec() -> LaunchSpec {
        LaunchSpec {
            job_name: "stage-chunk-42-20250601120000".to_string(),
            template_path: "registry/stage-chunk:latest".to_string(),
            input_path: "s3://landing/chunks/42".to_string(),
            dataset_id: "ppdb".to_string(),
            service_account: "stage-runner".to_string(),
            temp_location: "s3://scratch/tmp".to_string(),
        }
    }

    async fn launcher_for(server: &MockServer) -> HttpJobLauncher {
        let config = LauncherConfig {
            launch_url: format!("{}/api/v1/jobs", server.uri()),
            template_path: String::new(),
            service_account: String::new(),
            temp_location: String::new(),
            request_timeout_secs: 5,
        };
        HttpJobLauncher::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_launch_success_returns_job_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/jobs"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"job": {"id": "job-123"}})),
            )
            .mount(&server)
            .await;

        let job = launcher_for(&server).await.launch(&spec()).await.unwrap();
        assert_eq!(job.id, "job-123");
    }

    #[tokio::test]
    async fn test_launch_missing_job_field_is_not_observed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = launcher_for(&server).await.launch(&spec()).await.unwrap_err();
        assert!(matches!(err, LaunchError::NotObserved(_)));
    }

    #[tokio::test]
    async fn test_launch_retryable_statuses_are_transient() {
        for status in RETRYABLE_STATUSES {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let err = launcher_for(&server).await.launch(&spec()).await.unwrap_err();
            assert!(
                matches!(err, LaunchError::Transient(_)),
                "status {} should be transient",
                status
            );
        }
    }

    #[tokio::test]
    async fn test_launch_bad_request_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
            .mount(&server)
            .await;

        let err = launcher_for(&server).await.launch(&spec()).await.unwrap_err();
        assert!(matches!(err, LaunchError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_launch_connection_error_is_transient() {
        // Nothing listens on the discard port.
        let config = LauncherConfig {
            launch_url: "http://127.0.0.1:9/api/v1/jobs".to_string(),
            template_path: String::new(),
            service_account: String::new(),
            temp_location: String::new(),
            request_timeout_secs: 2,
        };
        let launcher = HttpJobLauncher::new(&config).unwrap();

        let err = launcher.launch(&spec()).await.unwrap_err();
        assert!(matches!(err, LaunchError::Transient(_)));
    }
}
