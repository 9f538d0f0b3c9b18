//! Staging trigger: new-chunk notifications become staging-job launches.
//!
//! One notification, one job. The bus delivers at least once, so everything
//! here is written to be safely re-runnable: job names are derived fresh per
//! attempt (no collision on retry), and only transient submission failures
//! request redelivery. Malformed notifications are logged and dropped; they
//! can never succeed on a later delivery.

use chrono::{DateTime, Utc};

use chunkflow_common::types::{NewChunkNotification, PushEnvelope};
use chunkflow_common::ChunkflowError;

use crate::config::LauncherConfig;
use crate::launcher::{JobLauncher, LaunchError, LaunchSpec};

/// What to tell the bus about a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Acknowledge: processed, or dropped as unprocessable.
    Ack,
    /// Redeliver: a transient failure got in the way.
    Retry,
}

/// Decode a raw push body into a new-chunk notification.
pub fn decode_notification(raw: &[u8]) -> Result<NewChunkNotification, ChunkflowError> {
    let envelope = PushEnvelope::from_slice(raw)?;
    let payload = envelope.decode_data()?;

    serde_json::from_slice(&payload).map_err(|e| {
        ChunkflowError::Payload(format!("Invalid new-chunk notification: {}", e))
    })
}

/// Deterministic, collision-free job name for one staging attempt.
///
/// The chunk reference keeps the job traceable to its source; the timestamp
/// suffix keeps a retried launch from colliding with the first attempt's
/// name on the job service.
pub fn job_name(chunk_ref: &str, now: DateTime<Utc>) -> String {
    format!("stage-chunk-{}-{}", chunk_ref, now.format("%Y%m%d%H%M%S"))
}

/// Process one push delivery end to end.
pub async fn handle_notification(
    launcher: &dyn JobLauncher,
    config: &LauncherConfig,
    raw: &[u8],
) -> Delivery {
    let notification = match decode_notification(raw) {
        Ok(notification) => notification,
        Err(e) => {
            tracing::warn!(
                error = %e,
                raw = %String::from_utf8_lossy(raw),
                "Dropping malformed new-chunk notification"
            );
            return Delivery::Ack;
        },
    };

    let spec = LaunchSpec {
        job_name: job_name(notification.chunk_ref(), Utc::now()),
        template_path: config.template_path.clone(),
        input_path: notification.input_path(),
        dataset_id: notification.dataset.clone(),
        service_account: config.service_account.clone(),
        temp_location: config.temp_location.clone(),
    };

    tracing::info!(
        job_name = %spec.job_name,
        input_path = %spec.input_path,
        dataset_id = %spec.dataset_id,
        "Launching staging job"
    );

    match launcher.launch(&spec).await {
        Ok(job) => {
            tracing::info!(job_id = %job.id, job_name = %spec.job_name, "Staging job launched");
            Delivery::Ack
        },
        Err(LaunchError::Transient(detail)) => {
            tracing::warn!(
                job_name = %spec.job_name,
                detail = %detail,
                "Transient launch failure; requesting redelivery"
            );
            Delivery::Retry
        },
        Err(e @ (LaunchError::Rejected(_) | LaunchError::NotObserved(_))) => {
            tracing::error!(
                job_name = %spec.job_name,
                error = %e,
                "Dropping unlaunchable notification"
            );
            Delivery::Ack
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Launcher double returning a scripted outcome and recording specs.
    struct ScriptedLauncher {
        outcome: fn() -> Result<crate::launcher::LaunchedJob, LaunchError>,
        specs: Mutex<Vec<LaunchSpec>>,
    }

    impl ScriptedLauncher {
        fn new(outcome: fn() -> Result<crate::launcher::LaunchedJob, LaunchError>) -> Self {
            Self {
                outcome,
                specs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JobLauncher for ScriptedLauncher {
        async fn launch(&self, spec: &LaunchSpec) -> Result<crate::launcher::LaunchedJob, LaunchError> {
            self.specs.lock().unwrap().push(spec.clone());
            (self.outcome)()
        }
    }

    fn config() -> LauncherConfig {
        LauncherConfig {
            launch_url: "http://job-service.internal/api/v1/jobs".to_string(),
            template_path: "registry/stage-chunk:latest".to_string(),
            service_account: "stage-runner".to_string(),
            temp_location: "s3://scratch/tmp".to_string(),
            request_timeout_secs: 5,
        }
    }

    fn notification_body() -> Vec<u8> {
        let payload = br#"{"bucket":"landing","name":"chunks/42","dataset":"ppdb"}"#;
        serde_json::to_vec(&PushEnvelope::wrap(payload)).unwrap()
    }

    #[test]
    fn test_decode_notification() {
        let notification = decode_notification(&notification_body()).unwrap();
        assert_eq!(notification.bucket, "landing");
        assert_eq!(notification.chunk_ref(), "42");
        assert_eq!(notification.input_path(), "s3://landing/chunks/42");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_notification(b"not json").is_err());

        // Valid envelope, payload not base64.
        let raw = br#"{"message": {"data": "%%%"}}"#;
        assert!(decode_notification(raw).is_err());

        // Valid envelope, payload missing the dataset key.
        let payload = br#"{"bucket":"landing","name":"chunks/42"}"#;
        let raw = serde_json::to_vec(&PushEnvelope::wrap(payload)).unwrap();
        assert!(decode_notification(&raw).is_err());
    }

    #[test]
    fn test_job_name_format() {
        let now = DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(job_name("42", now), "stage-chunk-42-20250601120000");
    }

    #[tokio::test]
    async fn test_malformed_notification_is_acked_without_launch() {
        let launcher = ScriptedLauncher::new(|| {
            panic!("launcher must not be called for malformed payloads")
        });

        let delivery = handle_notification(&launcher, &config(), b"{}").await;
        assert_eq!(delivery, Delivery::Ack);
        assert!(launcher.specs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_successful_launch_is_acked() {
        let launcher = ScriptedLauncher::new(|| {
            Ok(crate::launcher::LaunchedJob {
                id: "job-1".to_string(),
            })
        });

        let delivery = handle_notification(&launcher, &config(), &notification_body()).await;
        assert_eq!(delivery, Delivery::Ack);

        let specs = launcher.specs.lock().unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].input_path, "s3://landing/chunks/42");
        assert_eq!(specs[0].dataset_id, "ppdb");
        assert!(specs[0].job_name.starts_with("stage-chunk-42-"));
    }

    #[tokio::test]
    async fn test_transient_failure_requests_redelivery() {
        let launcher =
            ScriptedLauncher::new(|| Err(LaunchError::Transient("rate limited".to_string())));

        let delivery = handle_notification(&launcher, &config(), &notification_body()).await;
        assert_eq!(delivery, Delivery::Retry);
    }

    #[tokio::test]
    async fn test_rejection_and_unobserved_are_acked() {
        for outcome in [
            (|| Err(LaunchError::Rejected("bad".to_string())))
                as fn() -> Result<crate::launcher::LaunchedJob, LaunchError>,
            || Err(LaunchError::NotObserved("no job".to_string())),
        ] {
            let launcher = ScriptedLauncher::new(outcome);
            let delivery = handle_notification(&launcher, &config(), &notification_body()).await;
            assert_eq!(delivery, Delivery::Ack);
        }
    }
}
