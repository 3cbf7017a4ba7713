use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ClientConfig,
    error::{ApiError, ConfigError, FetchError},
    service::{FetchProgress, RemoteNewsService},
    types::{
        FeedbackSubmission, FetchPhase, FetchRequest, ScheduleDefinition, Session,
        decode_schedule_list,
    },
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BriefingJob {
    id: String,
    status: JobStatus,
    #[serde(default)]
    phase: Option<FetchPhase>,
    #[serde(default)]
    session: Option<Session>,
    #[serde(default)]
    error: Option<String>,
}

/// JSON-over-HTTP briefing backend. A fetch starts a briefing job and polls it, forwarding the
/// job's phase as checkpoints.
pub struct HttpNewsService {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    poll_interval: Duration,
}

impl HttpNewsService {
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let api_key = config.require_api_key()?.to_string();
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key,
            poll_interval: config.fetch_poll_interval,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
    }

    async fn job_status(&self, job_id: &str) -> Result<BriefingJob, FetchError> {
        let job = self
            .request(Method::GET, &format!("/v1/briefings/{job_id}"))
            .send()
            .await?
            .error_for_status()?
            .json::<BriefingJob>()
            .await?;
        Ok(job)
    }

    async fn abandon_job(&self, job_id: &str) {
        let result = self
            .request(Method::DELETE, &format!("/v1/briefings/{job_id}"))
            .send()
            .await
            .and_then(|r| r.error_for_status());
        if let Err(e) = result {
            tracing::debug!(job_id, error = %e, "failed to abandon cancelled briefing job");
        }
    }
}

#[async_trait]
impl RemoteNewsService for HttpNewsService {
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: &dyn FetchProgress,
        cancel: CancellationToken,
    ) -> Result<Session, FetchError> {
        let started = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            started = async {
                self.request(Method::POST, "/v1/briefings")
                    .json(request)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<BriefingJob>()
                    .await
            } => started?,
        };

        let job_id = started.id.clone();
        tracing::debug!(job_id = %job_id, "briefing job started");
        let mut job = Some(started);

        loop {
            let current = match job.take() {
                Some(job) => job,
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            self.abandon_job(&job_id).await;
                            return Err(FetchError::Cancelled);
                        }
                        status = self.job_status(&job_id) => status?,
                    }
                }
            };

            if let Some(phase) = current.phase {
                progress.checkpoint(phase);
            }

            match current.status {
                JobStatus::Complete => {
                    return current.session.ok_or_else(|| FetchError::InvalidResponse {
                        reason: format!("briefing job {job_id} completed without a session"),
                    });
                }
                JobStatus::Failed => {
                    return Err(FetchError::JobFailed {
                        reason: current
                            .error
                            .unwrap_or_else(|| "no reason given".to_string()),
                    });
                }
                JobStatus::Pending | JobStatus::Running => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.abandon_job(&job_id).await;
                    return Err(FetchError::Cancelled);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn submit_feedback(&self, submission: &FeedbackSubmission) -> Result<(), ApiError> {
        self.request(Method::POST, "/v1/feedback")
            .json(submission)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn list_schedules(&self) -> Result<Vec<ScheduleDefinition>, ApiError> {
        let body = self
            .request(Method::GET, "/v1/schedules")
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;
        Ok(decode_schedule_list(body))
    }

    async fn create_schedule(
        &self,
        definition: &ScheduleDefinition,
    ) -> Result<ScheduleDefinition, ApiError> {
        let created = self
            .request(Method::POST, "/v1/schedules")
            .json(definition)
            .send()
            .await?
            .error_for_status()?
            .json::<ScheduleDefinition>()
            .await?;
        Ok(created)
    }

    async fn update_schedule(
        &self,
        definition: &ScheduleDefinition,
    ) -> Result<ScheduleDefinition, ApiError> {
        let updated = self
            .request(Method::PUT, &format!("/v1/schedules/{}", definition.id))
            .json(definition)
            .send()
            .await?
            .error_for_status()?
            .json::<ScheduleDefinition>()
            .await?;
        Ok(updated)
    }

    async fn delete_schedule(&self, schedule_id: &str) -> Result<(), ApiError> {
        self.request(Method::DELETE, &format!("/v1/schedules/{schedule_id}"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn record_run(&self, schedule_id: &str, at: DateTime<Utc>) -> Result<(), ApiError> {
        self.request(Method::POST, &format!("/v1/schedules/{schedule_id}/runs"))
            .json(&serde_json::json!({ "lastRunAt": at.to_rfc3339() }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
