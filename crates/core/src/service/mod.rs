pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{ApiError, FetchError},
    types::{FeedbackSubmission, FetchPhase, FetchRequest, ScheduleDefinition, Session},
};

pub use http::HttpNewsService;

/// Receives server-driven phase checkpoints while a fetch is in flight.
pub trait FetchProgress: Send + Sync {
    fn checkpoint(&self, phase: FetchPhase);
}

/// Progress sink that discards checkpoints.
pub struct NoProgress;

impl FetchProgress for NoProgress {
    fn checkpoint(&self, _phase: FetchPhase) {}
}

/// The remote briefing backend: gathering, summarization and speech synthesis happen behind
/// `fetch`; feedback and schedule definitions are stored there too.
#[async_trait]
pub trait RemoteNewsService: Send + Sync {
    /// Resolves to a session, a typed failure, or `FetchError::Cancelled` once `cancel` fires.
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: &dyn FetchProgress,
        cancel: CancellationToken,
    ) -> Result<Session, FetchError>;

    async fn submit_feedback(&self, submission: &FeedbackSubmission) -> Result<(), ApiError>;

    async fn list_schedules(&self) -> Result<Vec<ScheduleDefinition>, ApiError>;

    async fn create_schedule(
        &self,
        definition: &ScheduleDefinition,
    ) -> Result<ScheduleDefinition, ApiError>;

    async fn update_schedule(
        &self,
        definition: &ScheduleDefinition,
    ) -> Result<ScheduleDefinition, ApiError>;

    async fn delete_schedule(&self, schedule_id: &str) -> Result<(), ApiError>;

    async fn record_run(&self, schedule_id: &str, at: DateTime<Utc>) -> Result<(), ApiError>;
}
