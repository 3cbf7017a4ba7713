use thiserror::Error;

/// Failure of a briefing fetch. `Cancelled` is the cooperative-cancel outcome and is never
/// surfaced to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network failure while fetching briefing: {reason}")]
    Network { reason: String },

    #[error("Briefing service returned {status}: {reason}")]
    Server { status: u16, reason: String },

    #[error("Invalid briefing response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Briefing job failed: {reason}")]
    JobFailed { reason: String },

    #[error("Briefing fetch was cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::Server {
                status: status.as_u16(),
                reason: err.to_string(),
            },
            None if err.is_decode() => FetchError::InvalidResponse {
                reason: err.to_string(),
            },
            None => FetchError::Network {
                reason: err.to_string(),
            },
        }
    }
}

/// Failure of any non-fetch call to the briefing service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("API request failed: {reason}")]
    Request { reason: String },

    #[error("API returned {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("Invalid API response: {reason}")]
    InvalidResponse { reason: String },
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ApiError::Status {
                status: status.as_u16(),
                reason: err.to_string(),
            },
            None if err.is_decode() => ApiError::InvalidResponse {
                reason: err.to_string(),
            },
            None => ApiError::Request {
                reason: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::InvalidResponse {
            reason: err.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioLoadError {
    #[error("Audio for topic {topic} is unavailable")]
    Missing { topic: String },

    #[error("Audio load failed for {audio_ref}: {reason}")]
    LoadFailed { audio_ref: String, reason: String },

    #[error("Audio {audio_ref} reported a non-finite duration")]
    InvalidDuration { audio_ref: String },

    #[error("Topic index {index} is out of range")]
    NoSuchTopic { index: usize },
}

/// Rejections and failures of topic feedback. Every variant leaves the entry in its previous,
/// still-editable state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedbackError {
    #[error("No session is loaded for feedback")]
    NoActiveSession,

    #[error("Topic {topic} is not part of session {session_id}")]
    UnknownTopic { session_id: String, topic: String },

    #[error("Feedback for {topic} was already submitted")]
    AlreadySubmitted { topic: String },

    #[error("Feedback for {topic} is already being submitted")]
    SubmissionInFlight { topic: String },

    #[error("No reaction selected for {topic}")]
    NoReaction { topic: String },

    #[error("Feedback submission for {topic} failed: {reason}")]
    Submission { topic: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Listing schedules failed: {reason}")]
pub struct ScheduleListError {
    pub reason: String,
}

impl From<ApiError> for ScheduleListError {
    fn from(err: ApiError) -> Self {
        Self {
            reason: err.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
}
