pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod feedback;
pub mod fetch;
pub mod format;
pub mod notifications;
pub mod playback;
pub mod queues;
pub mod schedule;
pub mod service;
pub mod store;
pub mod types;
pub mod workers;

pub use audio::{AudioEvent, AudioTransport};
pub use client::NewsClient;
pub use config::ClientConfig;
pub use error::{
    ApiError, AudioLoadError, ConfigError, FeedbackError, FetchError, ScheduleListError,
    StoreError,
};
pub use feedback::{FeedbackBlob, FeedbackCoordinator};
pub use fetch::{FetchOrchestrator, FetchOutcome, FetchRejection, FetchSnapshot};
pub use format::{format_schedule_line, format_session_readable, format_timestamp};
pub use playback::PlaybackCoordinator;
pub use schedule::{RunnerOptions, ScheduleFiring, ScheduleRunner, ScheduledFetch};
pub use service::{FetchProgress, HttpNewsService, NoProgress, RemoteNewsService};
pub use store::{FileStore, MemoryStore, PersistentStore};
pub use types::{
    Article, AudioRef, FeedbackEntry, FeedbackSubmission, FetchPhase, FetchPreferences,
    FetchRequest, PlaybackState, Reaction, ScheduleDefinition, Session, SummaryLength, TopicKey,
    TopicSection,
};
