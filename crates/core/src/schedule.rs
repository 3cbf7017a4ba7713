//! Unattended fetches for user-defined schedules.
//!
//! A schedule is due from its local time of day until `window` later, on one of its weekdays.
//! Each `(schedule, window)` fires at most once: the guard entry is written under the lock before
//! the fetch is awaited, so a periodic tick and a foreground check racing each other cannot both
//! fire it.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Days, FixedOffset, Local, NaiveDate, TimeZone, Utc};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ClientConfig,
    error::{ApiError, ScheduleListError},
    events::EventBus,
    fetch::{FetchOrchestrator, FetchOutcome, FetchRejection},
    notifications::ScheduleFired,
    service::RemoteNewsService,
    types::ScheduleDefinition,
};

/// Whatever runs the fetch of a due schedule.
#[async_trait]
pub trait ScheduledFetch: Send + Sync {
    async fn fetch_scheduled(&self, topics: BTreeSet<String>) -> FetchOutcome;
}

#[async_trait]
impl ScheduledFetch for FetchOrchestrator {
    async fn fetch_scheduled(&self, topics: BTreeSet<String>) -> FetchOutcome {
        self.fetch_selection(topics).await
    }
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub tick: Duration,
    pub window: Duration,
    /// Offset used to read times of day; `None` follows the system time zone.
    pub utc_offset: Option<FixedOffset>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(120),
            window: Duration::from_secs(180),
            utc_offset: None,
        }
    }
}

impl RunnerOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            tick: config.schedule_tick,
            window: config.schedule_window,
            utc_offset: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleFiring {
    pub schedule_id: String,
    pub fired_at: DateTime<Utc>,
    pub outcome: FetchOutcome,
}

#[derive(Clone)]
pub struct ScheduleRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    service: Arc<dyn RemoteNewsService>,
    fetcher: Arc<dyn ScheduledFetch>,
    state: Mutex<RunnerState>,
    poll: Mutex<Option<PollHandle>>,
    bus: Option<EventBus>,
    options: RunnerOptions,
}

#[derive(Default)]
struct RunnerState {
    definitions: Vec<ScheduleDefinition>,
    /// Time each schedule last fired from this process.
    guard: HashMap<String, DateTime<Utc>>,
}

struct PollHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ScheduleRunner {
    pub fn new(
        service: Arc<dyn RemoteNewsService>,
        fetcher: Arc<dyn ScheduledFetch>,
        options: RunnerOptions,
        bus: Option<EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                service,
                fetcher,
                state: Mutex::new(RunnerState::default()),
                poll: Mutex::new(None),
                bus,
                options,
            }),
        }
    }

    /// Reloads definitions from the service. A failing list leaves no schedules known.
    pub async fn refresh(&self) -> Vec<ScheduleDefinition> {
        let definitions = match self.inner.service.list_schedules().await {
            Ok(definitions) => definitions,
            Err(e) => {
                let err = ScheduleListError::from(e);
                tracing::warn!(error = %err, "schedules unavailable");
                Vec::new()
            }
        };

        tracing::debug!(count = definitions.len(), "schedules refreshed");
        self.inner.lock().definitions = definitions.clone();
        definitions
    }

    pub fn definitions(&self) -> Vec<ScheduleDefinition> {
        self.inner.lock().definitions.clone()
    }

    /// Replaces the known definitions without asking the service.
    pub fn set_definitions(&self, definitions: Vec<ScheduleDefinition>) {
        self.inner.lock().definitions = definitions;
    }

    pub async fn create_schedule(
        &self,
        definition: &ScheduleDefinition,
    ) -> Result<ScheduleDefinition, ApiError> {
        let created = self.inner.service.create_schedule(definition).await?;
        self.inner.lock().definitions.push(created.clone());
        Ok(created)
    }

    pub async fn update_schedule(
        &self,
        definition: &ScheduleDefinition,
    ) -> Result<ScheduleDefinition, ApiError> {
        let updated = self.inner.service.update_schedule(definition).await?;
        let mut st = self.inner.lock();
        match st.definitions.iter_mut().find(|d| d.id == updated.id) {
            Some(existing) => *existing = updated.clone(),
            None => st.definitions.push(updated.clone()),
        }
        Ok(updated)
    }

    pub async fn delete_schedule(&self, schedule_id: &str) -> Result<(), ApiError> {
        self.inner.service.delete_schedule(schedule_id).await?;
        let mut st = self.inner.lock();
        st.definitions.retain(|d| d.id != schedule_id);
        st.guard.remove(schedule_id);
        Ok(())
    }

    /// Fires every enabled schedule whose window contains `now` and that has not fired in that
    /// window yet. A schedule rejected because a fetch is already running stays due.
    pub async fn check_due(&self, now: DateTime<Utc>) -> Vec<ScheduleFiring> {
        let due = {
            let mut st = self.inner.lock();
            let mut due = Vec::new();
            for definition in st.definitions.iter().filter(|d| d.enabled) {
                let Some(start) = self.inner.window_start(definition, now) else {
                    continue;
                };
                let already_ran = st.guard.get(&definition.id).is_some_and(|t| *t >= start)
                    || definition.last_run_at.is_some_and(|t| t >= start);
                if !already_ran {
                    due.push(definition.clone());
                }
            }
            for definition in &due {
                st.guard.insert(definition.id.clone(), now);
            }
            due
        };

        let mut fired = Vec::new();
        for definition in due {
            let topics = definition.selection();
            tracing::debug!(schedule_id = %definition.id, ?topics, "schedule due");

            let outcome = self.inner.fetcher.fetch_scheduled(topics.clone()).await;
            match &outcome {
                FetchOutcome::Rejected(FetchRejection::Busy) => {
                    tracing::debug!(schedule_id = %definition.id, "fetch busy, schedule stays due");
                    self.inner.lock().guard.remove(&definition.id);
                    continue;
                }
                FetchOutcome::Rejected(rejection) => {
                    tracing::warn!(
                        schedule_id = %definition.id,
                        ?rejection,
                        "scheduled fetch rejected"
                    );
                    continue;
                }
                FetchOutcome::Failed(e) => {
                    tracing::warn!(
                        schedule_id = %definition.id,
                        error = %e,
                        "scheduled fetch failed"
                    );
                }
                FetchOutcome::Published(_) | FetchOutcome::Cancelled => {}
            }

            self.record_run(&definition, now).await;
            tracing::info!(schedule_id = %definition.id, name = %definition.name, "schedule fired");
            if let Some(bus) = &self.inner.bus {
                bus.emit(ScheduleFired::new(
                    definition.id.clone(),
                    definition.name.clone(),
                    topics.into_iter().collect(),
                    now,
                ));
            }

            fired.push(ScheduleFiring {
                schedule_id: definition.id,
                fired_at: now,
                outcome,
            });
        }
        fired
    }

    /// One-shot check when the app comes back to the foreground. Independent of `start`/`stop`.
    pub async fn on_foreground(&self) -> Vec<ScheduleFiring> {
        self.refresh().await;
        self.check_due(Utc::now()).await
    }

    /// Arms the periodic tick. The first check happens immediately.
    pub fn start(&self) {
        let mut poll = self.inner.poll.lock().expect("schedule poll poisoned");
        if poll.as_ref().is_some_and(|p| !p.task.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_schedules(
            Arc::downgrade(&self.inner),
            self.inner.options.tick,
            cancel.clone(),
        ));
        *poll = Some(PollHandle { cancel, task });
        tracing::debug!(tick = ?self.inner.options.tick, "schedule runner started");
    }

    pub fn stop(&self) {
        if let Some(poll) = self.inner.poll.lock().expect("schedule poll poisoned").take() {
            poll.cancel.cancel();
            tracing::debug!("schedule runner stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .poll
            .lock()
            .expect("schedule poll poisoned")
            .as_ref()
            .is_some_and(|p| !p.task.is_finished())
    }

    async fn record_run(&self, definition: &ScheduleDefinition, at: DateTime<Utc>) {
        if let Some(known) = self
            .inner
            .lock()
            .definitions
            .iter_mut()
            .find(|d| d.id == definition.id)
        {
            known.last_run_at = Some(at);
        }

        if let Err(e) = self.inner.service.record_run(&definition.id, at).await {
            tracing::warn!(
                schedule_id = %definition.id,
                error = %e,
                "failed to record schedule run"
            );
        }
    }
}

impl RunnerInner {
    fn lock(&self) -> MutexGuard<'_, RunnerState> {
        self.state.lock().expect("ScheduleRunner state poisoned")
    }

    fn window_start(
        &self,
        definition: &ScheduleDefinition,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        window_start(definition, now, self.options.window, self.options.utc_offset)
    }
}

/// Start of the due window of `definition` that contains `now`, if any.
pub fn window_start(
    definition: &ScheduleDefinition,
    now: DateTime<Utc>,
    window: Duration,
    utc_offset: Option<FixedOffset>,
) -> Option<DateTime<Utc>> {
    let today = match utc_offset {
        Some(offset) => now.with_timezone(&offset).date_naive(),
        None => now.with_timezone(&Local).date_naive(),
    };
    let window = chrono::Duration::from_std(window).ok()?;

    // a window opened late yesterday may still be running
    [Some(today), today.checked_sub_days(Days::new(1))]
        .into_iter()
        .flatten()
        .filter(|day| definition.runs_on(day.weekday()))
        .filter_map(|day| local_start(day, definition, utc_offset))
        .find(|start| *start <= now && now <= *start + window)
}

fn local_start(
    day: NaiveDate,
    definition: &ScheduleDefinition,
    utc_offset: Option<FixedOffset>,
) -> Option<DateTime<Utc>> {
    let naive = day.and_time(definition.time);
    match utc_offset {
        Some(offset) => offset
            .from_local_datetime(&naive)
            .single()
            .map(|t| t.with_timezone(&Utc)),
        None => Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|t| t.with_timezone(&Utc)),
    }
}

impl Drop for RunnerInner {
    fn drop(&mut self) {
        if let Ok(mut poll) = self.poll.lock()
            && let Some(poll) = poll.take()
        {
            poll.cancel.cancel();
        }
    }
}

async fn poll_schedules(inner: Weak<RunnerInner>, tick: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let runner = ScheduleRunner { inner };
                runner.refresh().await;
                runner.check_due(Utc::now()).await;
            }
        }
    }
}
