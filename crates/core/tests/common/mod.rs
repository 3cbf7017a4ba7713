#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newscast_core::{
    ApiError, Article, AudioEvent, AudioLoadError, AudioRef, AudioTransport, FeedbackSubmission,
    FetchError, FetchPhase, FetchProgress, FetchRequest, RemoteNewsService, ScheduleDefinition,
    Session, TopicSection,
    events::{BusConfig, Event, EventBus, EventBusBuilder},
    workers::{InputSpec, SubscriptionSpec, WorkerInputs},
};
use tokio::sync::{Semaphore, broadcast, oneshot};
use tokio_util::sync::CancellationToken;

pub type Reply = Result<Session, FetchError>;

/// A session whose topics each have `n` articles and their own audio.
pub fn make_session(id: &str, topics: &[(&str, usize)]) -> Session {
    let mut articles = Vec::new();
    let mut sections = Vec::new();

    for (topic, count) in topics {
        let topic_articles: Vec<Article> = (0..*count)
            .map(|i| Article {
                id: format!("{id}-{topic}-{i}"),
                title: format!("{topic} story {i}"),
                url: format!("https://news.example/{topic}/{i}"),
                source: "Example Wire".to_string(),
                summary_text: String::new(),
            })
            .collect();
        articles.extend(topic_articles.iter().cloned());
        sections.push(TopicSection {
            topic: topic.to_string(),
            summary_text: format!("{topic} summary"),
            articles: topic_articles,
            audio_ref: Some(AudioRef::new(audio_for(id, topic))),
        });
    }

    Session {
        id: id.to_string(),
        summary_text: format!("briefing {id}"),
        sections,
        articles,
        audio_ref: None,
        created_at: Utc::now(),
    }
}

pub fn audio_for(session_id: &str, topic: &str) -> String {
    format!("audio://{session_id}/{topic}")
}

struct FetchPlan {
    checkpoints: Vec<FetchPhase>,
    honor_cancel: bool,
    reply: oneshot::Receiver<Reply>,
}

/// Scripted briefing backend. Every fetch consumes the next plan; feedback calls can be held
/// on a semaphore and made to fail.
#[derive(Default)]
pub struct FakeService {
    plans: Mutex<VecDeque<FetchPlan>>,
    pub fetch_calls: AtomicUsize,
    pub fetch_requests: Mutex<Vec<FetchRequest>>,

    pub submissions: Mutex<Vec<FeedbackSubmission>>,
    feedback_gate: Mutex<Option<Arc<Semaphore>>>,
    feedback_failures: AtomicUsize,

    schedules: Mutex<Vec<ScheduleDefinition>>,
    list_error: Mutex<Option<ApiError>>,
    pub list_calls: AtomicUsize,
    pub runs: Mutex<Vec<(String, DateTime<Utc>)>>,
    next_schedule_id: AtomicUsize,
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a fetch that resolves with whatever is sent on the returned channel. A plan that
    /// does not honour cancellation keeps running until it is answered.
    pub fn plan_fetch(
        &self,
        checkpoints: Vec<FetchPhase>,
        honor_cancel: bool,
    ) -> oneshot::Sender<Reply> {
        let (tx, rx) = oneshot::channel();
        self.plans.lock().unwrap().push_back(FetchPlan {
            checkpoints,
            honor_cancel,
            reply: rx,
        });
        tx
    }

    pub fn plan_reply(&self, reply: Reply) {
        let tx = self.plan_fetch(vec![FetchPhase::Summarizing, FetchPhase::Synthesizing], true);
        let _ = tx.send(reply);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Holds every feedback call until a permit is added.
    pub fn gate_feedback(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.feedback_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn fail_next_feedback(&self, calls: usize) {
        self.feedback_failures.store(calls, Ordering::SeqCst);
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn set_schedules(&self, schedules: Vec<ScheduleDefinition>) {
        *self.schedules.lock().unwrap() = schedules;
    }

    pub fn fail_listing(&self, error: ApiError) {
        *self.list_error.lock().unwrap() = Some(error);
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteNewsService for FakeService {
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: &dyn FetchProgress,
        cancel: CancellationToken,
    ) -> Result<Session, FetchError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_requests.lock().unwrap().push(request.clone());

        let plan = self.plans.lock().unwrap().pop_front();
        let Some(plan) = plan else {
            return Err(FetchError::InvalidResponse {
                reason: "no scripted reply".to_string(),
            });
        };

        for phase in &plan.checkpoints {
            progress.checkpoint(*phase);
        }

        if plan.honor_cancel {
            tokio::select! {
                _ = cancel.cancelled() => Err(FetchError::Cancelled),
                reply = plan.reply => reply.unwrap_or(Err(FetchError::Cancelled)),
            }
        } else {
            plan.reply.await.unwrap_or(Err(FetchError::Cancelled))
        }
    }

    async fn submit_feedback(&self, submission: &FeedbackSubmission) -> Result<(), ApiError> {
        self.submissions.lock().unwrap().push(submission.clone());

        let gate = self.feedback_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("feedback gate closed").forget();
        }

        let failing = self
            .feedback_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ApiError::Status {
                status: 503,
                reason: "feedback unavailable".to_string(),
            });
        }
        Ok(())
    }

    async fn list_schedules(&self) -> Result<Vec<ScheduleDefinition>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.list_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.schedules.lock().unwrap().clone())
    }

    async fn create_schedule(
        &self,
        definition: &ScheduleDefinition,
    ) -> Result<ScheduleDefinition, ApiError> {
        let mut created = definition.clone();
        if created.id.is_empty() {
            let n = self.next_schedule_id.fetch_add(1, Ordering::SeqCst) + 1;
            created.id = format!("sched-{n}");
        }
        self.schedules.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn update_schedule(
        &self,
        definition: &ScheduleDefinition,
    ) -> Result<ScheduleDefinition, ApiError> {
        let mut schedules = self.schedules.lock().unwrap();
        let Some(existing) = schedules.iter_mut().find(|d| d.id == definition.id) else {
            return Err(ApiError::Status {
                status: 404,
                reason: format!("no schedule {}", definition.id),
            });
        };
        *existing = definition.clone();
        Ok(definition.clone())
    }

    async fn delete_schedule(&self, schedule_id: &str) -> Result<(), ApiError> {
        self.schedules.lock().unwrap().retain(|d| d.id != schedule_id);
        Ok(())
    }

    async fn record_run(&self, schedule_id: &str, at: DateTime<Utc>) -> Result<(), ApiError> {
        self.runs.lock().unwrap().push((schedule_id.to_string(), at));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Seek(f64),
    Stop,
}

/// Audio transport that records commands. Unknown refs load with a 60 second duration.
pub struct FakeTransport {
    durations: Mutex<HashMap<String, Result<f64, AudioLoadError>>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    pub loads: Mutex<Vec<String>>,
    pub commands: Mutex<Vec<Command>>,
    events: broadcast::Sender<AudioEvent>,
    subscriptions: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            durations: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            loads: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            events,
            subscriptions: AtomicUsize::new(0),
        })
    }

    pub fn set_duration(&self, audio: &str, duration: Result<f64, AudioLoadError>) {
        self.durations
            .lock()
            .unwrap()
            .insert(audio.to_string(), duration);
    }

    /// Holds loads of `audio` until a permit is added.
    pub fn gate(&self, audio: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates
            .lock()
            .unwrap()
            .insert(audio.to_string(), Arc::clone(&gate));
        gate
    }

    pub fn emit(&self, event: AudioEvent) {
        let _ = self.events.send(event);
    }

    pub fn load_count(&self) -> usize {
        self.loads.lock().unwrap().len()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    pub fn clear_commands(&self) {
        self.commands.lock().unwrap().clear();
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    fn record(&self, command: Command) {
        self.commands.lock().unwrap().push(command);
    }
}

#[async_trait]
impl AudioTransport for FakeTransport {
    async fn load(&self, audio: &AudioRef) -> Result<f64, AudioLoadError> {
        self.loads.lock().unwrap().push(audio.to_string());

        let gate = self.gates.lock().unwrap().get(audio.as_str()).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.expect("load gate closed").forget();
        }

        self.durations
            .lock()
            .unwrap()
            .get(audio.as_str())
            .cloned()
            .unwrap_or(Ok(60.0))
    }

    fn play(&self) {
        self.record(Command::Play);
    }

    fn pause(&self) {
        self.record(Command::Pause);
    }

    fn seek(&self, seconds: f64) {
        self.record(Command::Seek(seconds));
    }

    fn stop(&self) {
        self.record(Command::Stop);
    }

    fn subscribe(&self) -> broadcast::Receiver<AudioEvent> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.events.subscribe()
    }
}

/// A bus with one FIFO subscriber listening to `event_types`.
pub fn listener_bus(event_types: &[&'static str]) -> (EventBus, WorkerInputs) {
    let spec = SubscriptionSpec {
        subscriber_id: "listener",
        inputs: event_types.iter().map(|t| InputSpec::fifo(*t, 64)).collect(),
    };
    let (bus, mut wiring, tasks) = EventBusBuilder::new(BusConfig::default())
        .subscribe(spec)
        .build()
        .expect("listener bus");
    tasks.spawn_all();
    (bus, wiring.take("listener").expect("listener wiring"))
}

/// Everything the listener received so far.
pub async fn drain(inputs: &mut WorkerInputs) -> Vec<Arc<dyn Event>> {
    let mut events = Vec::new();
    while let Ok(batch) = tokio::time::timeout(Duration::from_millis(20), inputs.next()).await {
        events.extend(batch.into_events().into_iter().map(|e| Arc::clone(&e.event)));
    }
    events
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
