use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use newscast_core::{
    FetchPhase, Reaction,
    events::{EnrichedEvent, EventBus, expect},
    format_timestamp,
    notifications::{
        AudioUnavailable, FeedbackSubmitted, FetchCancelled, FetchFailed, PhaseChanged,
        ScheduleFired, SessionPublished, TopicAdvanced, TopicLoaded,
    },
    workers::{InputSpec, SubscriptionSpec, Worker},
};
use tokio::sync::oneshot;

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Renders coordinator notifications on the terminal. The fetch spinner follows the
/// snapshot of the newest phase; everything else is printed in order.
pub struct StatusSink {
    spinner: Option<ProgressBar>,
    started: Option<Instant>,
    settled_attempt: u64,
    settled: Option<oneshot::Sender<()>>,
}

impl StatusSink {
    /// `settled` fires once the first fetch attempt has been rendered as finished.
    pub fn new(settled: Option<oneshot::Sender<()>>) -> Self {
        Self {
            spinner: None,
            started: None,
            settled_attempt: 0,
            settled,
        }
    }

    fn on_phase(&mut self, change: &PhaseChanged) {
        if change.attempt <= self.settled_attempt || change.to == FetchPhase::Idle {
            return;
        }
        let message = format!("Briefing: {}...", change.to.label());
        match &self.spinner {
            Some(spinner) => spinner.set_message(message),
            None => {
                self.started = Some(Instant::now());
                self.spinner = Some(create_spinner(&message));
            }
        }
    }

    fn settle(&mut self, attempt: u64, line: String) {
        self.settled_attempt = self.settled_attempt.max(attempt);
        let elapsed = self
            .started
            .take()
            .map(|t| format!(" {}", style(format!("[{}]", format_duration(t.elapsed()))).dim()))
            .unwrap_or_default();
        match self.spinner.take() {
            Some(spinner) => spinner.finish_with_message(format!("{line}{elapsed}")),
            None => println!("{line}{elapsed}"),
        }
        if let Some(settled) = self.settled.take() {
            let _ = settled.send(());
        }
    }
}

impl Worker for StatusSink {
    const SUBSCRIBER_ID: &'static str = "cli.status";

    fn subscription() -> SubscriptionSpec {
        SubscriptionSpec {
            subscriber_id: Self::SUBSCRIBER_ID,
            inputs: vec![
                InputSpec::latest(PhaseChanged::EVENT_TYPE),
                InputSpec::fifo(SessionPublished::EVENT_TYPE, 4),
                InputSpec::fifo(FetchFailed::EVENT_TYPE, 4),
                InputSpec::fifo(FetchCancelled::EVENT_TYPE, 4),
                InputSpec::fifo(TopicLoaded::EVENT_TYPE, 16),
                InputSpec::fifo(TopicAdvanced::EVENT_TYPE, 16),
                InputSpec::fifo(AudioUnavailable::EVENT_TYPE, 16),
                InputSpec::fifo(FeedbackSubmitted::EVENT_TYPE, 16),
                InputSpec::isolated(ScheduleFired::EVENT_TYPE, 8),
            ],
        }
    }

    async fn handle(&mut self, event: Arc<EnrichedEvent>, _bus: &EventBus) -> anyhow::Result<()> {
        tracing::trace!(
            event_type = event.event_type(),
            queued_ms = event.queued_for().as_millis() as u64,
            "status event"
        );
        let event = &event.event;
        match event.event_type() {
            PhaseChanged::EVENT_TYPE => {
                self.on_phase(expect::<PhaseChanged>(event, PhaseChanged::EVENT_TYPE)?);
            }
            SessionPublished::EVENT_TYPE => {
                let published = expect::<SessionPublished>(event, SessionPublished::EVENT_TYPE)?;
                self.settle(
                    published.attempt,
                    format!(
                        "{} Briefing ready: {}",
                        style("✓").green().bold(),
                        style(published.topics.join(", ")).yellow()
                    ),
                );
            }
            FetchFailed::EVENT_TYPE => {
                let failed = expect::<FetchFailed>(event, FetchFailed::EVENT_TYPE)?;
                self.settle(
                    failed.attempt,
                    format!("{} {}", style("✗").red().bold(), failed.message),
                );
            }
            FetchCancelled::EVENT_TYPE => {
                let cancelled = expect::<FetchCancelled>(event, FetchCancelled::EVENT_TYPE)?;
                self.settle(
                    cancelled.attempt,
                    format!(
                        "{} Cancelled while {}",
                        style("-").dim(),
                        cancelled.phase.label()
                    ),
                );
            }
            TopicLoaded::EVENT_TYPE => {
                let loaded = expect::<TopicLoaded>(event, TopicLoaded::EVENT_TYPE)?;
                println!(
                    "{} {} {}",
                    style("♪").cyan().bold(),
                    loaded.key.topic,
                    style(format!("({})", format_timestamp(loaded.duration_seconds))).dim()
                );
            }
            TopicAdvanced::EVENT_TYPE => {
                let advanced = expect::<TopicAdvanced>(event, TopicAdvanced::EVENT_TYPE)?;
                tracing::debug!(
                    session_id = %advanced.session_id,
                    from = advanced.from_index,
                    to = advanced.to_index,
                    "advanced to next topic"
                );
            }
            AudioUnavailable::EVENT_TYPE => {
                let unavailable = expect::<AudioUnavailable>(event, AudioUnavailable::EVENT_TYPE)?;
                println!(
                    "{} No audio for {}: {}",
                    style("!").yellow().bold(),
                    unavailable.key.topic,
                    style(&unavailable.reason).dim()
                );
            }
            FeedbackSubmitted::EVENT_TYPE => {
                let submitted = expect::<FeedbackSubmitted>(event, FeedbackSubmitted::EVENT_TYPE)?;
                let reaction = match submitted.reaction {
                    Reaction::Like => "liked",
                    Reaction::Dislike => "disliked",
                    Reaction::None => "skipped",
                };
                println!(
                    "{} Feedback sent: {} {} {}",
                    style("✓").green().bold(),
                    submitted.key.topic,
                    reaction,
                    style(format!("({} articles)", submitted.articles)).dim()
                );
            }
            ScheduleFired::EVENT_TYPE => {
                let fired = expect::<ScheduleFired>(event, ScheduleFired::EVENT_TYPE)?;
                println!(
                    "\n{} {} {} {}",
                    style("⏰").bold(),
                    style(&fired.name).cyan().bold(),
                    fired.topics.join(", "),
                    style(fired.fired_at.format("%H:%M").to_string()).dim()
                );
            }
            other => anyhow::bail!("unexpected event_type={other}"),
        }
        Ok(())
    }
}
