use std::{pin::pin, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{NaiveTime, Weekday};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use newscast_core::{
    ClientConfig, FetchOutcome, FetchRejection, NewsClient, Reaction, ScheduleDefinition,
    SummaryLength, events::BusConfig, format_schedule_line, format_session_readable,
    format_timestamp, types::parse_time_of_day,
};
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

use crate::{
    pipeline::{StatusHandle, start_status},
    transport::WavClockTransport,
};

mod cache;
mod pipeline;
mod status;
mod transport;

/// CLI wrapper for SummaryLength (needed for clap ValueEnum)
#[derive(Clone, Copy, Default, ValueEnum)]
enum CliLength {
    Brief,
    #[default]
    Standard,
    Deep,
}

impl From<CliLength> for SummaryLength {
    fn from(cli: CliLength) -> Self {
        match cli {
            CliLength::Brief => SummaryLength::Brief,
            CliLength::Standard => SummaryLength::Standard,
            CliLength::Deep => SummaryLength::Deep,
        }
    }
}

#[derive(Parser)]
#[command(name = "newscast")]
#[command(about = "Fetch personalized audio news briefings, listen, and rate the coverage")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a briefing for the given topics
    Brief(BriefArgs),

    /// Manage scheduled briefings
    Schedules {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Run due schedules until interrupted
    Watch,
}

#[derive(clap::Args)]
struct BriefArgs {
    /// Topics to cover (e.g. "tech" "world" "rust lang")
    #[arg(required = true)]
    topics: Vec<String>,

    /// Summary language (e.g., "en", "uk"). Defaults to NEWSCAST_LANGUAGE or "en".
    #[arg(short, long)]
    lang: Option<String>,

    /// Summary length
    #[arg(long, default_value = "standard")]
    length: CliLength,

    /// Narrator voice
    #[arg(long)]
    voice: Option<String>,

    /// Listen to the briefing topic by topic
    #[arg(short, long)]
    play: bool,

    /// Like a topic's coverage
    #[arg(long, value_name = "TOPIC")]
    like: Vec<String>,

    /// Dislike a topic's coverage
    #[arg(long, value_name = "TOPIC")]
    dislike: Vec<String>,

    /// Comment sent with every rated topic
    #[arg(short, long)]
    comment: Option<String>,
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// List schedules
    List,

    /// Create a schedule
    Add {
        /// Display name
        #[arg(short, long)]
        name: String,

        /// Time of day, HH:MM
        #[arg(short, long, value_parser = parse_time)]
        time: NaiveTime,

        /// Days to run on (e.g. "mon,fri"); every day when omitted
        #[arg(short, long, value_delimiter = ',')]
        days: Vec<Weekday>,

        /// Topics to fetch
        #[arg(required = true)]
        topics: Vec<String>,
    },

    /// Delete a schedule
    Remove { id: String },
}

fn parse_time(raw: &str) -> Result<NaiveTime, String> {
    parse_time_of_day(raw).ok_or_else(|| format!("expected HH:MM, got {raw:?}"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = ClientConfig::from_env().context("loading configuration")?;

    // Validate API key early
    if let Err(e) = config.require_api_key() {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    let status = start_status(BusConfig::default())?;
    let transport = Arc::new(WavClockTransport::new(config.cache_dir()));
    let client = NewsClient::connect(&config, transport, Some(status.bus.clone()))?;

    println!(
        "\n{}  {}\n",
        style("newscast").cyan().bold(),
        style("Audio Briefings").dim()
    );

    let result = match cli.command {
        Command::Brief(args) => brief(&client, &config, args, status).await,
        Command::Schedules { action } => {
            let result = schedules(&client, action).await;
            status.shutdown().await;
            result
        }
        Command::Watch => {
            let result = watch(&client).await;
            status.shutdown().await;
            result
        }
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}

async fn brief(
    client: &NewsClient,
    config: &ClientConfig,
    args: BriefArgs,
    mut status: StatusHandle,
) -> Result<()> {
    let mut preferences = config.preferences.clone();
    if let Some(lang) = args.lang {
        preferences.language = lang;
    }
    preferences.length = args.length.into();
    preferences.voice = args.voice.or(preferences.voice);
    client.fetcher().set_preferences(preferences);
    client.fetcher().select_topics(&args.topics);

    let mut fetch = tokio::spawn({
        let client = client.clone();
        async move { client.fetch().await }
    });
    let outcome = tokio::select! {
        outcome = &mut fetch => outcome?,
        _ = tokio::signal::ctrl_c() => {
            client.cancel();
            fetch.await?
        }
    };

    // let the status line finish before printing below it
    let _ = tokio::time::timeout(Duration::from_secs(1), &mut status.settled_rx).await;

    let result = match outcome {
        FetchOutcome::Published(session) => {
            println!("{}", style("─".repeat(60)).dim());
            println!("{}", format_session_readable(&session));
            println!("{}", style("─".repeat(60)).dim());

            rate(client, &args.like, &args.dislike, args.comment.as_deref()).await;
            if args.play {
                listen(client).await;
            }
            Ok(())
        }
        FetchOutcome::Failed(e) => Err(e.into()),
        FetchOutcome::Cancelled => Ok(()),
        FetchOutcome::Rejected(FetchRejection::NoTopics) => Err(anyhow::anyhow!("no topics given")),
        FetchOutcome::Rejected(rejection) => {
            Err(anyhow::anyhow!("fetch rejected: {rejection:?}"))
        }
    };

    status.shutdown().await;
    result
}

async fn rate(client: &NewsClient, likes: &[String], dislikes: &[String], comment: Option<&str>) {
    let ratings = likes
        .iter()
        .map(|t| (t, Reaction::Like))
        .chain(dislikes.iter().map(|t| (t, Reaction::Dislike)));

    for (topic, reaction) in ratings {
        let feedback = client.feedback();
        let rated = feedback.set_reaction(topic, reaction).and_then(|_| {
            if let Some(comment) = comment {
                feedback.set_comment(topic, comment)?;
            }
            Ok(())
        });
        let result = match rated {
            Ok(()) => feedback.submit(topic, comment).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            eprintln!("{} {}", style("!").yellow().bold(), e);
        }
    }
}

fn topic_bar(topic: &str, duration: f64) -> ProgressBar {
    let pb = ProgressBar::new(duration.max(0.0).ceil() as u64);
    let style = ProgressStyle::default_bar()
        .template("{msg:<20} [{bar:30.cyan/blue}] {prefix}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    pb.set_style(style);
    pb.set_message(topic.to_string());
    pb
}

/// Plays the displayed session from its first topic until the last one finishes, a topic
/// without audio stops auto-advance, or Ctrl-C.
async fn listen(client: &NewsClient) {
    let Some(Ok(())) = client.play_topic(0, true).await else {
        return;
    };
    let Some(session) = client.fetcher().current_session() else {
        return;
    };

    let mut ctrl_c = pin!(tokio::signal::ctrl_c());
    let mut interval = tokio::time::interval(Duration::from_millis(250));
    let mut bar: Option<(usize, ProgressBar)> = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = interval.tick() => {}
        }

        let state = client.playback().state();
        if bar.as_ref().map(|(index, _)| *index) != Some(state.current_topic_index) {
            if let Some((_, done)) = bar.take() {
                done.finish();
            }
            let topic = session
                .sections
                .get(state.current_topic_index)
                .map(|s| s.topic.as_str())
                .unwrap_or_default();
            bar = Some((state.current_topic_index, topic_bar(topic, state.duration_seconds)));
        }
        if let Some((_, pb)) = &bar {
            pb.set_position(state.position_seconds.max(0.0) as u64);
            pb.set_prefix(format!(
                "{} / {}",
                format_timestamp(state.position_seconds),
                format_timestamp(state.duration_seconds)
            ));
        }

        if !state.is_playing {
            break;
        }
    }

    if let Some((_, pb)) = bar {
        pb.finish();
    }
    client.playback().unload();
}

async fn schedules(client: &NewsClient, action: ScheduleAction) -> Result<()> {
    let runner = client.schedules();
    match action {
        ScheduleAction::List => {
            let definitions = runner.refresh().await;
            if definitions.is_empty() {
                println!("{}", style("No schedules").dim());
            }
            for definition in &definitions {
                println!(
                    "{}  {}",
                    style(&definition.id).dim(),
                    format_schedule_line(definition)
                );
            }
        }
        ScheduleAction::Add {
            name,
            time,
            days,
            topics,
        } => {
            let mut draft = ScheduleDefinition::new("", name, time);
            draft.topics = topics;
            draft.days_of_week = days;
            let created = runner.create_schedule(&draft).await?;
            println!(
                "{} Created {} {}",
                style("✓").green().bold(),
                format_schedule_line(&created),
                style(&created.id).dim()
            );
        }
        ScheduleAction::Remove { id } => {
            runner.delete_schedule(&id).await?;
            println!("{} Removed {}", style("✓").green().bold(), id);
        }
    }
    Ok(())
}

async fn watch(client: &NewsClient) -> Result<()> {
    let runner = client.schedules();
    runner.on_foreground().await;

    let enabled = runner.definitions().iter().filter(|d| d.enabled).count();
    println!(
        "{} Watching {} schedule(s), Ctrl-C to stop",
        style("✓").green().bold(),
        enabled
    );

    runner.start();
    tokio::signal::ctrl_c().await?;
    runner.stop();
    client.cancel();
    Ok(())
}
