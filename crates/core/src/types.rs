use std::{collections::BTreeSet, fmt};

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioRef(pub String);

impl AudioRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AudioRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub summary_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSection {
    pub topic: String,
    #[serde(default)]
    pub summary_text: String,
    #[serde(default)]
    pub articles: Vec<Article>,
    #[serde(default)]
    pub audio_ref: Option<AudioRef>,
}

/// Result of one successful fetch. Published behind an `Arc` and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub summary_text: String,
    #[serde(default, alias = "topicSections")]
    pub sections: Vec<TopicSection>,
    #[serde(default)]
    pub articles: Vec<Article>,
    #[serde(default)]
    pub audio_ref: Option<AudioRef>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn section(&self, topic: &str) -> Option<&TopicSection> {
        self.sections.iter().find(|s| s.topic == topic)
    }

    pub fn section_index(&self, topic: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.topic == topic)
    }

    /// Topic audio, falling back to the session-level audio.
    pub fn audio_for<'a>(&'a self, section: &'a TopicSection) -> Option<&'a AudioRef> {
        section.audio_ref.as_ref().or(self.audio_ref.as_ref())
    }

    pub fn key_for(&self, topic: &str) -> TopicKey {
        TopicKey::new(&self.id, topic)
    }
}

/// `(session id, topic)`; the identity feedback and playback are keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TopicKey {
    pub session_id: String,
    pub topic: String,
}

impl TopicKey {
    pub fn new(session_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            topic: topic.into(),
        }
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session_id, self.topic)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FetchPhase {
    #[default]
    Idle,
    Gathering,
    Summarizing,
    Synthesizing,
}

impl FetchPhase {
    pub fn is_active(self) -> bool {
        self != FetchPhase::Idle
    }

    /// Next checkpoint of an in-flight fetch; `None` once synthesizing.
    pub fn next(self) -> Option<FetchPhase> {
        match self {
            FetchPhase::Idle => Some(FetchPhase::Gathering),
            FetchPhase::Gathering => Some(FetchPhase::Summarizing),
            FetchPhase::Summarizing => Some(FetchPhase::Synthesizing),
            FetchPhase::Synthesizing => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FetchPhase::Idle => "idle",
            FetchPhase::Gathering => "gathering sources",
            FetchPhase::Summarizing => "summarizing",
            FetchPhase::Synthesizing => "synthesizing audio",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryLength {
    Brief,
    #[default]
    Standard,
    Deep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchPreferences {
    pub language: String,
    #[serde(default)]
    pub length: SummaryLength,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

impl Default for FetchPreferences {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            length: SummaryLength::default(),
            voice: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub topics: BTreeSet<String>,
    pub preferences: FetchPreferences,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    #[default]
    None,
    Like,
    Dislike,
}

impl Reaction {
    pub fn is_none(self) -> bool {
        self == Reaction::None
    }
}

/// Per `(session, topic)` feedback. `submitting` is transient and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedbackEntry {
    pub reaction: Reaction,
    pub comment: Option<String>,
    pub submitted: bool,
    pub submitting: bool,
}

/// One per-article feedback call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSubmission {
    pub article_id: String,
    pub url: String,
    pub title: String,
    pub source: String,
    pub topic: String,
    pub reaction: Reaction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackState {
    pub current_topic_index: usize,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub is_playing: bool,
    pub can_play: bool,
}

/// A recurring unattended fetch. Decoded leniently: unknown fields are ignored, renamed fields
/// are accepted through aliases and everything but `id` and `time` has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(
        alias = "timeOfDay",
        alias = "scheduledTime",
        serialize_with = "ser_time_of_day",
        deserialize_with = "de_time_of_day"
    )]
    pub time: NaiveTime,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default, alias = "custom_topics")]
    pub custom_topics: Vec<String>,
    #[serde(
        default,
        alias = "days",
        alias = "days_of_week",
        serialize_with = "ser_weekdays",
        deserialize_with = "de_weekdays"
    )]
    pub days_of_week: Vec<Weekday>,
    #[serde(default = "default_enabled", alias = "isEnabled")]
    pub enabled: bool,
    #[serde(
        default,
        alias = "last_run_at",
        alias = "lastRun",
        deserialize_with = "de_lenient_datetime"
    )]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "schemaVersion")]
    pub version: u32,
}

impl ScheduleDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, time: NaiveTime) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            time,
            topics: Vec::new(),
            custom_topics: Vec::new(),
            days_of_week: Vec::new(),
            enabled: true,
            last_run_at: None,
            version: 1,
        }
    }

    /// Empty means every day.
    pub fn runs_on(&self, day: Weekday) -> bool {
        self.days_of_week.is_empty() || self.days_of_week.contains(&day)
    }

    /// Union of `topics` and `custom_topics`, trimmed and de-duplicated.
    pub fn selection(&self) -> BTreeSet<String> {
        self.topics
            .iter()
            .chain(self.custom_topics.iter())
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn default_enabled() -> bool {
    true
}

fn ser_time_of_day<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&time.format("%H:%M").to_string())
}

fn de_time_of_day<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
    let raw = String::deserialize(d)?;
    parse_time_of_day(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid time of day: {raw}")))
}

pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

/// Sunday = 0 on the wire.
fn weekday_from_number(n: u64) -> Option<Weekday> {
    match n {
        0 | 7 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

fn ser_weekdays<S: Serializer>(days: &[Weekday], s: S) -> Result<S::Ok, S::Error> {
    let numbers: BTreeSet<u32> = days.iter().map(|d| d.num_days_from_sunday()).collect();
    numbers.serialize(s)
}

fn de_weekdays<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Weekday>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDay {
        Number(u64),
        Name(String),
    }

    let raw = Option::<Vec<RawDay>>::deserialize(d)?.unwrap_or_default();
    let mut days = Vec::new();
    for day in raw {
        let parsed = match day {
            RawDay::Number(n) => weekday_from_number(n),
            RawDay::Name(name) => name.trim().parse::<Weekday>().ok(),
        };
        match parsed {
            Some(day) if !days.contains(&day) => days.push(day),
            Some(_) => {}
            None => tracing::warn!("ignoring unrecognised schedule weekday"),
        }
    }
    Ok(days)
}

fn de_lenient_datetime<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.and_then(|s| {
        DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }))
}

/// Decodes a schedule listing, dropping records that do not decode instead of failing the list.
/// Accepts a bare array or an object wrapping it under `schedules`.
pub fn decode_schedule_list(value: serde_json::Value) -> Vec<ScheduleDefinition> {
    let records = match value {
        serde_json::Value::Array(records) => records,
        serde_json::Value::Object(mut obj) => match obj.remove("schedules") {
            Some(serde_json::Value::Array(records)) => records,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    records
        .into_iter()
        .filter_map(
            |record| match serde_json::from_value::<ScheduleDefinition>(record) {
                Ok(definition) => Some(definition),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed schedule record");
                    None
                }
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schedule_decodes_with_defaults_and_aliases() {
        let def: ScheduleDefinition = serde_json::from_value(json!({
            "id": "morning",
            "timeOfDay": "07:30",
            "custom_topics": ["rust"],
            "days": ["mon", 5],
            "lastRun": "not a date",
        }))
        .unwrap();

        assert_eq!(def.time, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert_eq!(def.custom_topics, vec!["rust".to_string()]);
        assert_eq!(def.days_of_week, vec![Weekday::Mon, Weekday::Fri]);
        assert!(def.enabled);
        assert_eq!(def.last_run_at, None);
        assert_eq!(def.name, "");
    }

    #[test]
    fn schedule_list_skips_malformed_records() {
        let list = decode_schedule_list(json!({
            "schedules": [
                {"id": "a", "time": "06:00"},
                {"id": "b"},
                {"id": "c", "time": "25:99"},
                {"id": "d", "time": "18:45:00", "enabled": false},
            ]
        }));

        let ids: Vec<_> = list.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d"]);
        assert!(!list[1].enabled);
    }

    #[test]
    fn selection_is_union_of_topics() {
        let mut def = ScheduleDefinition::new("x", "x", NaiveTime::MIN);
        def.topics = vec!["tech".into(), "sports".into()];
        def.custom_topics = vec![" tech ".into(), "".into(), "climate".into()];

        let selection: Vec<_> = def.selection().into_iter().collect();
        assert_eq!(selection, vec!["climate", "sports", "tech"]);
    }

    #[test]
    fn empty_days_means_every_day() {
        let def = ScheduleDefinition::new("x", "x", NaiveTime::MIN);
        assert!(def.runs_on(Weekday::Sun));
        assert!(def.runs_on(Weekday::Wed));
    }

    #[test]
    fn weekdays_serialize_sunday_first() {
        let mut def = ScheduleDefinition::new("x", "x", NaiveTime::from_hms_opt(9, 5, 0).unwrap());
        def.days_of_week = vec![Weekday::Sat, Weekday::Sun];
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["daysOfWeek"], json!([0, 6]));
        assert_eq!(value["time"], json!("09:05"));
    }

    #[test]
    fn session_falls_back_to_session_audio() {
        let session: Session = serde_json::from_value(json!({
            "id": "s1",
            "audioRef": "https://cdn/full.wav",
            "topicSections": [
                {"topic": "tech", "audioRef": "https://cdn/tech.wav"},
                {"topic": "sports"}
            ]
        }))
        .unwrap();

        let tech = &session.sections[0];
        let sports = &session.sections[1];
        assert_eq!(session.audio_for(tech).unwrap().as_str(), "https://cdn/tech.wav");
        assert_eq!(session.audio_for(sports).unwrap().as_str(), "https://cdn/full.wav");

        let detached: TopicSection =
            serde_json::from_value(json!({"topic": "world", "audioRef": "https://cdn/world.wav"}))
                .unwrap();
        let audio = session.audio_for(&detached);
        assert_eq!(audio.unwrap().as_str(), "https://cdn/world.wav");
    }
}
