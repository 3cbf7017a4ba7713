//! Per-topic reactions, comments and the exactly-once submission of them.
//!
//! Entries are keyed by `(session id, topic)`. Loading another session switches which entries the
//! topic-level accessors see; entries of earlier sessions stay in memory untouched.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::FeedbackError,
    events::EventBus,
    notifications::FeedbackSubmitted,
    service::RemoteNewsService,
    store::PersistentStore,
    types::{FeedbackEntry, FeedbackSubmission, Reaction, Session, TopicKey},
};

/// Persisted feedback of one session. `submitting` is deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackBlob {
    #[serde(default)]
    pub topic_feedback: BTreeMap<String, Reaction>,
    #[serde(default)]
    pub expanded_topic: Option<String>,
    #[serde(default)]
    pub topic_comments: BTreeMap<String, String>,
    #[serde(default)]
    pub submitted_topics: BTreeSet<String>,
}

pub fn storage_key(session_id: &str) -> String {
    format!("feedback.{session_id}")
}

#[derive(Clone)]
pub struct FeedbackCoordinator {
    inner: Arc<FeedbackInner>,
}

struct FeedbackInner {
    service: Arc<dyn RemoteNewsService>,
    store: Arc<dyn PersistentStore>,
    state: Mutex<FeedbackState>,
    bus: Option<EventBus>,
}

#[derive(Default)]
struct FeedbackState {
    session: Option<Arc<Session>>,
    entries: HashMap<TopicKey, FeedbackEntry>,
    expanded: Option<TopicKey>,
    load_generation: u64,
}

impl FeedbackState {
    fn active(&self) -> Result<&Arc<Session>, FeedbackError> {
        self.session.as_ref().ok_or(FeedbackError::NoActiveSession)
    }

    fn key_for(&self, topic: &str) -> Result<TopicKey, FeedbackError> {
        let session = self.active()?;
        if session.section(topic).is_none() {
            return Err(FeedbackError::UnknownTopic {
                session_id: session.id.clone(),
                topic: topic.to_string(),
            });
        }
        Ok(session.key_for(topic))
    }

    /// The entry for `key`, created on first interaction, if it still accepts edits.
    fn editable(&mut self, key: &TopicKey) -> Result<&mut FeedbackEntry, FeedbackError> {
        let entry = self.entries.entry(key.clone()).or_default();
        if entry.submitted {
            return Err(FeedbackError::AlreadySubmitted {
                topic: key.topic.clone(),
            });
        }
        if entry.submitting {
            return Err(FeedbackError::SubmissionInFlight {
                topic: key.topic.clone(),
            });
        }
        Ok(entry)
    }

    fn blob_for(&self, session_id: &str) -> FeedbackBlob {
        let mut blob = FeedbackBlob::default();
        for (key, entry) in self.entries.iter().filter(|(k, _)| k.session_id == session_id) {
            if !entry.reaction.is_none() {
                blob.topic_feedback.insert(key.topic.clone(), entry.reaction);
            }
            if let Some(comment) = &entry.comment {
                blob.topic_comments.insert(key.topic.clone(), comment.clone());
            }
            if entry.submitted {
                blob.submitted_topics.insert(key.topic.clone());
            }
        }
        blob.expanded_topic = self
            .expanded
            .as_ref()
            .filter(|k| k.session_id == session_id)
            .map(|k| k.topic.clone());
        blob
    }

    fn restore(&mut self, session_id: &str, blob: FeedbackBlob) {
        let topics: BTreeSet<&String> = blob
            .topic_feedback
            .keys()
            .chain(blob.topic_comments.keys())
            .chain(blob.submitted_topics.iter())
            .collect();

        for topic in topics {
            let key = TopicKey::new(session_id, topic.as_str());
            if self.entries.get(&key).is_some_and(|e| e.submitting) {
                continue;
            }
            self.entries.insert(
                key,
                FeedbackEntry {
                    reaction: blob.topic_feedback.get(topic).copied().unwrap_or_default(),
                    comment: blob.topic_comments.get(topic).cloned(),
                    submitted: blob.submitted_topics.contains(topic),
                    submitting: false,
                },
            );
        }
    }
}

impl FeedbackCoordinator {
    pub fn new(
        service: Arc<dyn RemoteNewsService>,
        store: Arc<dyn PersistentStore>,
        bus: Option<EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(FeedbackInner {
                service,
                store,
                state: Mutex::new(FeedbackState::default()),
                bus,
            }),
        }
    }

    /// Makes `session` the active one and restores its persisted feedback. A store that cannot
    /// be read yields empty feedback.
    pub async fn load_for_session(&self, session: Arc<Session>) {
        let generation = {
            let mut st = self.inner.lock();
            st.load_generation += 1;
            st.load_generation
        };

        let blob = match self.inner.store.get(&storage_key(&session.id)).await {
            Ok(Some(bytes)) => {
                serde_json::from_slice::<FeedbackBlob>(&bytes).unwrap_or_else(|e| {
                    tracing::warn!(
                        session_id = %session.id,
                        error = %e,
                        "discarding unreadable feedback"
                    );
                    FeedbackBlob::default()
                })
            }
            Ok(None) => FeedbackBlob::default(),
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "failed to read feedback");
                FeedbackBlob::default()
            }
        };

        let mut st = self.inner.lock();
        let expanded = blob
            .expanded_topic
            .as_deref()
            .filter(|topic| session.section(topic).is_some())
            .map(|topic| session.key_for(topic));
        st.restore(&session.id, blob);

        if st.load_generation != generation {
            tracing::debug!(session_id = %session.id, "feedback load overtaken by a newer session");
            return;
        }
        tracing::debug!(session_id = %session.id, "feedback loaded");
        st.expanded = expanded;
        st.session = Some(session);
    }

    /// Selects `reaction` for `topic` and opens its comment editor. Selecting the current
    /// reaction again clears reaction and comment and closes the editor.
    pub fn set_reaction(
        &self,
        topic: &str,
        reaction: Reaction,
    ) -> Result<FeedbackEntry, FeedbackError> {
        let mut st = self.inner.lock();
        let key = st.key_for(topic)?;
        let entry = st.editable(&key)?;

        let deselect = reaction.is_none() || entry.reaction == reaction;
        if deselect {
            entry.reaction = Reaction::None;
            entry.comment = None;
        } else {
            entry.reaction = reaction;
        }
        let entry = entry.clone();

        if deselect {
            if st.expanded.as_ref() == Some(&key) {
                st.expanded = None;
            }
        } else {
            st.expanded = Some(key);
        }
        Ok(entry)
    }

    /// Sets the draft comment; a blank comment clears it.
    pub fn set_comment(&self, topic: &str, comment: &str) -> Result<(), FeedbackError> {
        let mut st = self.inner.lock();
        let key = st.key_for(topic)?;
        st.editable(&key)?.comment = non_blank(comment);
        Ok(())
    }

    pub fn expand(&self, topic: &str) -> Result<(), FeedbackError> {
        let mut st = self.inner.lock();
        let key = st.key_for(topic)?;
        st.editable(&key)?;
        st.expanded = Some(key);
        Ok(())
    }

    pub fn collapse(&self) {
        self.inner.lock().expanded = None;
    }

    /// Sends the topic's reaction once for every article of the topic. Concurrent calls for
    /// the same topic are rejected while one is in flight; a failed batch can be retried.
    pub async fn submit(&self, topic: &str, comment: Option<&str>) -> Result<(), FeedbackError> {
        let (session, key, reaction, batch) = {
            let mut st = self.inner.lock();
            let session = Arc::clone(st.active()?);
            let key = st.key_for(topic)?;

            let Some(entry) = st.entries.get_mut(&key) else {
                return Err(FeedbackError::NoReaction {
                    topic: topic.to_string(),
                });
            };
            if entry.submitted {
                return Err(FeedbackError::AlreadySubmitted {
                    topic: topic.to_string(),
                });
            }
            if entry.submitting {
                return Err(FeedbackError::SubmissionInFlight {
                    topic: topic.to_string(),
                });
            }
            if entry.reaction.is_none() {
                return Err(FeedbackError::NoReaction {
                    topic: topic.to_string(),
                });
            }

            entry.comment = comment.and_then(non_blank);
            entry.submitting = true;

            let reaction = entry.reaction;
            let batch = build_batch(&session, topic, reaction, entry.comment.clone());
            (session, key, reaction, batch)
        };

        for submission in &batch {
            if let Err(e) = self.inner.service.submit_feedback(submission).await {
                if let Some(entry) = self.inner.lock().entries.get_mut(&key) {
                    entry.submitting = false;
                }
                tracing::warn!(
                    %key,
                    article_id = %submission.article_id,
                    error = %e,
                    "feedback submission failed"
                );
                return Err(FeedbackError::Submission {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        let blob = {
            let mut st = self.inner.lock();
            if let Some(entry) = st.entries.get_mut(&key) {
                entry.submitting = false;
                entry.submitted = true;
            }
            if st.expanded.as_ref() == Some(&key) {
                st.expanded = None;
            }
            st.blob_for(&session.id)
        };

        tracing::info!(%key, ?reaction, articles = batch.len(), "feedback submitted");
        self.persist(&session.id, &blob).await;
        if let Some(bus) = &self.inner.bus {
            bus.emit(FeedbackSubmitted::new(key, reaction, batch.len()));
        }
        Ok(())
    }

    /// Submits the reaction without a comment.
    pub async fn skip(&self, topic: &str) -> Result<(), FeedbackError> {
        self.submit(topic, None).await
    }

    /// Entry of `topic` in the active session.
    pub fn entry(&self, topic: &str) -> Option<FeedbackEntry> {
        let st = self.inner.lock();
        let session = st.session.as_ref()?;
        st.entries.get(&session.key_for(topic)).cloned()
    }

    pub fn entry_for(&self, key: &TopicKey) -> Option<FeedbackEntry> {
        self.inner.lock().entries.get(key).cloned()
    }

    pub fn expanded_topic(&self) -> Option<String> {
        let st = self.inner.lock();
        let session = st.session.as_ref()?;
        st.expanded
            .as_ref()
            .filter(|k| k.session_id == session.id)
            .map(|k| k.topic.clone())
    }

    pub fn submitted_topics(&self) -> BTreeSet<String> {
        let st = self.inner.lock();
        let Some(session) = st.session.as_ref() else {
            return BTreeSet::new();
        };
        st.entries
            .iter()
            .filter(|(k, e)| k.session_id == session.id && e.submitted)
            .map(|(k, _)| k.topic.clone())
            .collect()
    }

    pub fn active_session_id(&self) -> Option<String> {
        self.inner.lock().session.as_ref().map(|s| s.id.clone())
    }

    /// The persisted shape of a session's feedback.
    pub fn blob_for(&self, session_id: &str) -> FeedbackBlob {
        self.inner.lock().blob_for(session_id)
    }

    async fn persist(&self, session_id: &str, blob: &FeedbackBlob) {
        let bytes = match serde_json::to_vec(blob) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "failed to encode feedback");
                return;
            }
        };
        if let Err(e) = self.inner.store.set(&storage_key(session_id), bytes).await {
            tracing::warn!(session_id, error = %e, "failed to persist feedback");
        }
    }
}

impl FeedbackInner {
    fn lock(&self) -> MutexGuard<'_, FeedbackState> {
        self.state.lock().expect("FeedbackCoordinator state poisoned")
    }
}

fn build_batch(
    session: &Session,
    topic: &str,
    reaction: Reaction,
    comment: Option<String>,
) -> Vec<FeedbackSubmission> {
    session
        .section(topic)
        .map(|section| section.articles.as_slice())
        .unwrap_or_default()
        .iter()
        .map(|article| FeedbackSubmission {
            article_id: article.id.clone(),
            url: article.url.clone(),
            title: article.title.clone(),
            source: article.source.clone(),
            topic: topic.to_string(),
            reaction,
            comment: comment.clone(),
        })
        .collect()
}

fn non_blank(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
