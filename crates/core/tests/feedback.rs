mod common;

use std::sync::Arc;

use common::{FakeService, make_session, wait_until};
use newscast_core::{
    FeedbackCoordinator, FeedbackError, FileStore, MemoryStore, PersistentStore, Reaction,
    feedback::{FeedbackBlob, storage_key},
};

async fn coordinator_with(
    service: &Arc<FakeService>,
    store: Arc<dyn PersistentStore>,
) -> FeedbackCoordinator {
    let feedback = FeedbackCoordinator::new(service.clone(), store, None);
    feedback
        .load_for_session(Arc::new(make_session("s1", &[("tech", 3), ("sports", 1)])))
        .await;
    feedback
}

#[tokio::test]
async fn reselecting_a_reaction_clears_it_and_collapses() {
    let service = FakeService::new();
    let feedback = coordinator_with(&service, Arc::new(MemoryStore::new())).await;

    let entry = feedback.set_reaction("tech", Reaction::Like).unwrap();
    assert_eq!(entry.reaction, Reaction::Like);
    assert_eq!(feedback.expanded_topic(), Some("tech".to_string()));
    feedback.set_comment("tech", "great").unwrap();

    let entry = feedback.set_reaction("tech", Reaction::Like).unwrap();
    assert_eq!(entry.reaction, Reaction::None);
    assert_eq!(entry.comment, None);
    assert_eq!(feedback.expanded_topic(), None);
    assert_eq!(service.submission_count(), 0);
}

#[tokio::test]
async fn switching_reaction_keeps_the_editor_open() {
    let service = FakeService::new();
    let feedback = coordinator_with(&service, Arc::new(MemoryStore::new())).await;

    feedback.set_reaction("tech", Reaction::Like).unwrap();
    feedback.set_reaction("sports", Reaction::Dislike).unwrap();
    assert_eq!(feedback.expanded_topic(), Some("sports".to_string()));

    let entry = feedback.set_reaction("tech", Reaction::Dislike).unwrap();
    assert_eq!(entry.reaction, Reaction::Dislike);
    assert_eq!(feedback.expanded_topic(), Some("tech".to_string()));
}

#[tokio::test]
async fn submit_sends_one_call_per_article() {
    let service = FakeService::new();
    let store = Arc::new(MemoryStore::new());
    let feedback = coordinator_with(&service, store.clone()).await;

    feedback.set_reaction("tech", Reaction::Dislike).unwrap();
    feedback.submit("tech", Some("too shallow")).await.unwrap();

    let submissions = service.submissions.lock().unwrap().clone();
    assert_eq!(submissions.len(), 3);
    for (i, submission) in submissions.iter().enumerate() {
        assert_eq!(submission.article_id, format!("s1-tech-{i}"));
        assert_eq!(submission.topic, "tech");
        assert_eq!(submission.reaction, Reaction::Dislike);
        assert_eq!(submission.comment.as_deref(), Some("too shallow"));
    }

    let entry = feedback.entry("tech").unwrap();
    assert!(entry.submitted);
    assert!(!entry.submitting);
    assert_eq!(feedback.expanded_topic(), None);

    let bytes = store.get(&storage_key("s1")).await.unwrap().unwrap();
    let blob: FeedbackBlob = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(blob.submitted_topics.len(), 1);
    assert!(blob.submitted_topics.contains("tech"));
    assert_eq!(blob.topic_feedback.get("tech"), Some(&Reaction::Dislike));
}

#[tokio::test]
async fn concurrent_submits_send_a_single_batch() {
    let service = FakeService::new();
    let gate = service.gate_feedback();
    let feedback = coordinator_with(&service, Arc::new(MemoryStore::new())).await;
    feedback.set_reaction("tech", Reaction::Like).unwrap();

    let first = tokio::spawn({
        let feedback = feedback.clone();
        async move { feedback.submit("tech", None).await }
    });
    wait_until(|| service.submission_count() == 1).await;

    let second = feedback.submit("tech", None).await;
    assert_eq!(
        second,
        Err(FeedbackError::SubmissionInFlight {
            topic: "tech".to_string()
        })
    );
    assert!(feedback.entry("tech").unwrap().submitting);

    gate.add_permits(3);
    first.await.unwrap().unwrap();

    assert_eq!(service.submission_count(), 3);
    assert!(feedback.entry("tech").unwrap().submitted);
}

#[tokio::test]
async fn submit_leaves_another_topics_editor_open() {
    let service = FakeService::new();
    let gate = service.gate_feedback();
    let feedback = coordinator_with(&service, Arc::new(MemoryStore::new())).await;
    feedback.set_reaction("tech", Reaction::Like).unwrap();

    let submitting = tokio::spawn({
        let feedback = feedback.clone();
        async move { feedback.submit("tech", None).await }
    });
    wait_until(|| service.submission_count() == 1).await;

    feedback.set_reaction("sports", Reaction::Dislike).unwrap();
    assert_eq!(feedback.expanded_topic(), Some("sports".to_string()));

    gate.add_permits(3);
    submitting.await.unwrap().unwrap();

    assert!(feedback.entry("tech").unwrap().submitted);
    assert_eq!(feedback.expanded_topic(), Some("sports".to_string()));
}

#[tokio::test]
async fn submitted_topic_rejects_further_changes() {
    let service = FakeService::new();
    let feedback = coordinator_with(&service, Arc::new(MemoryStore::new())).await;
    feedback.set_reaction("sports", Reaction::Like).unwrap();
    feedback.submit("sports", None).await.unwrap();
    let before = feedback.entry("sports");

    assert!(matches!(
        feedback.set_reaction("sports", Reaction::Dislike),
        Err(FeedbackError::AlreadySubmitted { .. })
    ));
    assert!(matches!(
        feedback.submit("sports", Some("again")).await,
        Err(FeedbackError::AlreadySubmitted { .. })
    ));
    assert!(matches!(
        feedback.set_comment("sports", "late"),
        Err(FeedbackError::AlreadySubmitted { .. })
    ));

    assert_eq!(feedback.entry("sports"), before);
    assert_eq!(service.submission_count(), 1);
}

#[tokio::test]
async fn failed_batch_stays_editable_and_unpersisted() {
    let service = FakeService::new();
    let store = Arc::new(MemoryStore::new());
    let feedback = coordinator_with(&service, store.clone()).await;
    feedback.set_reaction("tech", Reaction::Like).unwrap();
    service.fail_next_feedback(1);

    let err = feedback.submit("tech", Some("nice")).await.unwrap_err();
    assert!(matches!(err, FeedbackError::Submission { .. }));

    let entry = feedback.entry("tech").unwrap();
    assert!(!entry.submitted);
    assert!(!entry.submitting);
    assert_eq!(entry.reaction, Reaction::Like);
    assert!(store.is_empty());

    feedback.set_comment("tech", "very nice").unwrap();
    feedback.submit("tech", Some("very nice")).await.unwrap();
    assert!(feedback.entry("tech").unwrap().submitted);
    assert_eq!(service.submission_count(), 1 + 3);
}

#[tokio::test]
async fn submit_needs_a_reaction_and_a_known_topic() {
    let service = FakeService::new();
    let feedback = coordinator_with(&service, Arc::new(MemoryStore::new())).await;

    assert!(matches!(
        feedback.submit("tech", None).await,
        Err(FeedbackError::NoReaction { .. })
    ));
    assert!(matches!(
        feedback.set_reaction("weather", Reaction::Like),
        Err(FeedbackError::UnknownTopic { .. })
    ));

    let empty = FeedbackCoordinator::new(service.clone(), Arc::new(MemoryStore::new()), None);
    assert_eq!(
        empty.set_reaction("tech", Reaction::Like),
        Err(FeedbackError::NoActiveSession)
    );
    assert_eq!(service.submission_count(), 0);
}

#[tokio::test]
async fn skip_submits_without_a_comment() {
    let service = FakeService::new();
    let feedback = coordinator_with(&service, Arc::new(MemoryStore::new())).await;
    feedback.set_reaction("sports", Reaction::Dislike).unwrap();
    feedback.set_comment("sports", "draft").unwrap();

    feedback.skip("sports").await.unwrap();

    let submissions = service.submissions.lock().unwrap().clone();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].comment, None);
    assert_eq!(feedback.submitted_topics().len(), 1);
}

#[tokio::test]
async fn feedback_is_restored_per_session() {
    let service = FakeService::new();
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn PersistentStore> = Arc::new(FileStore::new(dir.path()));
    let feedback = coordinator_with(&service, store.clone()).await;
    feedback.set_reaction("tech", Reaction::Like).unwrap();
    feedback.submit("tech", Some("good")).await.unwrap();

    // a newer session starts clean
    feedback
        .load_for_session(Arc::new(make_session("s2", &[("tech", 1)])))
        .await;
    assert!(feedback.submitted_topics().is_empty());
    assert_eq!(feedback.entry("tech"), None);

    // a fresh coordinator re-opens the first session from disk
    let reopened = FeedbackCoordinator::new(service.clone(), store, None);
    reopened
        .load_for_session(Arc::new(make_session("s1", &[("tech", 3), ("sports", 1)])))
        .await;

    let entry = reopened.entry("tech").unwrap();
    assert_eq!(entry.reaction, Reaction::Like);
    assert_eq!(entry.comment.as_deref(), Some("good"));
    assert!(entry.submitted);
    assert!(!entry.submitting);
    assert_eq!(reopened.active_session_id(), Some("s1".to_string()));
}

#[tokio::test]
async fn unreadable_blob_starts_empty() {
    let service = FakeService::new();
    let store = Arc::new(MemoryStore::new());
    store
        .set(&storage_key("s1"), b"{not json".to_vec())
        .await
        .unwrap();

    let feedback = coordinator_with(&service, store).await;

    assert!(feedback.submitted_topics().is_empty());
    assert!(feedback.set_reaction("tech", Reaction::Like).is_ok());
}
