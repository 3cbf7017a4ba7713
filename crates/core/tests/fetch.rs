mod common;

use std::collections::BTreeSet;

use common::{FakeService, drain, listener_bus, make_session, wait_until};
use newscast_core::{
    FetchError, FetchOrchestrator, FetchOutcome, FetchPhase, FetchPreferences, FetchRejection,
    events::downcast_ref,
    notifications::{FetchCancelled, PhaseChanged, SessionPublished},
};

fn topics<const N: usize>(names: [&str; N]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn assert_dirty_invariant(fetcher: &FetchOrchestrator) {
    let snapshot = fetcher.snapshot();
    assert_eq!(
        snapshot.is_dirty,
        snapshot.selected_topics != snapshot.last_fetched_topics,
        "selected={:?} last_fetched={:?}",
        snapshot.selected_topics,
        snapshot.last_fetched_topics
    );
}

#[tokio::test]
async fn dirty_follows_every_toggle() {
    let service = FakeService::new();
    let fetcher = FetchOrchestrator::new(service.clone(), None);

    for name in ["tech", "sports", "tech", "science", "sports"] {
        fetcher.toggle_topic(name);
        assert_dirty_invariant(&fetcher);
    }

    service.plan_reply(Ok(make_session("s1", &[("science", 1)])));
    assert!(matches!(fetcher.fetch().await, FetchOutcome::Published(_)));
    assert!(!fetcher.is_dirty());

    for name in ["tech", "tech", "science", "science", "world"] {
        fetcher.toggle_topic(name);
        assert_dirty_invariant(&fetcher);
    }
}

#[tokio::test]
async fn toggle_ignores_blank_names() {
    let fetcher = FetchOrchestrator::new(FakeService::new(), None);

    assert!(!fetcher.toggle_topic("   "));
    assert!(fetcher.selected_topics().is_empty());
    assert!(!fetcher.is_dirty());
}

#[tokio::test]
async fn fetch_without_topics_or_changes_is_a_no_op() {
    let service = FakeService::new();
    let fetcher = FetchOrchestrator::new(service.clone(), None);

    assert_eq!(
        fetcher.fetch().await,
        FetchOutcome::Rejected(FetchRejection::NoTopics)
    );

    fetcher.toggle_topic("tech");
    service.plan_reply(Ok(make_session("s1", &[("tech", 2)])));
    assert!(matches!(fetcher.fetch().await, FetchOutcome::Published(_)));

    assert_eq!(
        fetcher.fetch().await,
        FetchOutcome::Rejected(FetchRejection::NotDirty)
    );
    assert_eq!(service.fetch_count(), 1);
}

#[tokio::test]
async fn success_publishes_session_and_clears_dirty_and_error() {
    let service = FakeService::new();
    let fetcher = FetchOrchestrator::new(service.clone(), None);
    fetcher.set_preferences(FetchPreferences {
        language: "de".to_string(),
        ..FetchPreferences::default()
    });
    fetcher.select_topics(["tech", "sports"]);

    service.plan_reply(Err(FetchError::Network {
        reason: "offline".to_string(),
    }));
    assert!(matches!(fetcher.fetch().await, FetchOutcome::Failed(_)));
    assert!(fetcher.last_error().is_some());

    service.plan_reply(Ok(make_session("s1", &[("tech", 1), ("sports", 1)])));
    let FetchOutcome::Published(session) = fetcher.fetch().await else {
        panic!("expected a published session");
    };

    let snapshot = fetcher.snapshot();
    assert_eq!(session.id, "s1");
    assert_eq!(snapshot.current_session.map(|s| s.id.clone()), Some("s1".to_string()));
    assert_eq!(snapshot.last_fetched_topics, topics(["sports", "tech"]));
    assert!(!snapshot.is_dirty);
    assert_eq!(snapshot.last_error, None);
    assert_eq!(snapshot.phase, FetchPhase::Idle);

    let requests = service.fetch_requests.lock().unwrap();
    assert_eq!(requests[1].topics, topics(["sports", "tech"]));
    assert_eq!(requests[1].preferences.language, "de");
}

#[tokio::test]
async fn failure_keeps_previous_session() {
    let service = FakeService::new();
    let fetcher = FetchOrchestrator::new(service.clone(), None);
    fetcher.toggle_topic("tech");

    service.plan_reply(Ok(make_session("s1", &[("tech", 1)])));
    fetcher.fetch().await;

    fetcher.toggle_topic("sports");
    service.plan_reply(Err(FetchError::Server {
        status: 502,
        reason: "bad gateway".to_string(),
    }));
    let outcome = fetcher.fetch().await;

    assert!(matches!(outcome, FetchOutcome::Failed(FetchError::Server { status: 502, .. })));
    let snapshot = fetcher.snapshot();
    assert_eq!(snapshot.current_session.map(|s| s.id.clone()), Some("s1".to_string()));
    assert!(snapshot.is_dirty);
    assert_eq!(snapshot.phase, FetchPhase::Idle);
}

#[tokio::test]
async fn fetch_while_busy_is_rejected_without_a_second_call() {
    let service = FakeService::new();
    let reply = service.plan_fetch(vec![], true);
    let fetcher = FetchOrchestrator::new(service.clone(), None);
    fetcher.toggle_topic("tech");

    let first = tokio::spawn({
        let fetcher = fetcher.clone();
        async move { fetcher.fetch().await }
    });
    wait_until(|| fetcher.phase() == FetchPhase::Gathering).await;

    assert_eq!(
        fetcher.fetch().await,
        FetchOutcome::Rejected(FetchRejection::Busy)
    );
    assert_eq!(
        fetcher.fetch_selection(topics(["sports"])).await,
        FetchOutcome::Rejected(FetchRejection::Busy)
    );
    assert_eq!(service.fetch_count(), 1);
    assert_eq!(fetcher.phase(), FetchPhase::Gathering);
    assert_eq!(fetcher.selected_topics(), topics(["tech"]));
    assert!(fetcher.current_session().is_none());

    reply.send(Ok(make_session("s1", &[("tech", 1)]))).unwrap();
    assert!(matches!(first.await.unwrap(), FetchOutcome::Published(_)));
}

#[tokio::test]
async fn checkpoints_move_forward_one_phase_at_a_time() {
    let (bus, mut listener) = listener_bus(&[PhaseChanged::EVENT_TYPE]);
    let service = FakeService::new();
    let fetcher = FetchOrchestrator::new(service.clone(), Some(bus));
    fetcher.toggle_topic("tech");

    // jumps ahead, then reports stale phases
    let reply = service.plan_fetch(
        vec![
            FetchPhase::Synthesizing,
            FetchPhase::Summarizing,
            FetchPhase::Gathering,
            FetchPhase::Synthesizing,
        ],
        true,
    );
    reply.send(Ok(make_session("s1", &[("tech", 1)]))).unwrap();
    fetcher.fetch().await;

    let transitions: Vec<(FetchPhase, FetchPhase)> = drain(&mut listener)
        .await
        .iter()
        .map(|e| {
            let changed = downcast_ref::<PhaseChanged>(e).unwrap();
            (changed.from, changed.to)
        })
        .collect();

    assert_eq!(
        transitions,
        vec![
            (FetchPhase::Idle, FetchPhase::Gathering),
            (FetchPhase::Gathering, FetchPhase::Summarizing),
            (FetchPhase::Summarizing, FetchPhase::Synthesizing),
            (FetchPhase::Synthesizing, FetchPhase::Idle),
        ]
    );
}

#[tokio::test]
async fn cancel_returns_to_idle_without_an_error() {
    let (bus, mut listener) =
        listener_bus(&[FetchCancelled::EVENT_TYPE, SessionPublished::EVENT_TYPE]);
    let service = FakeService::new();
    let _reply = service.plan_fetch(vec![FetchPhase::Summarizing], true);
    let fetcher = FetchOrchestrator::new(service.clone(), Some(bus));
    fetcher.toggle_topic("tech");

    assert!(!fetcher.cancel());

    let pending = tokio::spawn({
        let fetcher = fetcher.clone();
        async move { fetcher.fetch().await }
    });
    wait_until(|| fetcher.phase() == FetchPhase::Summarizing).await;

    assert!(fetcher.cancel());
    assert_eq!(fetcher.phase(), FetchPhase::Idle);
    assert!(!fetcher.cancel());

    assert_eq!(pending.await.unwrap(), FetchOutcome::Cancelled);
    assert_eq!(fetcher.last_error(), None);
    assert!(fetcher.current_session().is_none());
    assert!(fetcher.is_dirty());

    let events = drain(&mut listener).await;
    assert_eq!(events.len(), 1);
    let cancelled = downcast_ref::<FetchCancelled>(&events[0]).unwrap();
    assert_eq!(cancelled.phase, FetchPhase::Summarizing);
}

#[tokio::test]
async fn cancelled_call_resolving_late_never_overwrites_the_newer_session() {
    let service = FakeService::new();
    let stale = service.plan_fetch(vec![], false);
    let fresh = service.plan_fetch(vec![], false);
    let fetcher = FetchOrchestrator::new(service.clone(), None);
    fetcher.select_topics(["tech"]);

    let first = tokio::spawn({
        let fetcher = fetcher.clone();
        async move { fetcher.fetch().await }
    });
    wait_until(|| service.fetch_count() == 1).await;
    assert!(fetcher.cancel());

    let second = tokio::spawn({
        let fetcher = fetcher.clone();
        async move { fetcher.fetch().await }
    });
    wait_until(|| service.fetch_count() == 2).await;

    fresh.send(Ok(make_session("s2", &[("tech", 1)]))).unwrap();
    let FetchOutcome::Published(published) = second.await.unwrap() else {
        panic!("newer fetch should publish");
    };
    assert_eq!(published.id, "s2");

    stale.send(Ok(make_session("s1", &[("tech", 1)]))).unwrap();
    assert_eq!(first.await.unwrap(), FetchOutcome::Cancelled);

    let snapshot = fetcher.snapshot();
    assert_eq!(snapshot.current_session.map(|s| s.id.clone()), Some("s2".to_string()));
    assert_eq!(snapshot.last_error, None);
    assert_eq!(snapshot.phase, FetchPhase::Idle);
}

#[tokio::test]
async fn cancelled_call_failing_late_leaves_no_error() {
    let service = FakeService::new();
    let stale = service.plan_fetch(vec![], false);
    let fetcher = FetchOrchestrator::new(service.clone(), None);
    fetcher.toggle_topic("tech");

    let pending = tokio::spawn({
        let fetcher = fetcher.clone();
        async move { fetcher.fetch().await }
    });
    wait_until(|| service.fetch_count() == 1).await;
    fetcher.cancel();

    stale
        .send(Err(FetchError::Network {
            reason: "reset".to_string(),
        }))
        .unwrap();

    assert_eq!(pending.await.unwrap(), FetchOutcome::Cancelled);
    assert_eq!(fetcher.last_error(), None);
}

#[tokio::test]
async fn reset_clears_selection_and_session_but_not_phase() {
    let service = FakeService::new();
    let fetcher = FetchOrchestrator::new(service.clone(), None);
    fetcher.toggle_topic("tech");
    service.plan_reply(Ok(make_session("s1", &[("tech", 1)])));
    fetcher.fetch().await;

    fetcher.reset_selection();
    let snapshot = fetcher.snapshot();
    assert!(snapshot.selected_topics.is_empty());
    assert!(snapshot.current_session.is_none());
    assert!(!snapshot.is_dirty);

    // the same topic as before is new again
    fetcher.toggle_topic("tech");
    assert!(fetcher.is_dirty());

    let _reply = service.plan_fetch(vec![], true);
    let pending = tokio::spawn({
        let fetcher = fetcher.clone();
        async move { fetcher.fetch().await }
    });
    wait_until(|| fetcher.phase() == FetchPhase::Gathering).await;

    fetcher.reset_selection();
    assert_eq!(fetcher.phase(), FetchPhase::Gathering);

    fetcher.cancel();
    assert_eq!(pending.await.unwrap(), FetchOutcome::Cancelled);
}

#[tokio::test]
async fn forced_fetch_ignores_dirty_state() {
    let service = FakeService::new();
    let fetcher = FetchOrchestrator::new(service.clone(), None);
    fetcher.toggle_topic("tech");
    service.plan_reply(Ok(make_session("s1", &[("tech", 1)])));
    fetcher.fetch().await;
    assert!(!fetcher.can_fetch());

    service.plan_reply(Ok(make_session("s2", &[("tech", 1)])));
    let outcome = fetcher.fetch_selection(topics(["tech"])).await;

    assert!(matches!(outcome, FetchOutcome::Published(s) if s.id == "s2"));
    assert_eq!(service.fetch_count(), 2);
}
