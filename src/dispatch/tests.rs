//! Dispatcher tests: routing, pending-request lifecycle, rehydration and persistence.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{Notify, mpsc};

use super::*;
use crate::backend::BackendError;
use crate::config::OrchestratorConfig;
use crate::persistence::{MemoryStore, PendingMap, PendingSnapshot};
use crate::polling::BackoffConfig;
use crate::test_utils::{ScriptedBackend, resolved_status};
use crate::types::{Feature, JobEvent, JobIds, JobMeta, JobRequest, UiKey};

fn config() -> OrchestratorConfig {
    OrchestratorConfig::new().with_backoff(BackoffConfig::new(
        Duration::from_millis(10),
        1.5,
        Duration::from_millis(50),
    ))
}

fn dispatcher(
    backend: Arc<ScriptedBackend>,
) -> (JobDispatcher<ScriptedBackend>, mpsc::Receiver<Action>) {
    let (tx, rx) = mpsc::channel(64);
    (JobDispatcher::new(backend, config(), tx), rx)
}

fn job(key: &str) -> JobEvent {
    JobEvent::new(JobMeta::new(key, "ETL"), JobRequest::new())
}

fn etl() -> Feature {
    Feature::from("ETL")
}

/// Receives actions until `count` terminal lifecycle actions have arrived.
async fn until_terminals(rx: &mut mpsc::Receiver<Action>, count: usize) -> Vec<Action> {
    let mut actions = Vec::new();
    let mut seen = 0;
    while seen < count {
        let action = rx.recv().await.expect("pipeline closed early");
        if action.kind.is_terminal() {
            seen += 1;
        }
        actions.push(action);
    }
    actions
}

/// Receives actions until one with the given type arrives.
async fn until_kind(rx: &mut mpsc::Receiver<Action>, name: &str) -> Vec<Action> {
    let mut actions = Vec::new();
    loop {
        let action = rx.recv().await.expect("pipeline closed early");
        let done = action.kind.name() == name;
        actions.push(action);
        if done {
            return actions;
        }
    }
}

fn names(actions: &[Action]) -> Vec<&'static str> {
    actions.iter().map(|a| a.kind.name()).collect()
}

// ─── Routing ──────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn fetch_runs_job_and_relays_lifecycle() {
    let backend = Arc::new(ScriptedBackend::new().with_statuses(vec![Ok(resolved_status())]));
    let (dispatcher, mut rx) = dispatcher(backend);

    dispatcher.handle(Action::fetch(job("a"))).await.unwrap();
    let actions = until_terminals(&mut rx, 1).await;

    assert_eq!(
        names(&actions),
        vec!["FETCH", "POLLING_START", "POLLING_END", "POLLING_RESOLVED"]
    );
    match &actions[3].kind {
        ActionKind::PollingResolved(event) => {
            assert_eq!(event.request.data, Some(json!({ "value": 42 })));
        }
        other => panic!("Expected PollingResolved, got {:?}", other),
    }
    assert!(dispatcher.tracker().snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_fetch_becomes_action_error() {
    let backend = Arc::new(ScriptedBackend::new());
    let (dispatcher, mut rx) = dispatcher(Arc::clone(&backend));
    let action = Action::new(
        "ETL",
        ActionKind::Fetch(CommandEvent {
            meta: CommandMeta::new("a", "ETL"),
            request: None,
        }),
    );

    dispatcher.handle(action).await.unwrap();

    let forwarded = rx.recv().await.unwrap();
    match forwarded.kind {
        ActionKind::ActionError(failure) => {
            assert_eq!(failure.action, "FETCH");
            assert_eq!(failure.message, ValidationError::MissingRequest.to_string());
        }
        other => panic!("Expected ActionError, got {:?}", other),
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(backend.instantiate_calls(), 0);
    assert!(dispatcher.tracker().snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn resume_without_job_id_is_rejected() {
    let (dispatcher, mut rx) = dispatcher(Arc::new(ScriptedBackend::new()));

    dispatcher.handle(Action::resume(job("a"))).await.unwrap();

    let forwarded = rx.recv().await.unwrap();
    assert_eq!(forwarded.kind.name(), "ACTION_ERROR");
}

#[tokio::test(start_paused = true)]
async fn other_actions_are_forwarded_unchanged() {
    let (dispatcher, mut rx) = dispatcher(Arc::new(ScriptedBackend::new()));
    let notice = Action::notice(etl(), Notice::info(UiKey::from("a"), "hello"));

    dispatcher.handle(notice.clone()).await.unwrap();

    assert_eq!(rx.recv().await.unwrap(), notice);
}

#[tokio::test(start_paused = true)]
async fn closed_pipeline_is_an_error() {
    let (dispatcher, rx) = dispatcher(Arc::new(ScriptedBackend::new()));
    drop(rx);

    let result = dispatcher.handle(Action::fetch(job("a"))).await;

    assert!(matches!(result, Err(DispatchError::PipelineClosed)));
    assert!(dispatcher.tracker().snapshot().is_empty());
    assert_eq!(dispatcher.active_jobs(), 0);
}

#[tokio::test(start_paused = true)]
async fn fetch_with_blank_feature_is_rejected() {
    let backend = Arc::new(ScriptedBackend::new());
    let (dispatcher, mut rx) = dispatcher(Arc::clone(&backend));

    dispatcher
        .handle(Action::fetch(JobEvent::new(JobMeta::new("a", ""), JobRequest::new())))
        .await
        .unwrap();

    let forwarded = rx.recv().await.unwrap();
    match forwarded.kind {
        ActionKind::ActionError(failure) => {
            assert_eq!(failure.message, ValidationError::MissingFeature.to_string());
        }
        other => panic!("Expected ActionError, got {:?}", other),
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(backend.instantiate_calls(), 0);
    assert!(dispatcher.tracker().snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_job_is_followed_by_error_notice() {
    let backend = Arc::new(
        ScriptedBackend::new().with_instantiations(vec![Err(BackendError::new("quota exceeded"))]),
    );
    let (dispatcher, mut rx) = dispatcher(backend);

    dispatcher.handle(Action::fetch(job("a"))).await.unwrap();
    let mut actions = until_terminals(&mut rx, 1).await;
    actions.push(rx.recv().await.unwrap());

    assert_eq!(names(&actions), vec!["FETCH", "POLLING_ERROR", "NOTICE"]);
    match &actions[2].kind {
        ActionKind::Notice(notice) => {
            assert_eq!(notice.level, NoticeLevel::Error);
            assert!(notice.message.contains("quota exceeded"));
        }
        other => panic!("Expected Notice, got {:?}", other),
    }
    assert!(dispatcher.tracker().snapshot().is_empty());
}

// ─── Cancellation and replacement ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn cancel_closes_the_job_and_drops_its_record() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(ScriptedBackend::new().with_poll_gate(gate));
    let (dispatcher, mut rx) = dispatcher(Arc::clone(&backend));

    dispatcher.handle(Action::fetch(job("a"))).await.unwrap();
    until_kind(&mut rx, "POLLING_START").await;
    assert!(dispatcher.tracker().contains(&etl(), &UiKey::from("a")));

    dispatcher
        .handle(Action::cancel(JobMeta::new("a", "ETL")))
        .await
        .unwrap();

    assert_eq!(rx.recv().await.unwrap().kind.name(), "CANCEL");
    assert!(!dispatcher.tracker().contains(&etl(), &UiKey::from("a")));

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(backend.cancelled(), vec![JobIds::new("J1", "P1")]);
    assert_eq!(dispatcher.active_jobs(), 0);
}

#[tokio::test(start_paused = true)]
async fn second_fetch_for_same_key_replaces_the_first() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(ScriptedBackend::new().with_poll_gate(gate));
    let (dispatcher, mut rx) = dispatcher(Arc::clone(&backend));

    dispatcher.handle(Action::fetch(job("a"))).await.unwrap();
    until_kind(&mut rx, "POLLING_START").await;

    let second = JobEvent::new(
        JobMeta::new("a", "ETL"),
        JobRequest::new().with_params(json!({ "run": 2 })),
    );
    dispatcher.handle(Action::fetch(second)).await.unwrap();
    let actions = until_kind(&mut rx, "POLLING_START").await;
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(names(&actions), vec!["FETCH", "POLLING_START"]);
    assert_eq!(dispatcher.active_jobs(), 1);
    assert_eq!(backend.instantiate_calls(), 2);
    assert_eq!(backend.cancelled().len(), 1);

    let record = dispatcher.tracker().get(&etl(), &UiKey::from("a")).unwrap();
    assert_eq!(record.event.request.params, Some(json!({ "run": 2 })));
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn cancel_naming_only_the_ui_key_cancels_the_job() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(ScriptedBackend::new().with_poll_gate(gate));
    let (dispatcher, mut rx) = dispatcher(Arc::clone(&backend));

    dispatcher.handle(Action::fetch(job("a"))).await.unwrap();
    until_kind(&mut rx, "POLLING_START").await;

    let cancel: Action = serde_json::from_value(json!({
        "feature": "ETL",
        "kind": { "type": "CANCEL", "event": { "ui_key": "a" } }
    }))
    .unwrap();
    dispatcher.handle(cancel).await.unwrap();

    assert_eq!(rx.recv().await.unwrap().kind.name(), "CANCEL");
    assert!(!dispatcher.tracker().contains(&etl(), &UiKey::from("a")));

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(backend.cancelled(), vec![JobIds::new("J1", "P1")]);
    assert_eq!(dispatcher.active_jobs(), 0);
}

// ─── Rehydration and persistence ──────────────────────────────────────────────

fn pending_snapshot(events: Vec<JobEvent>) -> PendingSnapshot {
    let mut map = PendingMap::new();
    for event in events {
        let record = PendingRecord::new(event);
        map.entry(record.feature.clone())
            .or_default()
            .insert(record.event.meta.ui_key.clone(), record);
    }
    PendingSnapshot::new(map)
}

#[tokio::test(start_paused = true)]
async fn rehydration_resumes_each_pending_job_independently() {
    let backend = Arc::new(
        ScriptedBackend::new().with_statuses(vec![Ok(resolved_status()), Ok(resolved_status())]),
    );
    let (dispatcher, mut rx) = dispatcher(Arc::clone(&backend));
    let snapshot = pending_snapshot(vec![
        JobEvent::new(JobMeta::new("a", "ETL"), JobRequest::for_job(JobIds::new("J-a", "P-a"))),
        JobEvent::new(JobMeta::new("b", "ETL"), JobRequest::for_job(JobIds::new("J-b", "P-b"))),
    ]);

    let resumed = dispatcher.rehydrate(&snapshot).await.unwrap();
    let actions = until_terminals(&mut rx, 2).await;

    assert_eq!(resumed, 2);
    assert_eq!(&names(&actions)[..4], &["NOTICE", "FETCH", "NOTICE", "FETCH"]);
    assert_eq!(backend.instantiate_calls(), 0);

    for key in ["a", "b"] {
        let resolved: Vec<_> = actions
            .iter()
            .filter_map(|a| match &a.kind {
                ActionKind::PollingResolved(event) if event.meta.ui_key.as_str() == key => {
                    Some(event)
                }
                _ => None,
            })
            .collect();
        assert_eq!(resolved.len(), 1, "ui_key {}", key);
        assert_eq!(
            resolved[0].request.job_id.as_ref().map(|id| id.as_str()),
            Some(format!("J-{}", key).as_str())
        );
    }
    assert!(dispatcher.tracker().snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn resumed_job_after_polling_goes_straight_to_result() {
    let backend = Arc::new(ScriptedBackend::new());
    let (dispatcher, mut rx) = dispatcher(Arc::clone(&backend));
    let snapshot = pending_snapshot(vec![JobEvent::new(
        JobMeta::new("a", "ETL"),
        JobRequest::for_job(JobIds::new("J1", "P1")).with_polling_done(true),
    )]);

    dispatcher.rehydrate(&snapshot).await.unwrap();
    let actions = until_terminals(&mut rx, 1).await;

    assert_eq!(names(&actions), vec!["NOTICE", "FETCH", "POLLING_RESOLVED"]);
    assert_eq!(backend.poll_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn persister_writes_pending_records_until_they_finish() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_statuses(vec![Ok(resolved_status())])
            .with_poll_gate(Arc::clone(&gate)),
    );
    let (dispatcher, mut rx) = dispatcher(backend);
    let store = Arc::new(MemoryStore::new());
    dispatcher.spawn_persister(Arc::clone(&store));

    dispatcher.handle(Action::fetch(job("a"))).await.unwrap();
    until_kind(&mut rx, "POLLING_START").await;
    tokio::time::sleep(Duration::from_millis(1)).await;

    let saved = PendingSnapshot::load_from(store.as_ref()).await.unwrap();
    let record = saved.records().next().expect("record persisted");
    assert_eq!(record.event.request.ids(), Some(JobIds::new("J1", "P1")));

    gate.notify_one();
    until_terminals(&mut rx, 1).await;
    tokio::time::sleep(Duration::from_millis(1)).await;

    let saved = PendingSnapshot::load_from(store.as_ref()).await.unwrap();
    assert!(saved.is_empty());
}
