use std::sync::Arc;

use fleet_core::classifier::Classifier;
use fleet_core::dispatch::Dispatcher;
use fleet_core::error::{DispatchError, Entity};
use fleet_core::model::{CommandStatus, Machine, ACTIVE_WINDOW_MS};
use fleet_core::now_ms;
use fleet_core::store::{MemoryRepository, Repository};

fn dispatcher() -> (Dispatcher, Arc<MemoryRepository>) {
    let repo = Arc::new(MemoryRepository::new());
    let dispatcher = Dispatcher::new(repo.clone(), Classifier::builtin().unwrap());
    (dispatcher, repo)
}

async fn with_machine_and_script(name: &str) -> (Dispatcher, Arc<MemoryRepository>, String) {
    let (d, repo) = dispatcher();
    let machine_id = d.register_machine(name).await.unwrap().machine_id;
    d.register_script("hello", "echo hi").await.unwrap();
    (d, repo, machine_id)
}

#[tokio::test]
async fn dangerous_script_is_rejected_and_not_stored() {
    let (d, repo) = dispatcher();

    let err = d.register_script("wipe", "rm -rf /").await.unwrap_err();
    match err {
        DispatchError::RejectedUnsafe { script, rule_id } => {
            assert_eq!(script, "wipe");
            assert_eq!(rule_id, "rm-recursive-root");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(repo.get_script("wipe").await.unwrap().is_none());
}

#[tokio::test]
async fn rejected_update_keeps_previous_content() {
    let (d, repo) = dispatcher();
    let first = d.register_script("cleanup", "rm -rf ./build").await.unwrap();
    assert!(first.created);

    let err = d.register_script("cleanup", "rm -rf /").await.unwrap_err();
    assert!(matches!(err, DispatchError::RejectedUnsafe { .. }));
    assert_eq!(
        repo.get_script("cleanup").await.unwrap().unwrap().content,
        "rm -rf ./build"
    );

    let second = d.register_script("cleanup", "rm -rf ./dist").await.unwrap();
    assert!(!second.created);
}

#[tokio::test]
async fn empty_script_name_is_invalid() {
    let (d, _) = dispatcher();
    let err = d.register_script("  ", "echo hi").await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidInput(_)));
    assert_eq!(err.kind(), "invalid_input");
}

#[tokio::test]
async fn submit_poll_complete_round_trip() {
    let (d, _, pc1) = with_machine_and_script("PC1").await;

    let id = d.submit("PC1", "hello").await.unwrap();
    assert_eq!(id, 1);

    let pending = d.poll_pending(&pc1).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, 1);
    assert_eq!(pending[0].script_name, "hello");
    assert_eq!(pending[0].script_content, "echo hi");

    let done = d.complete(id, "hi\n".into()).await.unwrap();
    assert_eq!(done.status, CommandStatus::Completed);
    assert!(done.completed_at_ms.is_some());

    let latest = d.latest_result(&pc1).await.unwrap().unwrap();
    assert_eq!(latest.id, 1);
    assert_eq!(latest.script_name, "hello");
    assert_eq!(latest.output, "hi\n");
    assert_eq!(latest.status, CommandStatus::Completed);

    assert!(d.poll_pending(&pc1).await.unwrap().is_empty());
}

#[tokio::test]
async fn new_command_is_pending_with_empty_output() {
    let (d, repo, _) = with_machine_and_script("pc1").await;
    let id = d.submit("pc1", "hello").await.unwrap();
    let stored = repo.get_command(id).await.unwrap().unwrap();
    assert_eq!(stored.status, CommandStatus::Pending);
    assert!(stored.output.is_empty());
    assert!(stored.completed_at_ms.is_none());
}

#[tokio::test]
async fn submit_to_unknown_machine_or_script_is_not_found() {
    let (d, _, _) = with_machine_and_script("pc1").await;

    let err = d.submit("ghost", "hello").await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::NotFound { entity: Entity::Machine, ref key } if key == "ghost"
    ));

    let err = d.submit("pc1", "missing").await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::NotFound { entity: Entity::Script, .. }
    ));
}

#[tokio::test]
async fn second_completion_is_refused_and_output_kept() {
    let (d, repo, _) = with_machine_and_script("pc1").await;
    let id = d.submit("pc1", "hello").await.unwrap();

    d.complete(id, "X".into()).await.unwrap();
    let err = d.complete(id, "Y".into()).await.unwrap_err();
    assert!(matches!(err, DispatchError::AlreadyCompleted(got) if got == id));
    assert_eq!(repo.get_command(id).await.unwrap().unwrap().output, "X");
}

#[tokio::test]
async fn completing_unknown_command_is_not_found() {
    let (d, _) = dispatcher();
    let err = d.complete(42, "x".into()).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::NotFound { entity: Entity::Command, ref key } if key == "42"
    ));
}

#[tokio::test]
async fn pending_is_in_creation_order_and_sees_script_edits() {
    let (d, _, pc1) = with_machine_and_script("pc1").await;
    d.register_script("bye", "echo bye").await.unwrap();

    let a = d.submit("pc1", "hello").await.unwrap();
    let b = d.submit("pc1", "bye").await.unwrap();
    let c = d.submit("pc1", "hello").await.unwrap();
    d.register_script("hello", "echo hello again").await.unwrap();
    d.complete(b, "bye\n".into()).await.unwrap();

    let pending = d.poll_pending(&pc1).await.unwrap();
    let ids: Vec<_> = pending.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![a, c]);
    assert!(pending.iter().all(|p| p.script_content == "echo hello again"));
}

#[tokio::test]
async fn unknown_machine_has_no_pending_work() {
    let (d, _) = dispatcher();
    assert!(d.poll_pending("01ARZ3NDEKTSV4RRFFQ69G5FAV").await.unwrap().is_empty());
    assert!(d.latest_result("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn latest_result_picks_highest_completed_id() {
    let (d, _, pc1) = with_machine_and_script("pc1").await;
    let first = d.submit("pc1", "hello").await.unwrap();
    let second = d.submit("pc1", "hello").await.unwrap();
    let third = d.submit("pc1", "hello").await.unwrap();

    d.complete(second, "two".into()).await.unwrap();
    d.complete(first, "one".into()).await.unwrap();

    let latest = d.latest_result(&pc1).await.unwrap().unwrap();
    assert_eq!(latest.id, second);
    assert_eq!(latest.output, "two");

    let by_name = d.latest_result_by_name("pc1").await.unwrap().unwrap();
    assert_eq!(by_name.id, second);
    assert!(d.poll_pending(&pc1).await.unwrap().iter().any(|p| p.id == third));

    let err = d.latest_result_by_name("ghost").await.unwrap_err();
    assert!(matches!(err, DispatchError::NotFound { .. }));
}

#[tokio::test]
async fn registration_reuses_machine_id() {
    let (d, repo) = dispatcher();
    let first = d.register_machine("pc1").await.unwrap();
    let second = d.register_machine("pc1").await.unwrap();
    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.machine_id, second.machine_id);
    assert_eq!(repo.list_machines().await.unwrap().len(), 1);

    let err = d.register_machine("").await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidInput(_)));
}

#[tokio::test]
async fn active_machines_use_five_minute_window() {
    let (d, repo) = dispatcher();
    let now = now_ms();
    for (id, name, seen) in [
        ("m1", "zeta", now - 1_000),
        ("m2", "alpha", now - ACTIVE_WINDOW_MS),
        ("m3", "stale", now - ACTIVE_WINDOW_MS - 1),
    ] {
        repo.put_machine(Machine {
            id: id.into(),
            name: name.into(),
            last_seen_ms: seen,
        })
        .await
        .unwrap();
    }

    let names: Vec<_> = d
        .active_machines(now)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submits_get_distinct_sequential_ids() {
    let (d, _, _) = with_machine_and_script("pc1").await;

    let mut handles = Vec::new();
    for _ in 0..32 {
        let d = d.clone();
        handles.push(tokio::spawn(async move { d.submit("pc1", "hello").await }));
    }
    let mut ids = Vec::new();
    for h in handles {
        ids.push(h.await.unwrap().unwrap());
    }
    ids.sort_unstable();
    assert_eq!(ids, (1..=32).collect::<Vec<u64>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completions_have_one_winner() {
    let (d, repo, _) = with_machine_and_script("pc1").await;
    let id = d.submit("pc1", "hello").await.unwrap();

    let mut handles = Vec::new();
    for n in 0..16 {
        let d = d.clone();
        handles.push(tokio::spawn(async move { d.complete(id, format!("run {n}")).await }));
    }

    let mut winners = Vec::new();
    for h in handles {
        match h.await.unwrap() {
            Ok(cmd) => winners.push(cmd.output),
            Err(DispatchError::AlreadyCompleted(got)) => assert_eq!(got, id),
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(repo.get_command(id).await.unwrap().unwrap().output, winners[0]);
}
