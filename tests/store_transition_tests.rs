//! Direct tests of the five atomic transitions against the in-memory
//! adapter.

mod common;

use chrono::Utc;
use common::memory_store;
use roost::storage::{
    Acknowledgement, DeleteOutcome, InvokeOutcome, RequestOutcome, ScheduleCommand,
    ScheduleOutcome, StoreAdapter,
};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn command(queue: &str, id: &str, run_at_ms: i64) -> ScheduleCommand {
    ScheduleCommand {
        tenant: String::new(),
        queue: queue.to_string(),
        id: id.to_string(),
        payload: "payload".to_string(),
        run_at_ms,
        exclusive: false,
        retry: Vec::new(),
        schedule: None,
        override_existing: false,
    }
}

#[tokio::test]
async fn request_pops_earliest_ready_job() {
    let store = memory_store();
    let now = now_ms();
    store.schedule(command("q", "late", now - 10)).await.unwrap();
    store.schedule(command("q", "early", now - 100)).await.unwrap();

    let outcome = store.request("", now, 0).await.unwrap();
    match outcome {
        RequestOutcome::Picked(picked) => {
            assert_eq!(picked.job.id, "early");
            assert_eq!(picked.job.count, 1);
        }
        other => panic!("expected a picked job, got {other:?}"),
    }
}

#[tokio::test]
async fn request_breaks_score_ties_lexically() {
    let store = memory_store();
    let now = now_ms();
    store.schedule(command("q", "b", now - 5)).await.unwrap();
    store.schedule(command("q", "a", now - 5)).await.unwrap();

    match store.request("", now, 0).await.unwrap() {
        RequestOutcome::Picked(picked) => assert_eq!(picked.job.id, "a"),
        other => panic!("expected a picked job, got {other:?}"),
    }
}

#[tokio::test]
async fn request_reports_wake_time_and_emptiness() {
    let store = memory_store();
    let now = now_ms();
    assert_eq!(store.request("", now, 0).await.unwrap(), RequestOutcome::Empty);

    store.schedule(command("q", "a", now + 5_000)).await.unwrap();
    assert_eq!(
        store.request("", now, 0).await.unwrap(),
        RequestOutcome::WakeAt(now + 5_000)
    );
}

#[tokio::test]
async fn job_is_never_in_both_indices() {
    let store = memory_store();
    let now = now_ms();
    store.schedule(command("q", "a", now)).await.unwrap();

    // Idle: deletable, invokable.
    assert_eq!(
        store.invoke("", "q", "a", now).await.unwrap(),
        InvokeOutcome::Invoked
    );

    let RequestOutcome::Picked(picked) = store.request("", now, 0).await.unwrap() else {
        panic!("expected a picked job");
    };

    // In-flight: no Scheduled entry left (invoke misses), delete refuses.
    assert_eq!(
        store.invoke("", "q", "a", now).await.unwrap(),
        InvokeOutcome::NotFound
    );
    assert_eq!(
        store.delete("", "q", "a").await.unwrap(),
        DeleteOutcome::InExecution
    );

    store
        .acknowledge(&Acknowledgement {
            tenant: String::new(),
            queue: "q".to_string(),
            id: "a".to_string(),
            generation: picked.generation,
            exclusive: false,
            next_execution_at: None,
        })
        .await
        .unwrap();

    // Gone from both indices.
    assert_eq!(
        store.delete("", "q", "a").await.unwrap(),
        DeleteOutcome::NotFound
    );
    assert_eq!(store.find_job("", "q", "a").await.unwrap(), None);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let store = memory_store();
    store.schedule(command("q", "a", now_ms())).await.unwrap();

    assert_eq!(store.delete("", "q", "a").await.unwrap(), DeleteOutcome::Deleted);
    assert_eq!(store.delete("", "q", "a").await.unwrap(), DeleteOutcome::NotFound);
}

#[tokio::test]
async fn schedule_without_override_is_a_no_op() {
    let store = memory_store();
    let now = now_ms();
    store.schedule(command("q", "a", now)).await.unwrap();

    let mut second = command("q", "a", now + 1_000);
    second.payload = "changed".to_string();
    match store.schedule(second).await.unwrap() {
        ScheduleOutcome::Unchanged(job) => assert_eq!(job.payload, "payload"),
        other => panic!("expected no-op, got {other:?}"),
    }
}

#[tokio::test]
async fn schedule_override_replaces_idle_job() {
    let store = memory_store();
    let now = now_ms();
    store.schedule(command("q", "a", now + 10_000)).await.unwrap();

    let mut replacement = command("q", "a", now - 1);
    replacement.payload = "replacement".to_string();
    replacement.override_existing = true;
    match store.schedule(replacement).await.unwrap() {
        ScheduleOutcome::Scheduled(job) => assert_eq!(job.payload, "replacement"),
        other => panic!("expected overwrite, got {other:?}"),
    }

    // The Scheduled entry moved to the new run time.
    match store.request("", now, 0).await.unwrap() {
        RequestOutcome::Picked(picked) => assert_eq!(picked.job.payload, "replacement"),
        other => panic!("expected a picked job, got {other:?}"),
    }
}

#[tokio::test]
async fn stale_acknowledge_is_discarded_after_override() {
    let store = memory_store();
    let now = now_ms();
    store.schedule(command("q", "a", now)).await.unwrap();

    let RequestOutcome::Picked(picked) = store.request("", now, 0).await.unwrap() else {
        panic!("expected a picked job");
    };

    let mut replacement = command("q", "a", now);
    replacement.payload = "override".to_string();
    replacement.override_existing = true;
    store.schedule(replacement).await.unwrap();

    // The execution finishes and tries to remove the record.
    store
        .acknowledge(&Acknowledgement {
            tenant: String::new(),
            queue: "q".to_string(),
            id: "a".to_string(),
            generation: picked.generation,
            exclusive: false,
            next_execution_at: None,
        })
        .await
        .unwrap();

    // The override record is the sole survivor and is still scheduled.
    let survivor = store.find_job("", "q", "a").await.unwrap().unwrap();
    assert_eq!(survivor.payload, "override");
    match store.request("", now_ms(), 0).await.unwrap() {
        RequestOutcome::Picked(picked) => {
            assert_eq!(picked.job.payload, "override");
            assert_eq!(picked.job.count, 1);
        }
        other => panic!("expected the override to be picked, got {other:?}"),
    }
}

#[tokio::test]
async fn exclusive_pickup_blocks_its_queue_globally() {
    let store = memory_store();
    let now = now_ms();
    let mut exclusive = command("q", "a", now - 10);
    exclusive.exclusive = true;
    store.schedule(exclusive).await.unwrap();
    store.schedule(command("q", "b", now - 5)).await.unwrap();
    store.schedule(command("other", "c", now - 5)).await.unwrap();

    let RequestOutcome::Picked(picked) = store.request("", now, 0).await.unwrap() else {
        panic!("expected the exclusive job");
    };
    assert_eq!(picked.job.id, "a");

    // Same queue is blocked, other queues flow.
    match store.request("", now, 0).await.unwrap() {
        RequestOutcome::Picked(other) => assert_eq!(other.job.queue, "other"),
        outcome => panic!("expected the other queue's job, got {outcome:?}"),
    }
    assert_eq!(store.request("", now, 0).await.unwrap(), RequestOutcome::Blocked);

    store
        .acknowledge(&Acknowledgement {
            tenant: String::new(),
            queue: "q".to_string(),
            id: "a".to_string(),
            generation: picked.generation,
            exclusive: true,
            next_execution_at: None,
        })
        .await
        .unwrap();

    match store.request("", now, 0).await.unwrap() {
        RequestOutcome::Picked(unblocked) => assert_eq!(unblocked.job.id, "b"),
        outcome => panic!("expected the blocked job to flow, got {outcome:?}"),
    }
}

#[tokio::test]
async fn soft_block_limit_bounds_overtaking() {
    let store = memory_store();
    let now = now_ms();
    store.schedule(command("q", "a", now - 30)).await.unwrap();
    let mut exclusive = command("q", "b", now - 20);
    exclusive.exclusive = true;
    store.schedule(exclusive).await.unwrap();
    store.schedule(command("q", "c", now - 10)).await.unwrap();

    // Non-exclusive in flight; the exclusive job is ready but can't start.
    let RequestOutcome::Picked(first) = store.request("", now, 0).await.unwrap() else {
        panic!("expected first pickup");
    };
    assert_eq!(first.job.id, "a");

    // Strict limit holds everything behind the pending exclusive job.
    assert_eq!(store.request("", now, 0).await.unwrap(), RequestOutcome::Blocked);

    // A limit of 1 admits one overtaker, then holds.
    match store.request("", now, 1).await.unwrap() {
        RequestOutcome::Picked(overtaker) => assert_eq!(overtaker.job.id, "c"),
        outcome => panic!("expected the soft-block admission, got {outcome:?}"),
    }
    assert_eq!(store.request("", now, 1).await.unwrap(), RequestOutcome::Blocked);
}

#[tokio::test]
async fn drain_stale_removes_each_entry_exactly_once() {
    let store = memory_store();
    let now = now_ms();
    let mut cmd = command("q", "a", now);
    cmd.retry = vec![100];
    store.schedule(cmd).await.unwrap();
    store.request("", now, 0).await.unwrap();

    let drained = store.drain_stale("", now).await.unwrap();
    assert_eq!(drained.len(), 1);
    let entry = &drained[0];
    assert_eq!((entry.queue.as_str(), entry.id.as_str()), ("q", "a"));
    assert_eq!(entry.picked_up_at_ms, now);
    let job = entry.job.as_ref().expect("record should still exist");
    assert_eq!(job.count, 1);

    assert!(store.drain_stale("", now_ms()).await.unwrap().is_empty());
}

#[tokio::test]
async fn drain_stale_leaves_fresh_leases_alone() {
    let store = memory_store();
    let now = now_ms();
    store.schedule(command("q", "a", now)).await.unwrap();
    store.request("", now, 0).await.unwrap();

    assert!(store.drain_stale("", now - 60_000).await.unwrap().is_empty());
}

#[tokio::test]
async fn scan_queue_pages_through_all_jobs() {
    let store = memory_store();
    let now = now_ms();
    for id in ["a", "b", "c", "d", "e"] {
        store.schedule(command("q", id, now)).await.unwrap();
    }

    let mut collected = Vec::new();
    let mut cursor = 0;
    loop {
        let page = store.scan_queue("", "q", cursor, 2).await.unwrap();
        collected.extend(page.jobs.into_iter().map(|j| j.id));
        cursor = page.cursor;
        if cursor == 0 {
            break;
        }
    }
    assert_eq!(collected, vec!["a", "b", "c", "d", "e"]);
}

#[tokio::test]
async fn scan_queue_pattern_matches_wildcards() {
    let store = memory_store();
    let now = now_ms();
    store.schedule(command("email-high", "a", now)).await.unwrap();
    store.schedule(command("email-low", "b", now)).await.unwrap();
    store.schedule(command("sms", "c", now)).await.unwrap();

    let page = store.scan_queue_pattern("", "email-*", 0, 10).await.unwrap();
    let mut queues: Vec<String> = page.jobs.into_iter().map(|j| j.queue).collect();
    queues.sort();
    assert_eq!(queues, vec!["email-high", "email-low"]);
    assert_eq!(page.cursor, 0);
}

#[tokio::test]
async fn tenants_are_isolated() {
    let store = memory_store();
    let now = now_ms();
    let mut cmd = command("q", "a", now);
    cmd.tenant = "acme".to_string();
    store.schedule(cmd).await.unwrap();

    assert_eq!(store.request("", now, 0).await.unwrap(), RequestOutcome::Empty);
    assert!(matches!(
        store.request("acme", now, 0).await.unwrap(),
        RequestOutcome::Picked(_)
    ));
    assert_eq!(store.scan_tenants().await.unwrap(), vec!["acme".to_string()]);
}
