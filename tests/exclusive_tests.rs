//! Exclusive-queue blocking: serialization, cross-queue independence, and
//! the starvation bound.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{processor, test_config, wait_for, TestEnv};
use roost::distributor::AckHandle;
use roost::job::{EnqueueRequest, Job};
use roost::retry::ScheduleMap;
use roost::worker::Worker;

/// Processor that sleeps for the number of milliseconds in the payload.
fn sleepy_processor() -> Arc<dyn roost::distributor::JobProcessor> {
    processor(|job: Job, _ack: AckHandle| async move {
        if let Ok(ms) = job.payload.parse::<u64>() {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        Ok(())
    })
}

fn enqueue(id: &str, payload: &str, exclusive: bool) -> EnqueueRequest {
    EnqueueRequest {
        queue: "my-queue".to_string(),
        id: id.to_string(),
        payload: payload.to_string(),
        exclusive,
        ..Default::default()
    }
}

fn assert_strictly_ordered(positions: &[Option<usize>]) {
    assert!(
        positions.iter().all(|p| p.is_some()),
        "missing events: {positions:?}"
    );
    let resolved: Vec<usize> = positions.iter().map(|p| p.unwrap()).collect();
    let mut sorted = resolved.clone();
    sorted.sort_unstable();
    assert_eq!(resolved, sorted, "events out of order: {resolved:?}");
}

#[tokio::test]
async fn non_exclusive_jobs_run_in_parallel() {
    let env = TestEnv::new("");
    let worker = Worker::start(
        env.store.clone(),
        ScheduleMap::new(),
        sleepy_processor(),
        None,
        test_config(),
    );

    env.producer.enqueue(enqueue("a", "150", false)).await.unwrap();
    env.producer.enqueue(enqueue("b", "150", false)).await.unwrap();

    assert!(
        wait_for(
            || env.acknowledged_index("a").is_some() && env.acknowledged_index("b").is_some(),
            Duration::from_secs(5)
        )
        .await
    );

    // Both pickups happened before either acknowledgement.
    assert!(env.requested_index("b") < env.acknowledged_index("a"));
    assert!(env.requested_index("a") < env.acknowledged_index("b"));

    worker.close().await.unwrap();
}

#[tokio::test]
async fn exclusive_jobs_run_strictly_serially() {
    let env = TestEnv::new("");
    let worker = Worker::start(
        env.store.clone(),
        ScheduleMap::new(),
        sleepy_processor(),
        None,
        test_config(),
    );

    env.producer.enqueue(enqueue("a", "40", true)).await.unwrap();
    env.producer.enqueue(enqueue("b", "40", true)).await.unwrap();

    assert!(
        wait_for(
            || env.acknowledged_index("b").is_some(),
            Duration::from_secs(5)
        )
        .await
    );

    assert_strictly_ordered(&[
        env.requested_index("a"),
        env.acknowledged_index("a"),
        env.requested_index("b"),
        env.acknowledged_index("b"),
    ]);

    worker.close().await.unwrap();
}

#[tokio::test]
async fn pending_exclusive_job_does_not_starve() {
    let env = TestEnv::new("");
    let worker = Worker::start(
        env.store.clone(),
        ScheduleMap::new(),
        sleepy_processor(),
        None,
        test_config(),
    );

    // Long-running non-exclusive job, then an exclusive one, then another
    // non-exclusive enqueued after it.
    env.producer.enqueue(enqueue("a", "150", false)).await.unwrap();
    env.producer.enqueue(enqueue("b", "10", true)).await.unwrap();
    env.producer.enqueue(enqueue("c", "10", false)).await.unwrap();

    assert!(
        wait_for(
            || env.acknowledged_index("c").is_some(),
            Duration::from_secs(5)
        )
        .await
    );

    // The exclusive job ran before the later non-exclusive one, even though
    // "c" was ready the whole time.
    assert_strictly_ordered(&[
        env.requested_index("a"),
        env.acknowledged_index("a"),
        env.requested_index("b"),
        env.acknowledged_index("b"),
        env.requested_index("c"),
        env.acknowledged_index("c"),
    ]);

    worker.close().await.unwrap();
}

#[tokio::test]
async fn raised_soft_block_limit_admits_overtakers() {
    let env = TestEnv::new("");
    let mut config = test_config();
    config.distributor.soft_block_limit = 1;
    let worker = Worker::start(
        env.store.clone(),
        ScheduleMap::new(),
        sleepy_processor(),
        None,
        config,
    );

    env.producer.enqueue(enqueue("a", "200", false)).await.unwrap();
    env.producer.enqueue(enqueue("b", "10", true)).await.unwrap();
    env.producer.enqueue(enqueue("c", "10", false)).await.unwrap();

    assert!(
        wait_for(
            || ["a", "b", "c"]
                .iter()
                .all(|id| env.acknowledged_index(id).is_some()),
            Duration::from_secs(5)
        )
        .await
    );

    // With one admission allowed, "c" overtakes the pending exclusive job.
    assert!(env.requested_index("c") < env.acknowledged_index("a"));
    assert!(env.acknowledged_index("a") < env.requested_index("b"));

    worker.close().await.unwrap();
}
