use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use settlement_worker::{
    enqueue_job, queue_stats, reset, retry_count, CounterStore, Decoded, InMemoryQueue, Job,
    QueueName, QueueNames, WorkQueue, RETRY_COUNT_KEY,
};

const WAIT: Duration = Duration::from_millis(50);

#[tokio::test]
async fn enqueue_dequeue_preserves_envelope() {
    let queue = InMemoryQueue::new();
    let names = QueueNames::default();

    enqueue_job(&queue, &names, &Job::payment("pay_123")).await.unwrap();
    enqueue_job(&queue, &names, &Job::refund("rfnd_456")).await.unwrap();

    let (from, raw) = queue
        .pop_blocking(&names.dequeue_order(), WAIT)
        .await
        .unwrap()
        .expect("payment job");
    assert_eq!(from, names.payments);
    let envelope: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(envelope["type"], "PROCESS_PAYMENT");
    assert_eq!(envelope["payment_id"], "pay_123");
    assert_eq!(Job::decode(&raw).unwrap(), Decoded::Job(Job::payment("pay_123")));

    let (from, raw) = queue
        .pop_blocking(&names.dequeue_order(), WAIT)
        .await
        .unwrap()
        .expect("refund job");
    assert_eq!(from, names.refunds);
    assert_eq!(Job::decode(&raw).unwrap(), Decoded::Job(Job::refund("rfnd_456")));
}

#[tokio::test]
async fn each_queue_is_fifo() {
    let queue = InMemoryQueue::new();
    let name = QueueName::new("payment_jobs");
    for i in 0..5 {
        queue.push(&name, format!("job-{i}")).await.unwrap();
    }

    for i in 0..5 {
        let (_, item) = queue
            .pop_blocking(std::slice::from_ref(&name), WAIT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item, format!("job-{i}"));
    }
}

#[tokio::test]
async fn ready_queues_are_served_in_list_order() {
    let queue = InMemoryQueue::new();
    let a = QueueName::new("a");
    let b = QueueName::new("b");
    queue.push(&b, "b1".into()).await.unwrap();
    queue.push(&a, "a1".into()).await.unwrap();
    queue.push(&b, "b2".into()).await.unwrap();

    let order = [a.clone(), b.clone()];
    let mut popped = Vec::new();
    while let Some((name, item)) = queue.pop_blocking(&order, WAIT).await.unwrap() {
        popped.push((name.0, item));
    }
    assert_eq!(
        popped,
        vec![
            ("a".to_string(), "a1".to_string()),
            ("b".to_string(), "b1".to_string()),
            ("b".to_string(), "b2".to_string()),
        ]
    );

    // Reversed list order flips the tie-break.
    queue.push(&a, "a2".into()).await.unwrap();
    queue.push(&b, "b3".into()).await.unwrap();
    let reversed = [b.clone(), a.clone()];
    let (first, _) = queue.pop_blocking(&reversed, WAIT).await.unwrap().unwrap();
    assert_eq!(first, b);
}

#[tokio::test]
async fn blocking_pop_wakes_on_push() {
    let queue = Arc::new(InMemoryQueue::new());
    let name = QueueName::new("refund_jobs");

    let producer = {
        let queue = queue.clone();
        let name = name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            queue.push(&name, "late".into()).await.unwrap();
        })
    };

    let popped = queue
        .pop_blocking(std::slice::from_ref(&name), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(popped, Some((name, "late".to_string())));
    producer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn blocking_pop_times_out_empty() {
    let queue = InMemoryQueue::new();
    let popped = queue
        .pop_blocking(&QueueNames::default().dequeue_order(), Duration::from_secs(1))
        .await
        .unwrap();
    assert!(popped.is_none());
}

#[tokio::test]
async fn concurrent_producers_lose_nothing() {
    let queue = Arc::new(InMemoryQueue::new());
    let names = QueueNames::default();

    let mut producers = Vec::new();
    for p in 0..8 {
        let queue = queue.clone();
        let names = names.clone();
        producers.push(tokio::spawn(async move {
            for i in 0..50 {
                let job = if i % 2 == 0 {
                    Job::payment(format!("pay_{p}_{i}"))
                } else {
                    Job::refund(format!("rfnd_{p}_{i}"))
                };
                enqueue_job(queue.as_ref(), &names, &job).await.unwrap();
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    let mut seen = HashSet::new();
    while let Some((_, raw)) = queue.pop_blocking(&names.dequeue_order(), WAIT).await.unwrap() {
        assert!(seen.insert(raw), "duplicate item");
    }
    assert_eq!(seen.len(), 400);
}

#[tokio::test]
async fn counters_are_atomic_under_contention() {
    let counters = Arc::new(InMemoryQueue::new());

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let counters = counters.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..100 {
                counters.incr("payment_jobs:processing").await.unwrap();
                counters.decr("payment_jobs:processing").await.unwrap();
                counters.incr("payment_jobs:failed").await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(counters.get("payment_jobs:processing").await.unwrap(), 0);
    assert_eq!(counters.get("payment_jobs:failed").await.unwrap(), 1_600);
    assert_eq!(counters.get("never_set").await.unwrap(), 0);

    counters.delete("payment_jobs:failed").await.unwrap();
    assert_eq!(counters.get("payment_jobs:failed").await.unwrap(), 0);
}

#[tokio::test]
async fn stats_and_reset() {
    let queue = InMemoryQueue::new();
    let names = QueueNames::default();

    for i in 0..3 {
        enqueue_job(&queue, &names, &Job::payment(format!("p{i}"))).await.unwrap();
    }
    enqueue_job(&queue, &names, &Job::refund("r0")).await.unwrap();
    queue.incr(&names.refunds.failed_key()).await.unwrap();
    queue.incr(RETRY_COUNT_KEY).await.unwrap();
    queue.incr(RETRY_COUNT_KEY).await.unwrap();

    let stats = queue_stats(&queue, &queue, &names).await.unwrap();
    assert_eq!(stats[&names.payments].pending, 3);
    assert_eq!(stats[&names.payments].failed, 0);
    assert_eq!(stats[&names.refunds].pending, 1);
    assert_eq!(stats[&names.refunds].failed, 1);
    assert_eq!(stats[&names.refunds].processing, 0);
    assert_eq!(retry_count(&queue).await.unwrap(), 2);

    reset(&queue, &queue, &names).await.unwrap();

    assert_eq!(queue.len(&names.payments).await.unwrap(), 0);
    assert_eq!(queue.len(&names.refunds).await.unwrap(), 0);
    assert_eq!(retry_count(&queue).await.unwrap(), 0);
    // Failure counters survive a reset.
    assert_eq!(queue.get(&names.refunds.failed_key()).await.unwrap(), 1);
}
