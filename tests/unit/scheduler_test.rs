//! Unit tests for the wave scheduler

use imagegen_gateway::backend::GenerationRequest;
use imagegen_gateway::queue::{Scheduler, SchedulerConfig};
use imagegen_gateway::AppError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;

fn scheduler(max_concurrent: usize, delay_ms: u64) -> Scheduler {
    Scheduler::new(SchedulerConfig {
        max_concurrent,
        inter_wave_delay: Duration::from_millis(delay_ms),
    })
    .unwrap()
}

async fn wait_idle(scheduler: &Scheduler) {
    while scheduler.is_active() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_seven_tasks_run_in_three_waves() {
    let scheduler = scheduler(3, 100);
    let started = Instant::now();

    let handles: Vec<_> = (0..7)
        .map(|i| {
            scheduler.submit(move || async move {
                Ok((i, started.elapsed().as_millis() as u64))
            })
        })
        .collect();

    assert_eq!(scheduler.queue_len(), 7);

    let mut starts = Vec::new();
    for handle in handles {
        starts.push(handle.await.unwrap());
    }

    // FIFO across waves: 0-2 first, 3-5 after one delay, 6 after two
    for (index, at) in &starts {
        let expected = (*index as u64 / 3) * 100;
        assert_eq!(*at, expected, "task {index} started at {at}ms");
    }

    let mut wave_sizes = std::collections::BTreeMap::new();
    for (_, at) in &starts {
        *wave_sizes.entry(*at).or_insert(0) += 1;
    }
    assert_eq!(wave_sizes.into_values().collect::<Vec<_>>(), vec![3, 3, 1]);

    wait_idle(&scheduler).await;
    let stats = scheduler.stats();
    assert_eq!(stats.waves_completed, 3);
    assert_eq!(stats.tasks_succeeded, 7);
    assert_eq!(stats.pending, 0);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_delay_is_waves_minus_one() {
    let scheduler = scheduler(4, 250);
    let started = Instant::now();

    let handles: Vec<_> = (0..10)
        .map(|_| scheduler.submit(|| async { Ok(()) }))
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    // ceil(10 / 4) = 3 waves, two delays
    assert_eq!(started.elapsed(), Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_never_exceeds_limit() {
    let scheduler = scheduler(3, 10);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..11u64)
        .map(|i| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            scheduler.submit(move || async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5 + i * 3)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_failed_task_does_not_affect_wave_siblings() {
    let scheduler = scheduler(3, 100);

    let first = scheduler.submit(|| async { Ok("first") });
    let failing = scheduler.submit(|| async {
        Err::<&str, _>(AppError::Upstream("quota exceeded".to_string()))
    });
    let third = scheduler.submit(|| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok("third")
    });

    assert_eq!(first.await.unwrap(), "first");
    assert!(matches!(failing.await, Err(AppError::Upstream(_))));
    assert_eq!(third.await.unwrap(), "third");

    wait_idle(&scheduler).await;
    let stats = scheduler.stats();
    assert_eq!(stats.waves_completed, 1);
    assert_eq!(stats.tasks_failed, 1);
    assert_eq!(stats.tasks_succeeded, 2);
}

#[tokio::test(start_paused = true)]
async fn test_loop_restarts_after_draining() {
    let scheduler = scheduler(2, 100);

    assert_eq!(scheduler.submit(|| async { Ok(1) }).await.unwrap(), 1);
    wait_idle(&scheduler).await;
    assert!(!scheduler.is_active());

    assert_eq!(scheduler.submit(|| async { Ok(2) }).await.unwrap(), 2);
    wait_idle(&scheduler).await;
    assert_eq!(scheduler.stats().waves_completed, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submitters_share_one_loop() {
    let scheduler = scheduler(3, 0);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let submitters: Vec<_> = (0..8)
        .map(|_| {
            let scheduler = scheduler.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                let mut handles = Vec::new();
                for _ in 0..5 {
                    let in_flight = in_flight.clone();
                    let peak = peak.clone();
                    handles.push(scheduler.submit(move || async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }));
                }
                for handle in handles {
                    handle.await.unwrap();
                }
            })
        })
        .collect();

    for submitter in submitters {
        submitter.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    wait_idle(&scheduler).await;
    assert_eq!(scheduler.stats().tasks_succeeded, 40);
}

#[tokio::test]
async fn test_cancelled_task_never_runs() {
    let scheduler = scheduler(1, 0);
    let release = Arc::new(Notify::new());
    let ran = Arc::new(AtomicBool::new(false));

    let gate = release.clone();
    let blocker = scheduler.submit(move || async move {
        gate.notified().await;
        Ok(())
    });

    let flag = ran.clone();
    let cancelled = scheduler.submit(move || async move {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });
    cancelled.cancel();

    release.notify_one();
    blocker.await.unwrap();

    assert!(matches!(cancelled.await, Err(AppError::Cancelled)));
    assert!(!ran.load(Ordering::SeqCst));

    wait_idle(&scheduler).await;
    assert_eq!(scheduler.stats().tasks_cancelled, 1);
}

#[tokio::test]
async fn test_cancel_after_start_runs_to_completion() {
    let scheduler = scheduler(1, 0);
    let release = Arc::new(Notify::new());
    let (started_tx, started_rx) = oneshot::channel();

    let gate = release.clone();
    let handle = scheduler.submit(move || async move {
        let _ = started_tx.send(());
        gate.notified().await;
        Ok("finished")
    });

    started_rx.await.unwrap();
    handle.cancel();
    release.notify_one();

    assert!(handle.is_cancelled());
    assert_eq!(handle.await.unwrap(), "finished");
}

#[tokio::test]
async fn test_queue_len_reflects_waiting_tasks() {
    let scheduler = scheduler(1, 0);
    let release = Arc::new(Notify::new());
    let (started_tx, started_rx) = oneshot::channel();

    let gate = release.clone();
    let blocker = scheduler.submit(move || async move {
        let _ = started_tx.send(());
        gate.notified().await;
        Ok(())
    });
    started_rx.await.unwrap();

    let waiting: Vec<_> = (0..3)
        .map(|_| scheduler.submit(|| async { Ok(()) }))
        .collect();
    assert_eq!(scheduler.queue_len(), 3);

    release.notify_one();
    blocker.await.unwrap();
    for handle in waiting {
        handle.await.unwrap();
    }
    assert_eq!(scheduler.queue_len(), 0);
}

#[tokio::test]
async fn test_submit_request_carries_request() {
    let scheduler = scheduler(2, 0);
    let request = GenerationRequest::new("a lighthouse at dusk").unwrap().at_index(4);

    let handle = scheduler.submit_request(request, || async { Ok(vec![1u8, 2, 3]) });
    assert_eq!(handle.await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_handle_pending_until_wave_runs() {
    let scheduler = scheduler(1, 0);
    let mut handle = tokio_test::task::spawn(scheduler.submit(|| async { Ok(5) }));

    // The wave loop has been spawned but has not been polled yet
    tokio_test::assert_pending!(handle.poll());

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(handle.is_woken());
    assert_eq!(tokio_test::assert_ready_ok!(handle.poll()), 5);
}

#[tokio::test]
async fn test_huge_concurrency_limit_runs_everything_in_one_wave() {
    let scheduler = scheduler(usize::MAX / 2, 0);

    let handles: Vec<_> = (0..4)
        .map(|i| scheduler.submit(move || async move { Ok(i) }))
        .collect();
    for (expected, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), expected as i32);
    }

    wait_idle(&scheduler).await;
    assert_eq!(scheduler.stats().waves_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_tail_resolves_without_waiting_for_delay() {
    let scheduler = scheduler(1, 1000);
    let started = Instant::now();
    let ran = Arc::new(AtomicBool::new(false));

    let first = scheduler.submit(|| async { Ok(()) });
    let flag = ran.clone();
    let tail = scheduler.submit(move || async move {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });
    tail.cancel();

    first.await.unwrap();
    assert!(matches!(tail.await, Err(AppError::Cancelled)));
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert!(!ran.load(Ordering::SeqCst));

    wait_idle(&scheduler).await;
    let stats = scheduler.stats();
    assert_eq!(stats.waves_completed, 1);
    assert_eq!(stats.tasks_cancelled, 1);
}
