//! Virtual Time Tests
//!
//! The bubble clock only moves when every task is durably blocked, and
//! then jumps straight to the earliest pending deadline.
//!
//! Key properties being tested:
//! - Time never advances while any task can still make progress
//! - Equal deadlines fire in one advance, in task-id order
//! - Same program (and seed) = same clock advances and poll order

use futures::StreamExt;
use parking_lot::Mutex;
use proptest::prelude::*;
use quiesce::{
    Bubble, BubbleConfig, BubbleReport, Error, TaskId, TimeProvider, Verdict, WallClockTime,
};
use std::sync::Arc;
use std::time::Duration;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Three workers with staggered sleeps and a shared log
fn staggered_run(config: BubbleConfig) -> BubbleReport {
    let (_, report) = Bubble::new(config)
        .run_with_report(|cx| async move {
            let log = Arc::new(Mutex::new(Vec::new()));
            let mut handles = Vec::new();
            for (worker, delay) in [(1u64, 30u64), (2, 10), (3, 30)] {
                let log = log.clone();
                let worker_cx = cx.clone();
                handles.push(cx.spawn(async move {
                    for round in 0..3u64 {
                        worker_cx.sleep(ms(delay)).await;
                        log.lock().push((worker, round, worker_cx.elapsed()));
                        worker_cx.yield_now().await;
                    }
                })?);
            }
            for handle in handles {
                handle.await.expect("worker");
            }
            Ok(())
        })
        .unwrap();
    report
}

/// Test: Sleep Takes No Real Time
#[test]
fn test_hour_long_sleep_is_instant() {
    let started = std::time::Instant::now();
    let elapsed = quiesce::run(|cx| async move {
        cx.sleep(Duration::from_secs(3600)).await;
        Ok(cx.elapsed())
    })
    .unwrap();

    assert_eq!(elapsed, Duration::from_secs(3600));
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// Test: No Advance While A Task Is Runnable
///
/// A busy task yields a hundred times while another task holds a 1ms timer.
/// The clock stays at zero until the busy task is done.
#[test]
fn test_no_advance_while_runnable() {
    let (seen, report) = Bubble::new(BubbleConfig::default())
        .run_with_report(|cx| async move {
            let sleeper_cx = cx.clone();
            let sleeper = cx.spawn(async move {
                sleeper_cx.sleep(ms(1)).await;
                sleeper_cx.elapsed()
            })?;

            let mut seen = Vec::new();
            for _ in 0..100 {
                seen.push(cx.elapsed());
                cx.yield_now().await;
            }
            assert_eq!(sleeper.await.expect("sleeper"), ms(1));
            Ok(seen)
        })
        .unwrap();

    assert!(seen.iter().all(|t| *t == Duration::ZERO));
    assert_eq!(report.advance_times(), vec![ms(1)]);
}

/// Test: Timer Ties Fire Together In Task-Id Order
///
/// Task 2 registers its 100ms timer first; task 1 registers the same
/// deadline later, at t=50ms. Both fire in the same advance, task 1 first.
#[test]
fn test_equal_deadlines_fire_in_task_order() {
    let (order, report) = Bubble::new(BubbleConfig::default())
        .run_with_report(|cx| async move {
            let order = Arc::new(Mutex::new(Vec::new()));

            let (first_cx, first_order) = (cx.clone(), order.clone());
            let first = cx.spawn(async move {
                first_cx.sleep(ms(50)).await;
                first_cx.sleep_until(ms(100)).await;
                first_order.lock().push("first");
            })?;

            let (second_cx, second_order) = (cx.clone(), order.clone());
            let second = cx.spawn(async move {
                second_cx.sleep_until(ms(100)).await;
                second_order.lock().push("second");
            })?;

            first.await.expect("first");
            second.await.expect("second");
            let order = order.lock().clone();
            Ok(order)
        })
        .unwrap();

    assert_eq!(order, vec!["first", "second"]);
    assert_eq!(report.advance_times(), vec![ms(50), ms(100)]);
    assert_eq!(report.advances[1].woken, vec![TaskId(1), TaskId(2)]);
}

/// Test: Ticker Ticks Once Per Period
#[test]
fn test_ticker_ticks_in_virtual_time() {
    let (ticks, report) = Bubble::new(BubbleConfig::default())
        .run_with_report(|cx| async move {
            let ticker = cx.ticker(ms(100));
            let ticks: Vec<_> = ticker.take(3).collect().await;
            Ok(ticks)
        })
        .unwrap();

    assert_eq!(ticks.len(), 3);
    assert_eq!(
        (ticks[2] - ticks[0]).num_milliseconds(),
        200,
        "ticks are one period apart"
    );
    assert_eq!(report.advance_times(), vec![ms(100), ms(200), ms(300)]);
}

/// Test: Timeout Against A Sleep
#[test]
fn test_timeout_in_virtual_time() {
    quiesce::run(|cx| async move {
        let slow = cx.timeout(ms(10), cx.sleep(ms(50))).await;
        let elapsed = slow.unwrap_err();
        assert_eq!(elapsed.deadline(), ms(10));
        assert_eq!(cx.elapsed(), ms(10));

        let fast = cx.timeout(ms(50), cx.sleep(ms(5))).await;
        assert!(fast.is_ok());
        assert_eq!(cx.elapsed(), ms(15));
        Ok(())
    })
    .unwrap();
}

/// Test: Identical Runs Produce Identical Reports
#[test]
fn test_fifo_runs_are_reproducible() {
    let first = staggered_run(BubbleConfig::default());
    let second = staggered_run(BubbleConfig::default());

    assert_eq!(first.verdict, Verdict::Closed);
    assert_eq!(first.advances, second.advances);
    assert_eq!(first.schedule, second.schedule);
    assert_eq!(first.steps, second.steps);
    assert_eq!(first.elapsed, ms(90));
}

/// Test: Seeded Runs Are Reproducible Per Seed
///
/// Re-run with `QUIESCE_SEED=<seed>` to replay a schedule.
#[test]
fn test_seeded_runs_are_reproducible() {
    for seed in [0u64, 1, 42, 12345] {
        let first = staggered_run(BubbleConfig::default().with_seed(seed));
        let second = staggered_run(BubbleConfig::default().with_seed(seed));

        assert_eq!(first.schedule, second.schedule, "seed {}", seed);
        assert_eq!(first.advances, second.advances, "seed {}", seed);
        // Shuffling the run queue never changes what the clock does
        assert_eq!(first.advance_times(), vec![ms(10), ms(20), ms(30), ms(60), ms(90)]);
    }
}

/// Test: Time Budget
#[test]
fn test_time_budget_exceeded() {
    let result = Bubble::new(BubbleConfig::default().with_max_time_ms(60_000)).run(|cx| async move {
        cx.sleep(Duration::from_secs(30)).await;
        cx.sleep(Duration::from_secs(60)).await;
        Ok(())
    });

    assert!(matches!(
        result,
        Err(Error::TimeExceeded {
            elapsed_ms: 90_000,
            limit_ms: 60_000
        })
    ));
}

/// Test: Step Budget
#[test]
fn test_step_budget_exceeded() {
    let result = Bubble::new(BubbleConfig::default().with_max_steps(50)).run(|cx| async move {
        for _ in 0..1_000 {
            cx.yield_now().await;
        }
        Ok(())
    });

    assert!(matches!(
        result,
        Err(Error::StepsExceeded { steps: 51, limit: 50 })
    ));
}

/// Exponential backoff written against the time abstraction
async fn backoff(time: &dyn TimeProvider, attempts: u32) -> u64 {
    let start = time.now_ms();
    for attempt in 0..attempts {
        time.sleep_ms(10 << attempt).await;
    }
    time.now_ms() - start
}

/// Test: Provider-Generic Code Under Virtual Time
#[test]
fn test_time_provider_in_bubble() {
    let waited = quiesce::run(|cx| async move {
        let time = cx.time_provider();
        Ok(backoff(&time, 4).await)
    })
    .unwrap();

    assert_eq!(waited, 150);
}

/// Test: Provider-Generic Code Under Paused Tokio Time
#[tokio::test(start_paused = true)]
async fn test_time_provider_on_wall_clock() {
    let started = tokio::time::Instant::now();
    backoff(&WallClockTime::new(), 3).await;
    assert!(started.elapsed() >= ms(70));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The clock visits each distinct deadline once, in order, and tasks
    /// finish ordered by deadline then spawn order
    #[test]
    fn prop_sleepers_wake_in_deadline_order(delays in prop::collection::vec(1u64..5_000, 1..8)) {
        let spawned = delays.clone();
        let (finished, report) = Bubble::new(BubbleConfig::default())
            .run_with_report(|cx| async move {
                let finished = Arc::new(Mutex::new(Vec::new()));
                let mut handles = Vec::new();
                for (index, delay) in spawned.into_iter().enumerate() {
                    let (task_cx, finished) = (cx.clone(), finished.clone());
                    handles.push(cx.spawn(async move {
                        task_cx.sleep(ms(delay)).await;
                        finished.lock().push(index);
                    })?);
                }
                for handle in handles {
                    handle.await.expect("sleeper");
                }
                Ok(finished)
            })
            .unwrap();

        let mut expected_times: Vec<Duration> = delays.iter().map(|d| ms(*d)).collect();
        expected_times.sort();
        expected_times.dedup();
        prop_assert_eq!(report.advance_times(), expected_times);

        let mut expected_order: Vec<usize> = (0..delays.len()).collect();
        expected_order.sort_by_key(|i| (delays[*i], *i));
        prop_assert_eq!(finished.lock().clone(), expected_order);
    }
}
