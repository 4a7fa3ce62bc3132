use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use stream_patterns::{
    discard, farm, filter, keep, map_reduce, pipeline, reduce, ExecutionPolicy, PatternError,
    QueueMode, Result as PatternResult,
};

fn numbers(limit: u64) -> impl FnMut() -> Option<u64> + Send + 'static {
    let mut next = 0;
    move || {
        next += 1;
        (next <= limit).then_some(next)
    }
}

/// Uneven per-item work so replicas finish out of order
fn jitter(x: u64) {
    thread::sleep(Duration::from_micros((x * 7919 % 13) * 40));
}

/// Run `job` on its own thread and fail the test if it does not return in time
fn within_timeout<T: Send + 'static>(job: impl FnOnce() -> T + Send + 'static) -> T {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(job());
    });
    rx.recv_timeout(Duration::from_secs(30))
        .expect("pattern invocation did not finish in time")
}

fn policies(degree: usize, ordered: bool) -> Vec<ExecutionPolicy> {
    vec![
        ExecutionPolicy::new(degree, ordered),
        ExecutionPolicy::new(degree, ordered).with_queue_mode(QueueMode::LockFree),
        ExecutionPolicy::new(degree, ordered).with_queue_capacity(1),
        ExecutionPolicy::new(degree, ordered).unbounded_queues(),
    ]
}

#[test]
fn test_ordered_farm_doubles_in_order() {
    let policy = ExecutionPolicy::new(4, true);
    let out = pipeline(&policy, numbers(10))
        .farm(farm(&policy, |x: u64| {
            jitter(x);
            x * 2
        }))
        .collect()
        .expect("Pipeline failed");
    assert_eq!(out, (1..=10).map(|x| x * 2).collect::<Vec<_>>());
}

#[test]
fn test_order_fidelity_across_degrees_and_queues() {
    for degree in [1, 2, 3, 8] {
        for policy in policies(degree, true) {
            let out = within_timeout({
                let policy = policy.clone();
                move || {
                    pipeline(&policy, numbers(200))
                        .farm(farm(&policy, |x: u64| {
                            jitter(x);
                            x + 1000
                        }))
                        .collect()
                }
            })
            .expect("Pipeline failed");
            assert_eq!(
                out,
                (1..=200).map(|x| x + 1000).collect::<Vec<_>>(),
                "policy = {:?}",
                policy
            );
        }
    }
}

#[test]
fn test_filter_holes_never_reach_consumer() {
    let policy = ExecutionPolicy::new(3, true);
    let out = pipeline(&policy, numbers(10))
        .keep(filter(&policy, |x: &u64| {
            jitter(*x);
            x % 2 == 0
        }))
        .collect()
        .expect("Pipeline failed");
    assert_eq!(out, vec![2, 4, 6, 8, 10]);
}

#[test]
fn test_keep_and_discard_entry_points() {
    for policy in policies(3, true) {
        let mut kept = Vec::new();
        keep(&policy, numbers(30), |x| x % 3 == 0, |x| kept.push(x)).expect("keep failed");
        assert_eq!(kept, (1..=30).filter(|x| x % 3 == 0).collect::<Vec<_>>());

        let mut rest = Vec::new();
        discard(&policy, numbers(30), |x| x % 3 == 0, |x| rest.push(x)).expect("discard failed");
        assert_eq!(rest, (1..=30).filter(|x| x % 3 != 0).collect::<Vec<_>>());
    }
}

#[test]
fn test_unordered_completeness() {
    for policy in policies(4, false) {
        let mut out = within_timeout({
            let policy = policy.clone();
            move || {
                pipeline(&policy, numbers(500))
                    .farm(farm(&policy, |x: u64| {
                        jitter(x);
                        x * 3
                    }))
                    .keep(filter(&policy, |x: &u64| x % 2 == 0))
                    .collect()
            }
        })
        .expect("Pipeline failed");
        out.sort_unstable();
        let expected: Vec<u64> = (1..=500).map(|x| x * 3).filter(|x| x % 2 == 0).collect();
        assert_eq!(out, expected, "policy = {:?}", policy);
    }
}

#[test]
fn test_multi_stage_pipeline_mixed_ordering() {
    let outer = ExecutionPolicy::new(2, true);
    let ordered_farm = ExecutionPolicy::new(4, true);
    let unordered_farm = ExecutionPolicy::new(5, false);

    let out = pipeline(&outer, numbers(300))
        .then(|x| x as i64)
        .farm(farm(&ordered_farm, |x: i64| {
            jitter(x as u64);
            x - 1
        }))
        .discard(filter(&unordered_farm, |x: &i64| x % 5 == 0))
        .farm(farm(&unordered_farm, |x: i64| {
            jitter(x as u64);
            format!("#{}", x)
        }))
        .then(|s: String| s.len())
        .collect()
        .expect("Pipeline failed");

    let expected: Vec<usize> = (0..300i64)
        .filter(|x| x % 5 != 0)
        .map(|x| format!("#{}", x).len())
        .collect();
    assert_eq!(out, expected);
}

#[test]
fn test_every_worker_terminates() {
    for degree in 1..=16 {
        let report = within_timeout(move || {
            let policy = ExecutionPolicy::new(degree, true).with_queue_capacity(2);
            pipeline(&policy, numbers(64))
                .farm(farm(&policy, |x: u64| x))
                .keep(filter(&policy, |_: &u64| true))
                .run(|_| {})
        })
        .expect("Pipeline failed");
        assert_eq!(report.consumed, 64);
        assert_eq!(report.stages[0].replicas, degree);
        assert_eq!(report.stages[0].metrics.total_processed, 64);
    }
}

#[test]
fn test_more_workers_than_items() {
    let policy = ExecutionPolicy::new(12, true);
    let out = pipeline(&policy, numbers(3))
        .farm(farm(&policy, |x: u64| x * 10))
        .collect()
        .expect("Pipeline failed");
    assert_eq!(out, vec![10, 20, 30]);
}

#[test]
fn test_transformer_panic_is_reported() {
    for policy in policies(4, true) {
        let delivered = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&delivered);
        let result = within_timeout(move || {
            pipeline(&policy, numbers(1000))
                .farm(
                    farm(&policy, |x: u64| {
                        if x == 500 {
                            panic!("cannot handle 500");
                        }
                        x
                    })
                    .named("picky"),
                )
                .run(move |_| {
                    seen.fetch_add(1, Ordering::Relaxed);
                })
        });

        match result {
            Err(PatternError::CallablePanicked { stage, message }) => {
                assert_eq!(stage, "picky");
                assert_eq!(message, "cannot handle 500");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(delivered.load(Ordering::Relaxed) < 1000);
    }
}

#[test]
fn test_generator_panic_is_reported() {
    let result: PatternResult<Vec<u64>> = within_timeout(|| {
        let policy = ExecutionPolicy::new(3, true);
        let mut next = 0u64;
        pipeline(&policy, move || {
            next += 1;
            if next == 50 {
                panic!("source exhausted unexpectedly");
            }
            Some(next)
        })
        .farm(farm(&policy, |x: u64| x))
        .collect()
    });
    assert!(matches!(
        result,
        Err(PatternError::CallablePanicked { ref stage, .. }) if stage == "generator"
    ));
}

#[test]
fn test_consumer_panic_is_reported() {
    let result = within_timeout(|| {
        let policy = ExecutionPolicy::new(2, true).with_queue_capacity(4);
        pipeline(&policy, numbers(10_000))
            .farm(farm(&policy, |x: u64| x))
            .run(|x| {
                if x == 10 {
                    panic!("consumer gave up");
                }
            })
    });
    match result {
        Err(PatternError::CallablePanicked { stage, message }) => {
            assert_eq!(stage, "consumer");
            assert_eq!(message, "consumer gave up");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_invalid_degree_spawns_nothing() {
    let policy = ExecutionPolicy::new(0, true);
    let generated = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&generated);
    let result = pipeline(&policy, move || {
        counter.fetch_add(1, Ordering::Relaxed);
        None::<u64>
    })
    .collect();
    assert!(matches!(result, Err(PatternError::InvalidConcurrency(0))));
    assert_eq!(generated.load(Ordering::Relaxed), 0);
}

#[test]
fn test_word_count_pipeline() {
    let text = "the quick brown fox jumps over the lazy dog the end";
    let mut words = text.split_whitespace().map(str::to_string).collect::<Vec<_>>().into_iter();
    let policy = ExecutionPolicy::new(3, false);

    let mut counts: HashMap<String, usize> = HashMap::new();
    pipeline(&policy, move || words.next())
        .farm(farm(&policy, |w: String| w.to_uppercase()))
        .run(|w| *counts.entry(w).or_default() += 1)
        .expect("Pipeline failed");

    assert_eq!(counts["THE"], 3);
    assert_eq!(counts["FOX"], 1);
    assert_eq!(counts.values().sum::<usize>(), 11);
}

#[test]
fn test_reduce_and_map_reduce() {
    let n = 10_000u64;
    let input: Vec<u64> = (1..=n).collect();
    for degree in [1, 2, 5, 16] {
        let policy = ExecutionPolicy::new(degree, true);
        assert_eq!(reduce(&policy, &input, 0, |a, b| a + b).unwrap(), n * (n + 1) / 2);
        assert_eq!(
            map_reduce(&policy, &input, 0, |x| x % 7, |a, b| a + b).unwrap(),
            input.iter().map(|x| x % 7).sum::<u64>()
        );
    }
}

#[test]
fn test_report_counts_backpressure_blocks() {
    let policy = ExecutionPolicy::new(2, true).with_queue_capacity(1);
    let report = within_timeout(move || {
        pipeline(&policy, numbers(50))
            .farm(farm(&policy, |x: u64| x).named("fast"))
            .run(|_| thread::sleep(Duration::from_micros(200)))
    })
    .expect("Pipeline failed");
    assert_eq!(report.consumed, 50);
    assert!(report.stages[0].metrics.total_blocks >= 1);
    assert!(report.summary().contains("Blocks:"));
}

#[test]
fn test_sliding_window_moving_average() {
    for policy in policies(3, true) {
        let averages = within_timeout({
            let policy = policy.clone();
            move || {
                pipeline(&policy, numbers(40))
                    .farm(farm(&policy, |x: u64| {
                        jitter(x);
                        x as f64
                    }))
                    .window(4, 1)
                    .then(|w: Vec<f64>| w.iter().sum::<f64>() / w.len() as f64)
                    .collect()
            }
        })
        .expect("Pipeline failed");
        let expected: Vec<f64> = (1..=37).map(|i| i as f64 + 1.5).collect();
        assert_eq!(averages, expected, "policy = {:?}", policy);
    }
}
