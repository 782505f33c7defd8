use std::sync::{Arc, Barrier};
use std::thread;

use tim_the_enchanter::{
    ContextId, Enchanter, EnchanterConfig, Metadata, PercentileMode, ReportFormat, ReportOptions,
};

#[test]
fn thousand_threads_worth_of_pairs_count_exactly() {
    let enchanter = Enchanter::default();
    let barrier = Arc::new(Barrier::new(10));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let enchanter = enchanter.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..100 {
                    let h = enchanter.start("shared").unwrap();
                    enchanter.stop(&h).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let doc = enchanter
        .report(ReportFormat::Structured, &ReportOptions::default())
        .unwrap();
    assert_eq!(doc.as_json().unwrap()["stats"]["shared"]["count"], 1000);
}

#[test]
fn thousand_contexts_interleave_without_interference() {
    let config = EnchanterConfig::default()
        .with_percentile_mode(PercentileMode::Reservoir { capacity: 128 });
    let enchanter = Enchanter::new(config).unwrap();

    // Each of the 1000 contexts nests two spans; threads share contexts
    // round-robin so stacks are touched from many threads.
    let contexts: Arc<Vec<ContextId>> = Arc::new((0..1000).map(|_| ContextId::fresh()).collect());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let enchanter = enchanter.clone();
            let contexts = Arc::clone(&contexts);
            thread::spawn(move || {
                for ctx in contexts.iter().skip(t).step_by(8) {
                    let outer = enchanter.start_in(*ctx, "outer", Metadata::new()).unwrap();
                    let inner = enchanter.start_in(*ctx, "inner", Metadata::new()).unwrap();
                    assert_eq!(enchanter.currently_open_in(*ctx), vec!["outer", "inner"]);
                    enchanter.stop(&inner).unwrap();
                    enchanter.stop(&outer).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let snap = enchanter.snapshot();
    assert_eq!(snap.stats["outer"].count, 1000);
    assert_eq!(snap.stats["inner"].count, 1000);
    assert!(snap.open.is_empty());
    assert!(snap
        .events
        .iter()
        .filter(|e| e.name == "inner")
        .all(|e| e.parent.is_some()));
}

#[test]
fn snapshots_taken_during_writes_are_consistent() {
    let enchanter = Enchanter::default();
    let writer = {
        let enchanter = enchanter.clone();
        thread::spawn(move || {
            for _ in 0..2_000 {
                enchanter.time("busy", || ()).unwrap();
            }
        })
    };

    let mut last = 0;
    while !writer.is_finished() {
        let snap = enchanter.snapshot();
        let rows: u64 = snap.stats.values().map(|s| s.count).sum();
        assert_eq!(snap.version, rows);
        // Retained events are never ahead of the aggregates.
        assert!(snap.events.len() as u64 <= rows);
        if let Some(stats) = snap.stats.get("busy") {
            assert!(stats.count >= last);
            assert!(stats.min <= stats.mean && stats.mean <= stats.max);
            last = stats.count;
        }
    }
    writer.join().unwrap();
    assert_eq!(enchanter.snapshot().stats["busy"].count, 2_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn async_tasks_with_their_own_contexts() {
    let enchanter = Enchanter::default();

    let tasks: Vec<_> = (0..1000)
        .map(|_| {
            let enchanter = enchanter.clone();
            tokio::spawn(async move {
                let ctx = ContextId::fresh();
                let request = enchanter.start_in(ctx, "request", Metadata::new()).unwrap();
                enchanter
                    .time_async_in(ctx, "io", tokio::task::yield_now())
                    .await
                    .unwrap();
                enchanter.stop(&request).unwrap();
            })
        })
        .collect();
    for t in tasks {
        t.await.unwrap();
    }

    let snap = enchanter.snapshot();
    assert_eq!(snap.stats["request"].count, 1000);
    assert_eq!(snap.stats["io"].count, 1000);
    assert!(snap.open.is_empty());
}

#[tokio::test]
async fn cancelled_future_still_stops_its_span() {
    let enchanter = Enchanter::default();
    let ctx = ContextId::fresh();

    let slow = enchanter.time_async_in(ctx, "slow", tokio::time::sleep(std::time::Duration::from_secs(60)));
    let result = tokio::time::timeout(std::time::Duration::from_millis(10), slow).await;
    assert!(result.is_err());

    assert!(enchanter.currently_open_in(ctx).is_empty());
    assert_eq!(enchanter.snapshot().stats["slow"].count, 1);
}
