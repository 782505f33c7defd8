use std::sync::Arc;
use std::time::Duration;

use tim_the_enchanter::{
    metadata, ContextId, Enchanter, EnchanterConfig, ManualClock, Metadata, PercentileMode,
    Report, ReportFormat, ReportOptions, Renderer, Snapshot, StopPolicy, StructuredReport,
    TimingError, TimingResult,
};

fn manual(config: EnchanterConfig) -> (Enchanter, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let enchanter = Enchanter::with_clock(config, clock.clone()).unwrap();
    (enchanter, clock)
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[test]
fn parse_tokenize_nests_in_hierarchical_report() {
    let (enchanter, clock) = manual(EnchanterConfig::default());

    let parse = enchanter.start("parse").unwrap();
    clock.advance(ms(1));
    let tokenize = enchanter.start("tokenize").unwrap();
    clock.advance(ms(4));
    let tok_event = enchanter.stop(&tokenize).unwrap();
    clock.advance(ms(2));
    let parse_event = enchanter.stop(&parse).unwrap();

    assert_eq!(tok_event.parent, Some(parse_event.id));
    assert!(parse_event.duration >= tok_event.duration);

    let report = enchanter
        .report(ReportFormat::Hierarchical, &ReportOptions::default())
        .unwrap();
    let text = report.as_text().unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines[1].starts_with("parse  1×  total 7.00ms"), "{text}");
    assert!(lines[2].starts_with("└─ tokenize  1×  total 4.00ms"), "{text}");
}

#[test]
fn count_matches_completed_events() {
    let (enchanter, clock) = manual(EnchanterConfig::default());
    for i in 0..7 {
        let outer = enchanter.start("outer").unwrap();
        for _ in 0..i {
            let inner = enchanter.start("inner").unwrap();
            clock.advance(ms(1));
            enchanter.stop(&inner).unwrap();
        }
        enchanter.stop(&outer).unwrap();
    }

    let doc = enchanter
        .report(ReportFormat::Structured, &ReportOptions::default())
        .unwrap();
    let json = doc.as_json().unwrap();
    assert_eq!(json["stats"]["outer"]["count"], 7);
    assert_eq!(json["stats"]["inner"]["count"], 21);
}

#[test]
fn event_duration_is_end_minus_start() {
    let (enchanter, clock) = manual(EnchanterConfig::default());
    clock.advance(ms(3));
    let h = enchanter.start("x").unwrap();
    clock.advance(Duration::from_micros(1_234));
    let event = enchanter.stop(&h).unwrap();
    assert_eq!(event.duration, event.end - event.start);
    assert_eq!(event.duration, Duration::from_micros(1_234));
}

#[test]
fn stopping_twice_is_unknown_handle() {
    let enchanter = Enchanter::default();
    let h = enchanter.start("twice").unwrap();
    enchanter.stop(&h).unwrap();
    match enchanter.stop(&h) {
        Err(TimingError::UnknownHandle { name, .. }) => assert_eq!(name, "twice"),
        other => panic!("expected UnknownHandle, got {other:?}"),
    }
}

#[test]
fn strict_mode_rejects_out_of_order_stop() {
    let enchanter = Enchanter::default();
    let outer = enchanter.start("outer").unwrap();
    let _inner = enchanter.start("inner").unwrap();
    assert!(matches!(
        enchanter.stop(&outer),
        Err(TimingError::OutOfOrderStop { .. })
    ));
    assert_eq!(enchanter.currently_open(), vec!["outer", "inner"]);
}

#[test]
fn permissive_mode_closes_and_marks_abandoned() {
    let config = EnchanterConfig::default().with_stop_policy(StopPolicy::AutoClose);
    let (enchanter, clock) = manual(config);
    let outer = enchanter.start("outer").unwrap();
    clock.advance(ms(1));
    let _inner = enchanter.start("inner").unwrap();
    clock.advance(ms(1));

    let closed = enchanter.stop(&outer).unwrap();
    assert!(!closed.abandoned);
    assert!(enchanter.currently_open().is_empty());

    let snap = enchanter.snapshot();
    let inner = snap.events.iter().find(|e| e.name == "inner").unwrap();
    assert!(inner.abandoned);
    assert_eq!(inner.end, closed.end);
    assert_eq!(snap.stats["inner"].abandoned, 1);
}

#[test]
fn reset_yields_empty_reports() {
    let enchanter = Enchanter::default();
    enchanter.time("before", || ()).unwrap();
    let _open = enchanter.start("still_open").unwrap();
    enchanter.reset();

    assert!(enchanter.currently_open().is_empty());
    for format in ReportFormat::ALL {
        let report = enchanter.report(format, &ReportOptions::default()).unwrap();
        match report {
            Report::Structured(value) => {
                let doc = StructuredReport::from_value(value).unwrap();
                assert!(doc.stats.is_empty());
                assert!(doc.open.is_empty());
            }
            Report::Text(text) => assert!(text.contains("No timing data recorded."), "{text}"),
        }
    }
}

#[test]
fn unknown_format_is_unsupported() {
    let enchanter = Enchanter::default();
    enchanter.time("x", || ()).unwrap();
    assert!(matches!(
        enchanter.report("csv", &ReportOptions::default()),
        Err(TimingError::UnsupportedFormat(f)) if f == "csv"
    ));
    assert!(enchanter.report("PLAIN_TEXT", &ReportOptions::default()).is_ok());
}

#[test]
fn custom_format_can_be_registered() {
    struct Csv;
    impl Renderer for Csv {
        fn id(&self) -> &str {
            "csv"
        }
        fn render(&self, snapshot: &Snapshot, _: &ReportOptions) -> TimingResult<Report> {
            let mut out = String::from("name,count,total_ns\n");
            for s in snapshot.stats.values() {
                out.push_str(&format!("{},{},{}\n", s.name, s.count, s.total.as_nanos()));
            }
            Ok(Report::Text(out))
        }
    }

    let (enchanter, clock) = manual(EnchanterConfig::default());
    enchanter
        .time("io", || clock.advance(Duration::from_nanos(500)))
        .unwrap();
    enchanter.register_format(Arc::new(Csv));

    let report = enchanter.report("csv", &ReportOptions::default()).unwrap();
    assert_eq!(report.to_string(), "name,count,total_ns\nio,1,500\n");
    assert!(enchanter.formats().contains(&"csv".to_string()));
}

#[test]
fn structured_round_trip_matches_snapshot() {
    let (enchanter, clock) = manual(EnchanterConfig::default());
    for n in [3u64, 1, 4, 1, 5, 9, 2, 6] {
        let h = enchanter.start("digits").unwrap();
        clock.advance(Duration::from_micros(n * 111));
        enchanter.stop(&h).unwrap();
    }

    let live = enchanter.snapshot();
    let text = enchanter
        .report(ReportFormat::Structured, &ReportOptions::default().with_events())
        .unwrap()
        .to_string();
    let parsed = StructuredReport::from_json_str(&text).unwrap();

    let (a, b) = (&live.stats["digits"], &parsed.stats["digits"]);
    assert_eq!(a.count, b.count);
    assert_eq!(a.min, b.min);
    assert_eq!(a.max, b.max);
    assert_eq!(a.mean, b.mean);
    for (pa, pb) in a.percentiles.iter().zip(&b.percentiles) {
        let (x, y) = (pa.value.as_nanos() as f64, pb.value.as_nanos() as f64);
        assert!((x - y).abs() <= x * 0.001);
    }
    assert_eq!(parsed.events.len(), 8);
}

#[test]
fn exact_percentiles_when_configured() {
    let config = EnchanterConfig::default().with_percentile_mode(PercentileMode::Exact);
    let (enchanter, _) = manual(config);
    for n in 1..=100u64 {
        enchanter
            .record("sample", Duration::from_millis(n), Metadata::new())
            .unwrap();
    }
    let stats = &enchanter.snapshot().stats["sample"];
    assert_eq!(stats.percentile(50.0), Some(ms(50)));
    assert_eq!(stats.percentile(90.0), Some(ms(90)));
    assert_eq!(stats.percentile(99.0), Some(ms(99)));
}

#[test]
fn single_event_stats_collapse() {
    let (enchanter, clock) = manual(EnchanterConfig::default());
    enchanter.time("once", || clock.advance(ms(5))).unwrap();
    let stats = &enchanter.snapshot().stats["once"];
    assert_eq!(stats.count, 1);
    assert_eq!(stats.min, stats.max);
    assert_eq!(stats.mean, stats.min);
    assert!(stats.percentiles.iter().all(|p| p.value == ms(5)));
}

#[test]
fn invalid_metadata_is_rejected_at_start() {
    let enchanter = Enchanter::default();
    let err = enchanter
        .start_with("bad", metadata! { "score" => f64::NAN })
        .unwrap_err();
    assert!(matches!(err, TimingError::InvalidMetadata(_)));
    assert!(enchanter.currently_open().is_empty());
}

#[test]
fn handle_can_be_stopped_from_another_thread() {
    let enchanter = Enchanter::default();
    let ctx = ContextId::fresh();
    let h = enchanter.start_in(ctx, "handoff", Metadata::new()).unwrap();

    let remote = enchanter.clone();
    std::thread::spawn(move || remote.stop(&h).unwrap())
        .join()
        .unwrap();

    assert!(enchanter.currently_open_in(ctx).is_empty());
    assert_eq!(enchanter.snapshot().stats["handoff"].count, 1);
}

#[test]
fn chronological_report_lists_events_in_start_order() {
    let (enchanter, clock) = manual(EnchanterConfig::default());
    let a = enchanter.start_with("request", metadata! { "path" => "/" }).unwrap();
    clock.advance(ms(1));
    enchanter.time("auth", || clock.advance(ms(2))).unwrap();
    enchanter.stop(&a).unwrap();

    let text = enchanter
        .report(ReportFormat::Chronological, &ReportOptions::default())
        .unwrap()
        .to_string();
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines[1].contains("request  3.00ms  {path=/}"), "{text}");
    assert!(lines[2].contains("1.00ms    auth  2.00ms"), "{text}");
}
