//! Integration tests for the scan-and-analyze pipeline

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use dmk_common::events::DmkEvent;
use dmk_common::resilience::{CircuitConfig, CircuitState, RetryPolicy};
use dmk_hd::services::{AnalysisError, DensityAnalyzer, LocalFileSource};
use dmk_hd::workflow::{analyze_bytes, scan_and_analyze};
use dmk_hd::{HighlightPipeline, PipelineConfig, PipelineError, Position};
use helpers::{burst_document, DanmakuDoc, MemorySource, BASE_EPOCH_MS};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        },
        max_concurrent_files: 1,
        ..PipelineConfig::default()
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<DmkEvent>) -> Vec<DmkEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn test_burst_round_trip_yields_single_peak() {
    let bytes = burst_document().bytes();
    let analyzer = DensityAnalyzer::new().with_window(30.0, 5.0).unwrap();

    let analysis = analyze_bytes(&bytes, "burst.xml", &analyzer).unwrap();
    assert_eq!(analysis.recording.total_count, 20);
    assert_eq!(analysis.peaks.len(), 1);

    let peak = &analysis.peaks[0];
    assert_eq!(peak.start_time, 150.0);
    assert_eq!(peak.end_time, 180.0);
    assert_eq!(peak.count, 11);
    assert_eq!(peak.dominant_position, Position::Scroll);
    assert_eq!(peak.start_absolute_time.timestamp_millis(), BASE_EPOCH_MS + 150_000);
    assert_eq!(peak.end_absolute_time.timestamp_millis(), BASE_EPOCH_MS + 177_000);
}

#[test]
fn test_epoch_in_elapsed_field_fails_only_that_file() {
    let xml = r#"<i><d p="1,1,25,1,1700000000000">a</d><d p="2000000000,1,25,1,1700000000000">swapped</d></i>"#;
    let analyzer = DensityAnalyzer::new();

    match analyze_bytes(xml.as_bytes(), "swapped.xml", &analyzer) {
        Err(PipelineError::Analysis(AnalysisError::TooManyWindows { required, .. })) => {
            assert!(required > 100_000.0)
        }
        other => panic!("expected TooManyWindows, got {:?}", other.map(|a| a.peaks)),
    }
}

#[tokio::test]
async fn test_local_scan_records_failures_and_continues() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let channel_dir = root.join("Streamer-Channel");
    std::fs::create_dir_all(channel_dir.join("older")).unwrap();

    std::fs::write(
        channel_dir.join("record-20250813-Burst Night!.xml"),
        burst_document().build(),
    )
    .unwrap();
    std::fs::write(
        channel_dir.join("older").join("record-20250101-Quiet.xml"),
        DanmakuDoc::new().message(1.0, 1, "hello").build(),
    )
    .unwrap();
    std::fs::write(root.join("broken.xml"), "<i><d p=\"1,1,25,1,1\">x</i>").unwrap();
    std::fs::write(root.join("feed.xml"), "<rss><channel/></rss>").unwrap();
    std::fs::write(root.join("notes.txt"), "<i><d p=\"1,1,25,1,1\">x</d></i>").unwrap();

    let pipeline =
        HighlightPipeline::new(Arc::new(LocalFileSource::new()), fast_config()).unwrap();
    let mut rx = pipeline.event_bus().subscribe();

    let report = pipeline
        .scan_and_analyze(root.to_str().unwrap(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.progress.total, 4);
    assert_eq!(report.progress.processed, 4);
    assert_eq!(report.progress.succeeded, 2);
    assert_eq!(report.progress.failed, 2);
    assert!(!report.cancelled);

    let burst = report
        .results
        .iter()
        .find(|a| a.recording.source.ends_with("Burst Night!.xml"))
        .unwrap();
    assert_eq!(burst.recording.metadata.channel.as_deref(), Some("Streamer"));
    assert_eq!(burst.recording.metadata.title.as_deref(), Some("Burst Night"));
    assert_eq!(burst.peaks.len(), 1);
    assert_eq!(burst.peaks[0].count, 11);

    let failed: Vec<&str> = report
        .failures
        .iter()
        .map(|f| f.path.rsplit('/').next().unwrap())
        .collect();
    assert_eq!(failed, vec!["broken.xml", "feed.xml"]);

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(DmkEvent::ScanStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(DmkEvent::ScanCompleted { succeeded: 2, failed: 2, cancelled: false, .. })
    ));
    let progress_updates = events
        .iter()
        .filter(|e| matches!(e, DmkEvent::ScanProgress { .. }))
        .count();
    assert_eq!(progress_updates, 4);
}

#[tokio::test]
async fn test_missing_root_fails_scan() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("gone");
    let pipeline =
        HighlightPipeline::new(Arc::new(LocalFileSource::new()), fast_config()).unwrap();

    let result = pipeline
        .scan_and_analyze(missing.to_str().unwrap(), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(PipelineError::Source(_))));
}

#[tokio::test]
async fn test_transient_read_failures_are_retried() {
    let source = Arc::new(
        MemorySource::new()
            .with_file("/rec/a.xml", burst_document().bytes())
            .failing_reads(2),
    );
    let pipeline = HighlightPipeline::new(source.clone(), fast_config()).unwrap();
    let mut rx = pipeline.event_bus().subscribe();

    let report = pipeline
        .scan_and_analyze("/rec", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.progress.succeeded, 1);
    assert_eq!(source.read_calls(), 3);

    let retrying = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, DmkEvent::RetryAttempt { outcome, .. } if outcome == "retrying"))
        .count();
    assert_eq!(retrying, 2);
}

#[tokio::test]
async fn test_retry_exhaustion_is_recorded() {
    let source = Arc::new(
        MemorySource::new()
            .with_file("/rec/a.xml", burst_document().bytes())
            .failing_reads(10),
    );
    let pipeline = HighlightPipeline::new(source.clone(), fast_config()).unwrap();

    let report = pipeline
        .scan_and_analyze("/rec", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.progress.failed, 1);
    assert_eq!(report.progress.processed, 1);
    assert!(report.failures[0].error.contains("3 attempts exhausted"));
    assert_eq!(source.read_calls(), 3);
}

#[tokio::test]
async fn test_open_breaker_defers_remaining_files() {
    let mut source = MemorySource::new();
    for name in ["a", "b", "c", "d"] {
        source = source.with_file(&format!("/rec/{}.xml", name), burst_document().bytes());
    }
    let source = Arc::new(source.failing_reads(100));

    let config = PipelineConfig {
        retry: RetryPolicy {
            max_attempts: 1,
            ..fast_config().retry
        },
        circuit_breaker: CircuitConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_secs(60),
        },
        ..fast_config()
    };
    let pipeline = HighlightPipeline::new(source.clone(), config).unwrap();
    let mut rx = pipeline.event_bus().subscribe();

    let report = pipeline
        .scan_and_analyze("/rec", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.progress.processed, 4);
    assert_eq!(report.progress.failed, 4);
    assert_eq!(source.read_calls(), 2);

    let unavailable = report
        .failures
        .iter()
        .filter(|f| f.error.contains("temporarily unavailable"))
        .count();
    assert_eq!(unavailable, 2);

    let snapshot = pipeline.breaker().snapshot().await;
    assert_eq!(snapshot.state, CircuitState::Open);

    let opened = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, DmkEvent::CircuitStateChanged { to, .. } if to == "open"))
        .count();
    assert_eq!(opened, 1);
}

#[tokio::test]
async fn test_cancelled_scan_processes_nothing() {
    let source = Arc::new(MemorySource::new().with_file("/rec/a.xml", burst_document().bytes()));
    let pipeline = HighlightPipeline::new(source.clone(), fast_config()).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = pipeline.scan_and_analyze("/rec", &cancel).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.progress.processed, 0);
    assert!(report.results.is_empty());
    assert_eq!(source.read_calls(), 0);
}

#[tokio::test]
async fn test_analyze_file_uses_start_time_for_metadata() {
    let doc = DanmakuDoc::new()
        .record_info("Streamer", "Night", "2025-08-13T20:00:00+08:00")
        .message(1.0, 5, "hi");
    let source = Arc::new(MemorySource::new().with_file("/rec/one.xml", doc.bytes()));
    let pipeline = HighlightPipeline::new(source, fast_config()).unwrap();

    let analysis = pipeline.analyze_file("/rec/one.xml").await.unwrap();
    assert_eq!(
        analysis.recording.metadata.start_time.unwrap().timestamp_millis(),
        BASE_EPOCH_MS
    );
    assert_eq!(analysis.stats.top_count, 1);
}

#[tokio::test]
async fn test_convenience_scan_returns_pairs() {
    let source = Arc::new(
        MemorySource::new()
            .with_file("/rec/b.xml", burst_document().bytes())
            .with_file("/rec/sub/a.xml", DanmakuDoc::new().message(1.0, 1, "x").bytes()),
    );

    let pairs = scan_and_analyze(source, "/rec").await.unwrap();
    let sources: Vec<&str> = pairs.iter().map(|(rec, _)| rec.source.as_str()).collect();
    assert_eq!(sources, vec!["/rec/b.xml", "/rec/sub/a.xml"]);
    assert_eq!(pairs[0].1.len(), 1);
    assert!(pairs[1].1.is_empty());
}
