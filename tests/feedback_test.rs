//! Feedback store: pattern quality, source throttling, trends and sessions

use crawlkeeper::config::FeedbackConfig;
use crawlkeeper::crawl_engine::ErrorKind;
use crawlkeeper::feedback::{FeedbackStore, Trend, generalize};
use crawlkeeper::identity::DedupIndex;
use crawlkeeper::pipeline::{Candidate, DiscoveryGate, GateDecision};
use std::sync::Arc;

fn store() -> FeedbackStore {
    FeedbackStore::in_memory(FeedbackConfig::default())
}

/// `total` outcomes for `/{prefix}/{i}`, the first `ok` of them successful
fn record(store: &FeedbackStore, prefix: &str, source: &str, total: usize, ok: usize) {
    for i in 0..total {
        let url = format!("https://uconn.edu/{prefix}/{i}");
        if i < ok {
            store.record_validation(&url, source, true, Some(200), None);
        } else {
            store.record_validation(&url, source, false, Some(404), None);
        }
    }
}

#[test]
fn test_low_quality_requires_ten_samples() {
    let store = store();
    record(&store, "events", "links", 10, 3);
    record(&store, "news", "links", 9, 0);
    record(&store, "people", "links", 12, 6);

    let low = store.get_low_quality_patterns(10, 0.3);
    assert_eq!(low, vec!["uconn.edu/events/{num}".to_string()]);
    assert!(store.is_low_quality("https://uconn.edu/events/999"));
    assert!(!store.is_low_quality("https://uconn.edu/news/1"));
    assert!(!store.is_low_quality("https://uconn.edu/people/1"));

    // The looser call-site thresholds are just parameters
    let loose = store.get_low_quality_patterns(5, 0.4);
    assert!(loose.contains(&"uconn.edu/news/{num}".to_string()));
}

#[test]
fn test_source_throttling() {
    let store = store();
    record(&store, "a", "guessing", 50, 20);
    record(&store, "b", "sitemap", 50, 45);
    record(&store, "c", "rare", 49, 0);

    assert!(store.should_throttle("guessing"));
    assert!(!store.should_throttle("sitemap"));
    assert!(!store.should_throttle("rare"));
    assert!(store.should_throttle_source("rare", 10, 0.4));

    let report = store.quality_report();
    assert_eq!(report.throttled_sources, vec!["guessing".to_string()]);
    assert_eq!(report.sources[0].stats.source, "sitemap");
}

#[test]
fn test_failure_types_tallied() {
    let store = store();
    store.record_validation("https://uconn.edu/x", "links", false, Some(503), None);
    store.record_validation("https://uconn.edu/y", "links", false, None, Some(ErrorKind::Dns));
    store.record_validation("https://uconn.edu/z", "links", false, Some(429), None);
    store.record_validation("https://uconn.edu/w", "links", false, Some(410), None);

    let stats = store.source_stats("links").unwrap();
    assert_eq!(stats.total_failed, 4);
    assert_eq!(stats.success_rate, 0.0);
    for kind in ["transient_network", "dns", "rate_limited", "permanent_client"] {
        assert_eq!(stats.failure_types.get(kind), Some(&1), "{kind}");
    }
}

#[test]
fn test_trend_across_sessions() {
    let store = store();
    assert_eq!(store.source_trend("links"), Trend::InsufficientData);

    for ok in [2, 3, 7, 9] {
        store.start_session();
        record(&store, "page", "links", 10, ok);
        store.end_session();
    }
    assert_eq!(store.source_trend("links"), Trend::Improving);
    assert_eq!(store.session_history().len(), 4);

    for ok in [1, 1, 1, 1] {
        store.start_session();
        record(&store, "page", "links", 10, ok);
        store.end_session();
    }
    assert_eq!(store.source_trend("links"), Trend::Declining);
}

#[test]
fn test_stable_trend() {
    let store = store();
    for _ in 0..4 {
        store.start_session();
        record(&store, "page", "links", 10, 5);
        store.end_session();
    }
    assert_eq!(store.source_trend("links"), Trend::Stable);
}

#[test]
fn test_gate_uses_feedback() {
    let feedback = Arc::new(store());
    record(&feedback, "calendar", "crawler", 10, 0);
    record(&feedback, "dept", "crawler", 6, 6);
    let gate = DiscoveryGate::new(Arc::new(DedupIndex::new()), Arc::clone(&feedback));

    assert!(matches!(
        gate.admit(&Candidate::new("https://uconn.edu/calendar/2024", "crawler", 0.8)),
        GateDecision::LowQualityPattern { .. }
    ));
    match gate.admit(&Candidate::new("https://uconn.edu/dept/42", "crawler", 0.6)) {
        GateDecision::Admitted(admitted) => {
            assert!((admitted.confidence - 0.8).abs() < 1e-9);
        }
        other => panic!("expected admission, got {other:?}"),
    }
    assert_eq!(
        feedback
            .pattern_stats(&generalize("https://uconn.edu/dept/42"))
            .unwrap()
            .total_discovered,
        1
    );
}

#[tokio::test]
async fn test_persisted_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("feedback.json");
    {
        let store = FeedbackStore::open(&path, FeedbackConfig::default()).await.unwrap();
        store.start_session();
        record(&store, "events", "links", 10, 1);
        store.end_session();
        store.save().await.unwrap();
    }

    let store = FeedbackStore::open(&path, FeedbackConfig::default()).await.unwrap();
    assert!(store.is_low_quality("https://uconn.edu/events/5"));
    assert_eq!(store.session_history().len(), 1);
    assert!(store.data().last_updated.is_some());

    store.reset();
    assert!(store.source_stats("links").is_none());
}
