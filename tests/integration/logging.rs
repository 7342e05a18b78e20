//! Integration tests for logging and tracing

use bulk_fetcher::events::{EventBus, EventKind, LoggingObserver};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[test]
fn test_tracing_subscriber_initialization() {
    // Using try_init to avoid error if already initialized
    let result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bulk_fetcher=debug")),
        )
        .with_test_writer()
        .try_init();

    // Either succeeds or fails because already initialized (both are OK)
    assert!(result.is_ok() || result.is_err());
}

#[test]
fn test_tracing_json_format() {
    let result = tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new("bulk_fetcher=info"))
        .with_test_writer()
        .try_init();

    assert!(result.is_ok() || result.is_err());
}

#[test]
fn test_structured_logging_fields() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("bulk_fetcher=debug"))
        .with_test_writer()
        .try_init();

    let category = "daily";
    let key = "600000.SH";
    let retry_count = 2;

    tracing::warn!(
        category = %category,
        key = %key,
        retry_count = retry_count,
        "Re-enqueueing after failed attempt"
    );
}

#[test]
fn test_logging_observer_handles_every_event() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("bulk_fetcher=debug"))
        .with_test_writer()
        .try_init();

    let bus = EventBus::new();
    LoggingObserver.attach(&bus);

    let span = tracing::info_span!("pool_run", pool = "test");
    let _enter = span.enter();
    for kind in EventKind::ALL {
        let attributes = json!({
            "category": "daily",
            "key": "000001.SZ",
            "reason": "upstream returned 502",
            "processed_count": 1,
            "total_count": 1,
        });
        let attributes = attributes.as_object().cloned().unwrap_or_default();
        assert_eq!(bus.publish_kind(kind, "pool", attributes), 1);
    }
}
