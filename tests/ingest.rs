use aqi_forecast::{
    data::store::ReadingStore, error::AqiError, pipeline::ingest_with,
    util::test_util::setup_test_tracing,
};
use common::{start, test_config, until_days, ScriptedProvider, StalledProvider};
use tempfile::tempdir;
use tracing::info;

mod common;

#[tokio::test]
async fn test_second_identical_ingest_adds_nothing() {
    let _guards = setup_test_tracing("second_identical_ingest");
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let provider = ScriptedProvider::new();

    let first = ingest_with(&config, &provider, until_days(25)).await.unwrap();
    info!("First ingest: {:?}", first);
    assert_eq!(first.windows_total, 5);
    assert_eq!(first.windows_fetched, 5);
    // Adjacent windows overlap; the overlap is not duplicated and nothing past `until` is kept.
    assert_eq!(first.new_rows, 25 * 24 + 1);
    assert!(!first.is_partial());

    let second = ingest_with(&config, &provider, until_days(25)).await.unwrap();
    assert_eq!(second.new_rows, 0);

    let stored = ReadingStore::new(config.readings_path()).load().unwrap();
    assert_eq!(stored.len(), 25 * 24 + 1);
    assert!(stored.iter().all(|r| r.aqi.is_some()));
}

#[tokio::test]
async fn test_failure_keeps_earlier_windows_and_stops() {
    let _guards = setup_test_tracing("failure_keeps_earlier_windows");
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let provider = ScriptedProvider::failing_on(3);

    let report = ingest_with(&config, &provider, until_days(25)).await.unwrap();
    assert!(report.is_partial());
    assert_eq!(report.windows_total, 5);
    assert_eq!(report.windows_fetched, 2);
    assert_eq!(provider.calls(), 3);

    let requested = provider.requested();
    assert_eq!(requested.len(), 3);
    assert_eq!(requested[0].start, start());
    assert_eq!(requested[2].start, until_days(10));

    let stored = ReadingStore::new(config.readings_path()).load_sorted().unwrap();
    assert_eq!(stored.len(), report.new_rows);
    assert_eq!(stored.first().unwrap().timestamp, start());
    assert_eq!(
        stored.last().unwrap().timestamp,
        until_days(10) + chrono::Duration::hours(1)
    );

    // A later successful run fills the rest without duplicating anything.
    let retry = ingest_with(&config, &ScriptedProvider::new(), until_days(25))
        .await
        .unwrap();
    assert_eq!(retry.new_rows, 25 * 24 + 1 - stored.len());
}

#[tokio::test]
async fn test_unusable_record_fails_its_window_only() {
    let _guards = setup_test_tracing("unusable_record_fails_window");
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let provider = ScriptedProvider::corrupting_on(3);

    let report = ingest_with(&config, &provider, until_days(25)).await.unwrap();
    assert!(report.is_partial());
    assert_eq!(report.windows_fetched, 2);
    assert_eq!(provider.calls(), 3);
    assert!(report
        .failure
        .as_deref()
        .unwrap()
        .contains("Invalid provider timestamp"));

    // Windows 1 and 2 are stored; nothing from the corrupt window is.
    let stored = ReadingStore::new(config.readings_path()).load_sorted().unwrap();
    assert_eq!(stored.len(), report.new_rows);
    assert_eq!(stored.len(), 10 * 24 + 2);
    assert_eq!(
        stored.last().unwrap().timestamp,
        until_days(10) + chrono::Duration::hours(1)
    );
}

#[tokio::test]
async fn test_records_after_until_are_skipped() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let until = until_days(2) + chrono::Duration::minutes(30);
    let report = ingest_with(&config, &ScriptedProvider::new(), until)
        .await
        .unwrap();
    // Hourly records up to and including 2025-06-03T00:00.
    assert_eq!(report.new_rows, 2 * 24 + 1);
    let stored = ReadingStore::new(config.readings_path()).load().unwrap();
    assert!(stored.iter().all(|r| r.timestamp <= until));
}

#[tokio::test]
async fn test_stalled_provider_times_out() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let report = ingest_with(&config, &StalledProvider, until_days(10))
        .await
        .unwrap();
    assert!(report.is_partial());
    assert_eq!(report.windows_fetched, 0);
    assert_eq!(report.new_rows, 0);
    let failure = report.failure.unwrap();
    assert!(failure.contains("timed out"), "{}", failure);
}

#[tokio::test]
async fn test_missing_api_key_blocks_real_client() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let result = aqi_forecast::data::provider::OpenWeatherClient::new(&config);
    assert!(matches!(result, Err(AqiError::MissingApiKey(_))));
}
