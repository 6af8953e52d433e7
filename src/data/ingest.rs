use std::{collections::HashSet, time::Duration as StdDuration};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use crate::{
    data::{
        provider::AirQualityProvider,
        reading::{ProviderRecord, Reading},
        store::ReadingStore,
    },
    error::AqiError,
    util::date_utils::{fetch_windows, FetchWindow},
};

/// Outcome of one ingest run.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub new_rows: usize,
    pub windows_total: usize,
    pub windows_fetched: usize,
    /// The error that stopped the window loop, if any. Rows fetched before it are kept.
    pub failure: Option<String>,
}

impl IngestReport {
    pub fn is_partial(&self) -> bool {
        self.failure.is_some()
    }
}

/// Pulls provider history window by window into a [`ReadingStore`].
pub struct Ingestor<'a, P: AirQualityProvider> {
    provider: &'a P,
    store: &'a ReadingStore,
    window: Duration,
    timeout: StdDuration,
}

impl<'a, P: AirQualityProvider> Ingestor<'a, P> {
    pub fn new(
        provider: &'a P,
        store: &'a ReadingStore,
        window: Duration,
        timeout: StdDuration,
    ) -> Self {
        Self {
            provider,
            store,
            window,
            timeout,
        }
    }

    /**
    Fetch `[since, until)` in fixed windows and append every reading not yet stored.

    Windows are fetched strictly one after another. The first failing (or timed out)
    window ends the loop; readings from earlier windows are still persisted. A window
    holding a record with an unusable timestamp counts as failed as a whole. Records
    already in the store, repeated within this run, or stamped after `until` are skipped.
    Afterwards the AQI column of the whole store is recomputed.

    ## Returns
    An [`IngestReport`]; `Err` only for local failures (store IO, window layout).
     */
    #[instrument(skip_all, fields(since = %since, until = %until))]
    pub async fn ingest(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<IngestReport, AqiError> {
        let windows = fetch_windows(since, until, self.window)?;
        let mut seen = self.store.timestamps()?;
        info!(
            "Ingesting {} windows ({} readings already stored)",
            windows.len(),
            seen.len()
        );

        let mut new_readings = Vec::new();
        let mut windows_fetched = 0;
        let mut failure = None;

        for window in &windows {
            let fetched = self
                .fetch_window(window)
                .await
                .and_then(|records| parse_records(&records));
            let readings = match fetched {
                Ok(readings) => readings,
                Err(e) => {
                    warn!("Stopping ingestion at window {}: {}", window, e);
                    failure = Some(e.to_string());
                    break;
                }
            };
            windows_fetched += 1;

            let before = new_readings.len();
            collect_new(readings, until, &mut seen, &mut new_readings);
            debug!("Window {}: {} new readings", window, new_readings.len() - before);
        }

        self.store.append(&new_readings)?;
        self.store.renormalize()?;

        let report = IngestReport {
            new_rows: new_readings.len(),
            windows_total: windows.len(),
            windows_fetched,
            failure,
        };
        info!(
            "Ingestion finished: {} new rows from {}/{} windows",
            report.new_rows, report.windows_fetched, report.windows_total
        );
        Ok(report)
    }

    async fn fetch_window(
        &self,
        window: &FetchWindow,
    ) -> Result<Vec<ProviderRecord>, AqiError> {
        match tokio::time::timeout(self.timeout, self.provider.fetch(window)).await {
            Ok(result) => result,
            Err(_) => Err(AqiError::FetchTimeout {
                window: window.to_string(),
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}

/// Converts a whole window, failing on the first unusable record.
fn parse_records(records: &[ProviderRecord]) -> Result<Vec<Reading>, AqiError> {
    records.iter().map(Reading::from_record).collect()
}

fn collect_new(
    readings: Vec<Reading>,
    until: DateTime<Utc>,
    seen: &mut HashSet<DateTime<Utc>>,
    out: &mut Vec<Reading>,
) {
    for reading in readings {
        if reading.timestamp > until || !seen.insert(reading.timestamp) {
            continue;
        }
        out.push(reading);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::reading::{Components, ProviderMain};
    use chrono::TimeZone;

    fn record(dt: i64) -> ProviderRecord {
        ProviderRecord {
            dt,
            main: ProviderMain { aqi: Some(2) },
            components: Components {
                pm2_5: Some(10.0),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_collect_new_skips_seen_and_future() {
        let until = Utc.timestamp_opt(10_800, 0).unwrap();
        let mut seen = HashSet::from([Utc.timestamp_opt(0, 0).unwrap()]);
        let mut out = Vec::new();
        let records = vec![record(0), record(3600), record(3600), record(10_800), record(14_400)];
        collect_new(parse_records(&records).unwrap(), until, &mut seen, &mut out);
        let stamps: Vec<i64> = out.iter().map(|r| r.timestamp.timestamp()).collect();
        assert_eq!(stamps, vec![3600, 10_800]);
        assert!(out.iter().all(|r| r.aqi.is_none()));
    }

    #[test]
    fn test_parse_records_fails_on_bad_timestamp() {
        let records = vec![record(0), record(i64::MAX), record(3600)];
        assert!(matches!(
            parse_records(&records),
            Err(AqiError::InvalidTimestamp(i64::MAX))
        ));
    }
}
