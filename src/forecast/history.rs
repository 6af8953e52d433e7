use std::{cmp::Reverse, fs::File, path::Path};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument};

use crate::{
    data::store::ensure_parent,
    error::AqiError,
    forecast::forecaster::{parse_timestamp, ForecastTable, TIMESTAMP_FORMAT},
    util::date_utils::days_apart,
};

const RUN_DATE_COLUMN: &str = "forecast_run_date";
const DAYS_AHEAD_COLUMN: &str = "days_ahead";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// One target hour as forecast by one run.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    /// One entry per predictor column of the owning table. `None` when that run
    /// had no such predictor.
    pub predictions: Vec<Option<f64>>,
    pub forecast_run_date: NaiveDate,
    pub days_ahead: i64,
}

/// The longitudinal forecast record, at most one row per target timestamp.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForecastHistory {
    pub predictors: Vec<String>,
    pub records: Vec<HistoryRecord>,
}

impl ForecastHistory {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, timestamp: DateTime<Utc>) -> Option<&HistoryRecord> {
        self.records.iter().find(|r| r.timestamp == timestamp)
    }

    pub fn prediction(&self, record: &HistoryRecord, predictor: &str) -> Option<f64> {
        let column = self.predictors.iter().position(|p| p == predictor)?;
        record.predictions.get(column).copied().flatten()
    }

    /// Re-indexes `record`'s predictions from `from` column order into `self`'s.
    fn align(&self, from: &[String], record: HistoryRecord) -> HistoryRecord {
        let predictions = self
            .predictors
            .iter()
            .map(|name| {
                from.iter()
                    .position(|p| p == name)
                    .and_then(|i| record.predictions.get(i).copied().flatten())
            })
            .collect();
        HistoryRecord {
            predictions,
            ..record
        }
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), AqiError> {
        let path = path.as_ref();
        ensure_parent(path)?;
        let mut writer = csv::Writer::from_writer(File::create(path)?);
        let mut header = vec!["timestamp"];
        header.extend(self.predictors.iter().map(String::as_str));
        header.extend([RUN_DATE_COLUMN, DAYS_AHEAD_COLUMN]);
        writer.write_record(&header)?;
        for record in &self.records {
            let mut row = vec![record.timestamp.format(TIMESTAMP_FORMAT).to_string()];
            row.extend(
                record
                    .predictions
                    .iter()
                    .map(|p| p.map(|v| v.to_string()).unwrap_or_default()),
            );
            row.push(record.forecast_run_date.format(DATE_FORMAT).to_string());
            row.push(record.days_ahead.to_string());
            writer.write_record(&row)?;
        }
        writer.flush()?;
        info!("Wrote {} history rows to {}", self.len(), path.display());
        Ok(())
    }

    /// Reads a history file. A missing or empty file is an empty history.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, AqiError> {
        let path = path.as_ref();
        if std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true) {
            return Ok(Self::default());
        }
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let n = headers.len();
        if n < 3
            || headers.get(0) != Some("timestamp")
            || headers.get(n - 2) != Some(RUN_DATE_COLUMN)
            || headers.get(n - 1) != Some(DAYS_AHEAD_COLUMN)
        {
            return Err(AqiError::InvalidHistory(format!(
                "unexpected header {:?}",
                headers
            )));
        }
        let predictors: Vec<String> = headers
            .iter()
            .skip(1)
            .take(n - 3)
            .map(str::to_string)
            .collect();

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            let predictions = (1..n - 2)
                .map(|i| parse_optional(&row[i]))
                .collect::<Result<Vec<_>, _>>()?;
            let days_ahead = row[n - 1].parse::<i64>().map_err(|e| {
                AqiError::InvalidHistory(format!("bad days_ahead {:?}: {}", &row[n - 1], e))
            })?;
            records.push(HistoryRecord {
                timestamp: parse_timestamp(&row[0])?,
                predictions,
                forecast_run_date: NaiveDate::parse_from_str(&row[n - 2], DATE_FORMAT)?,
                days_ahead,
            });
        }
        debug!("Loaded {} history rows", records.len());
        Ok(Self {
            predictors,
            records,
        })
    }
}

fn parse_optional(cell: &str) -> Result<Option<f64>, AqiError> {
    if cell.is_empty() {
        return Ok(None);
    }
    cell.parse::<f64>()
        .map(Some)
        .map_err(|e| AqiError::InvalidHistory(format!("bad prediction {:?}: {}", cell, e)))
}

/// Tags every row of a forecast run with its run date and distance to target.
pub fn tag_run(run: &ForecastTable, run_date: NaiveDate) -> Vec<HistoryRecord> {
    run.timestamps
        .iter()
        .enumerate()
        .map(|(i, ts)| HistoryRecord {
            timestamp: *ts,
            predictions: run.columns.iter().map(|(_, values)| values.get(i).copied()).collect(),
            forecast_run_date: run_date,
            days_ahead: days_apart(ts.date_naive(), run_date),
        })
        .collect()
}

/**
Merge a new forecast run into the history.

Rows are ordered by `(timestamp, days_ahead)` and, among equally close forecasts, by
the latest run date first; the first row per timestamp survives. When both the run
date and the distance tie, the new run replaces the stored row.

## Arguments
* `existing` - The current history (possibly empty).
* `run` - The wide forecast table just produced.
* `run_date` - The local calendar date the run executed.
 */
#[instrument(skip(existing, run), fields(existing = existing.len(), new = run.len()))]
pub fn reconcile(
    existing: ForecastHistory,
    run: &ForecastTable,
    run_date: NaiveDate,
) -> ForecastHistory {
    let run_names: Vec<String> = run.names().into_iter().map(str::to_string).collect();
    let mut predictors = existing.predictors.clone();
    for name in &run_names {
        if !predictors.contains(name) {
            predictors.push(name.clone());
        }
    }
    let mut merged = ForecastHistory {
        predictors,
        records: Vec::new(),
    };

    let mut rows: Vec<HistoryRecord> = tag_run(run, run_date)
        .into_iter()
        .map(|r| merged.align(&run_names, r))
        .collect();
    rows.extend(
        existing
            .records
            .into_iter()
            .map(|r| merged.align(&existing.predictors, r)),
    );

    rows.sort_by_key(|r| (r.timestamp, r.days_ahead, Reverse(r.forecast_run_date)));
    rows.dedup_by_key(|r| r.timestamp);

    info!("History now holds {} target hours", rows.len());
    merged.records = rows;
    merged
}
