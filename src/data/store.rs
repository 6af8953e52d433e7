use std::{
    collections::HashSet,
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::{data::reading::Reading, error::AqiError};

/// CSV-backed append-only reading table keyed by timestamp.
#[derive(Debug, Clone)]
pub struct ReadingStore {
    path: PathBuf,
}

impl ReadingStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn has_content(&self) -> bool {
        fs::metadata(&self.path)
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }

    /// Loads every persisted reading in file order. A missing file is an empty store.
    pub fn load(&self) -> Result<Vec<Reading>, AqiError> {
        if !self.has_content() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)?;
        let readings = reader
            .deserialize()
            .collect::<Result<Vec<Reading>, csv::Error>>()?;
        debug!("Loaded {} readings from {}", readings.len(), self.path.display());
        Ok(readings)
    }

    /// Loads all readings sorted by timestamp ascending.
    pub fn load_sorted(&self) -> Result<Vec<Reading>, AqiError> {
        let mut readings = self.load()?;
        readings.sort_by_key(|r| r.timestamp);
        Ok(readings)
    }

    pub fn timestamps(&self) -> Result<HashSet<DateTime<Utc>>, AqiError> {
        Ok(self.load()?.into_iter().map(|r| r.timestamp).collect())
    }

    /// Appends rows, writing the header only when the file is new or empty.
    #[instrument(skip(self, readings), fields(path = %self.path.display(), count = readings.len()))]
    pub fn append(&self, readings: &[Reading]) -> Result<(), AqiError> {
        if readings.is_empty() {
            return Ok(());
        }
        ensure_parent(&self.path)?;
        let write_header = !self.has_content();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);
        for reading in readings {
            writer.serialize(reading)?;
        }
        writer.flush()?;
        info!("Appended {} readings", readings.len());
        Ok(())
    }

    /// Replaces the whole file with `readings`.
    pub fn rewrite(&self, readings: &[Reading]) -> Result<(), AqiError> {
        ensure_parent(&self.path)?;
        let mut writer = csv::Writer::from_writer(File::create(&self.path)?);
        for reading in readings {
            writer.serialize(reading)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Recomputes the AQI column of every persisted row and rewrites the file.
    ///
    /// Returns the number of rows whose AQI changed.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn renormalize(&self) -> Result<usize, AqiError> {
        let mut readings = self.load()?;
        if readings.is_empty() {
            return Ok(0);
        }
        let mut changed = 0;
        for reading in readings.iter_mut() {
            let before = reading.aqi;
            reading.normalize();
            if reading.aqi != before {
                changed += 1;
            }
        }
        self.rewrite(&readings)?;
        info!(
            "AQI recomputed for {} rows ({} changed)",
            readings.len(),
            changed
        );
        Ok(changed)
    }
}

pub(crate) fn ensure_parent(path: &Path) -> Result<(), AqiError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
