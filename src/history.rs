//! Bounded caption history kept in a JSON file.
//!
//! The file holds an array of [`HistoryEntry`], oldest first. Every append rewrites the
//! whole file with only the newest `limit` entries.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime, SubsecRound};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::HistoryError;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// ISO 8601 with microseconds, used on disk, in the API and in downloads.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    #[serde(with = "iso_timestamp")]
    pub timestamp: NaiveDateTime,
    /// Base64 of the uploaded image file.
    pub image_data: String,
    pub caption: String,
}

impl HistoryEntry {
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn download_text(&self) -> String {
        format!(
            "Generated Caption:\n{}\n\nGenerated on: {}",
            self.caption,
            self.timestamp_iso()
        )
    }

    pub fn download_name(&self) -> String {
        let id = self.id.to_string();
        format!("caption_{}.txt", &id[..8])
    }
}

mod iso_timestamp {
    use chrono::NaiveDateTime;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(timestamp: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&timestamp.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f").map_err(D::Error::custom)
    }
}

pub struct HistoryStore {
    path: PathBuf,
    limit: usize,
    lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new<P: Into<PathBuf>>(path: P, limit: usize) -> Self {
        Self {
            path: path.into(),
            limit,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, image_data: String, caption: String) -> Result<HistoryEntry, HistoryError> {
        let entry = HistoryEntry {
            id: Uuid::new_v4(),
            timestamp: Local::now().naive_local().trunc_subsecs(6),
            image_data,
            caption,
        };

        let _guard = self.lock.lock();
        let mut entries = self.read()?;
        entries.push(entry.clone());
        if entries.len() > self.limit {
            let excess = entries.len() - self.limit;
            entries.drain(..excess);
        }
        self.write(&entries)?;
        debug!(id = %entry.id, kept = entries.len(), "appended history entry");
        Ok(entry)
    }

    pub fn entries(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let _guard = self.lock.lock();
        self.read()
    }

    /// Unknown and malformed ids are both simply not found.
    pub fn get(&self, id: &str) -> Result<Option<HistoryEntry>, HistoryError> {
        let id = match Uuid::parse_str(id) {
            Ok(id) => id,
            Err(_) => return Ok(None),
        };
        Ok(self.entries()?.into_iter().find(|entry| entry.id == id))
    }

    pub fn clear(&self) -> Result<(), HistoryError> {
        let _guard = self.lock.lock();
        self.write(&[])
    }

    fn read(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(ref err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };
        serde_json::from_str(&text).map_err(|source| HistoryError::Json {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
        let json = serde_json::to_vec(entries).map_err(|source| HistoryError::Json {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }

    fn io_error(&self, source: io::Error) -> HistoryError {
        HistoryError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
