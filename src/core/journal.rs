use crate::core::events::Event;
use crate::BoxedError;
use log::warn;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable append-only event log
///
/// One JSON record per line, in publish order. Appends are best-effort from
/// the bus's point of view: a failed write is reported to the caller, who
/// logs it and keeps delivering.
pub struct EventJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl EventJournal {
    /// Open (or create) a journal file for appending
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BoxedError> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path this journal writes to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a newline-delimited JSON record
    pub fn append(&self, event: &Event) -> Result<(), BoxedError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| format!("journal lock poisoned: {}", self.path.display()))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Read every record of a journal in original order
    ///
    /// Malformed lines are skipped with a warning rather than aborting the
    /// read; replay favors degraded recovery over failing outright.
    pub fn read_all(path: &Path) -> Result<Vec<Event>, BoxedError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let mut events = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    "skipping malformed journal record {}:{}: {}",
                    path.display(),
                    index + 1,
                    e
                ),
            }
        }
        Ok(events)
    }
}
