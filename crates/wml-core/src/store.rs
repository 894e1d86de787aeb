use std::{fs, io, path::PathBuf};

use serde::Serialize;

use crate::{domain::IncomingMessageRecord, Result};

/// Crash-safe append-only message log.
///
/// Each append rewrites the whole file: read current log, push the record,
/// write to a temp path, atomically rename over the canonical path. External
/// readers therefore always see either the previous complete log or the new
/// complete one, never a partial write. Single writer assumed.
#[derive(Clone, Debug)]
pub struct PersistenceStore {
    path: PathBuf,
}

/// Result of a read-all query. `error` is populated instead of failing when
/// the canonical file exists but cannot be parsed.
#[derive(Clone, Debug, Default, Serialize)]
pub struct LogSnapshot {
    pub messages: Vec<IncomingMessageRecord>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PersistenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append one record, preserving prior order. An unparsable existing log
    /// is quarantined to `<path>.corrupt` and treated as empty rather than
    /// silently discarded.
    pub fn append(&self, record: &IncomingMessageRecord) -> Result<()> {
        let mut messages = match self.read_log() {
            Ok(messages) => messages,
            Err(e) => {
                eprintln!("[STORE] log unreadable ({e}); quarantining and starting fresh");
                self.quarantine();
                Vec::new()
            }
        };
        messages.push(record.clone());
        self.write_atomic(&messages)
    }

    /// Full ordered log and its count. Missing file is an empty log with no
    /// error; a parse failure surfaces as `error` with an empty log.
    pub fn read_all(&self) -> LogSnapshot {
        match self.read_log() {
            Ok(messages) => LogSnapshot {
                count: messages.len(),
                messages,
                error: None,
            },
            Err(e) => LogSnapshot {
                messages: Vec::new(),
                count: 0,
                error: Some(e.to_string()),
            },
        }
    }

    fn read_log(&self) -> Result<Vec<IncomingMessageRecord>> {
        let txt = match fs::read_to_string(&self.path) {
            Ok(txt) => txt,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if txt.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&txt)?)
    }

    fn quarantine(&self) {
        let corrupt = PathBuf::from(format!("{}.corrupt", self.path.display()));
        if let Err(e) = fs::rename(&self.path, &corrupt) {
            eprintln!("[STORE] failed to quarantine corrupt log: {e}");
        }
    }

    fn write_atomic(&self, messages: &[IncomingMessageRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = PathBuf::from(format!("{}.tmp", self.path.display()));
        fs::write(&tmp, serde_json::to_string_pretty(messages)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
