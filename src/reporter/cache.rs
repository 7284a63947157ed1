use crate::ledger::VisitorRecord;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Local stand-in for the ledger when it cannot be reached.
///
/// Entries are keyed by `ip` and ordered most recently seen first. Once
/// `capacity` is exceeded the oldest entries are dropped.
pub trait VisitorCache {
    fn upsert(&self, record: VisitorRecord) -> Result<()>;
    fn entries(&self) -> Result<Vec<VisitorRecord>>;
    fn clear(&self) -> Result<()>;
}

fn merge(mut entries: Vec<VisitorRecord>, record: VisitorRecord, capacity: usize) -> Vec<VisitorRecord> {
    let merged = match entries.iter().position(|entry| entry.ip == record.ip) {
        Some(index) => {
            let existing = entries.remove(index);
            VisitorRecord {
                browser: record.browser,
                os: record.os,
                battery_level: record.battery_level,
                last_visit: record.last_visit.max(existing.last_visit),
                visit_count: existing.visit_count.saturating_add(1),
                ..existing
            }
        }
        None => record,
    };

    entries.insert(0, merged);
    entries.truncate(capacity.max(1));
    entries
}

#[derive(Debug)]
pub struct JsonFileCache {
    path: PathBuf,
    capacity: usize,
}

impl JsonFileCache {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, entries: &[VisitorRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create fallback directory: {}", parent.display())
            })?;
        }

        let content =
            serde_json::to_string_pretty(entries).context("Failed to serialize fallback store")?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write fallback store: {}", self.path.display()))
    }

    fn read_content(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read fallback store: {}", self.path.display()))?;

        Ok(Some(content).filter(|content| !content.trim().is_empty()))
    }
}

impl VisitorCache for JsonFileCache {
    /// An unparsable store is replaced rather than blocking the write.
    fn upsert(&self, record: VisitorRecord) -> Result<()> {
        let current = match self.read_content()? {
            Some(content) => serde_json::from_str(&content).unwrap_or_else(|error| {
                warn!(
                    error = %error,
                    path = %self.path.display(),
                    "fallback store unparsable; starting a new one"
                );
                Vec::new()
            }),
            None => Vec::new(),
        };

        self.write(&merge(current, record, self.capacity))
    }

    fn entries(&self) -> Result<Vec<VisitorRecord>> {
        match self.read_content()? {
            Some(content) => serde_json::from_str(&content).with_context(|| {
                format!("Failed to parse fallback store: {}", self.path.display())
            }),
            None => Ok(Vec::new()),
        }
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error).with_context(|| {
                format!("Failed to remove fallback store: {}", self.path.display())
            }),
        }
    }
}

/// In-process store for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryCache {
    capacity: usize,
    entries: std::sync::Mutex<Vec<VisitorRecord>>,
}

#[cfg(test)]
impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl VisitorCache for MemoryCache {
    fn upsert(&self, record: VisitorRecord) -> Result<()> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("fallback store lock poisoned"))?;
        let current = std::mem::take(&mut *guard);
        *guard = merge(current, record, self.capacity);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<VisitorRecord>> {
        self.entries
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| anyhow::anyhow!("fallback store lock poisoned"))
    }

    fn clear(&self) -> Result<()> {
        self.entries
            .lock()
            .map(|mut guard| guard.clear())
            .map_err(|_| anyhow::anyhow!("fallback store lock poisoned"))
    }
}
