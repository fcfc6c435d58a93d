use crate::errors::CollectorError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
enum Clock {
    Wall,
    Pinned(DateTime<Utc>),
}

/// Data shared by every collector for the duration of one scrape.
///
/// Built fresh by the exporter at the start of a scrape and dropped at its end.
/// Collectors only read from it; the procfs cache is filled lazily so a file
/// needed by several collectors is read once per scrape.
#[derive(Debug)]
pub struct ScrapeContext {
    id: u64,
    clock: Clock,
    procfs_root: PathBuf,
    proc_files: Mutex<HashMap<String, Arc<str>>>,
}

impl ScrapeContext {
    pub fn new(id: u64, procfs_root: impl Into<PathBuf>) -> Self {
        Self::build(id, procfs_root.into(), Clock::Wall)
    }

    /// Context whose clock always reads `at`.
    pub fn with_clock(id: u64, procfs_root: impl Into<PathBuf>, at: DateTime<Utc>) -> Self {
        Self::build(id, procfs_root.into(), Clock::Pinned(at))
    }

    fn build(id: u64, procfs_root: PathBuf, clock: Clock) -> Self {
        Self {
            id,
            clock,
            procfs_root,
            proc_files: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wall-clock time at the moment of the call, unless the clock is pinned.
    ///
    /// Read it after the data it timestamps has been gathered: a collector may
    /// have waited for its lock or its source well past the scrape start.
    pub fn now_millis(&self) -> i64 {
        match self.clock {
            Clock::Wall => Utc::now().timestamp_millis(),
            Clock::Pinned(at) => at.timestamp_millis(),
        }
    }

    /// Read a file below the procfs root, e.g. `"stat"` or `"meminfo"`.
    /// Failed reads are not cached.
    pub async fn read_proc(&self, relative: &str) -> Result<Arc<str>, CollectorError> {
        let mut files = self.proc_files.lock().await;
        if let Some(content) = files.get(relative) {
            return Ok(Arc::clone(content));
        }

        let path = self.procfs_root.join(relative);
        let content: Arc<str> = fs::read_to_string(&path)
            .await
            .map_err(|e| CollectorError::ProcReadError {
                path: path.display().to_string(),
                source: e,
            })?
            .into();

        files.insert(relative.to_string(), Arc::clone(&content));
        Ok(content)
    }
}
