use crate::errors::CollectorError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

/// Cumulative I/O counter per live process, keyed by process handle.
pub type IoSnapshot = HashMap<String, u64>;

/// Source of the activity proxy watched by the idle detector.
#[async_trait]
pub trait ProcessIoSource: Send + Sync {
    async fn snapshot(&mut self) -> Result<IoSnapshot, CollectorError>;
}

/// Reads the process table through `sysinfo`. The counter is the sum of bytes
/// read and written over the lifetime of each process.
pub struct SysinfoIoSource {
    system: Arc<Mutex<System>>,
}

impl SysinfoIoSource {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }
}

impl Default for SysinfoIoSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessIoSource for SysinfoIoSource {
    async fn snapshot(&mut self) -> Result<IoSnapshot, CollectorError> {
        let system = Arc::clone(&self.system);

        tokio::task::spawn_blocking(move || {
            // a panic while refreshing leaves the table usable for the next scrape
            let mut system = system.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            system.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::nothing().with_disk_usage(),
            );

            system
                .processes()
                .iter()
                .map(|(pid, process)| {
                    let io = process.disk_usage();
                    (
                        pid.to_string(),
                        io.total_read_bytes.saturating_add(io.total_written_bytes),
                    )
                })
                .collect()
        })
        .await
        .map_err(|e| CollectorError::DataSource(format!("process table refresh failed: {}", e)))
    }
}
