pub mod cpu;
pub mod idle;
pub mod memory;
pub mod process_io;

use crate::context::ScrapeContext;
use crate::errors::{CollectorError, RegistryError};
use crate::metrics::{Desc, MetricSink};
use crate::registry::Registry;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait Collector: Send + Sync {
    /// name of the collector as used in the registry and meta-metrics
    fn name(&self) -> &'static str;

    /// descriptors of every metric this collector may emit.
    /// Validated once, when the registry builds the collector.
    fn describe(&self) -> Vec<Arc<Desc>>;

    /// gather one snapshot and push its samples into the sink.
    ///
    /// Emitting nothing is a valid outcome. Never called concurrently with
    /// itself: the dispatcher serializes invocations per instance.
    async fn collect(
        &mut self,
        ctx: &ScrapeContext,
        sink: &MetricSink,
    ) -> Result<(), CollectorError>;
}

/// Options resolved from the command line before any factory runs.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub procfs_root: PathBuf,
    pub idle_threshold: Duration,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            procfs_root: PathBuf::from("/proc"),
            idle_threshold: Duration::from_secs(idle::DEFAULT_IDLE_THRESHOLD_SECS),
        }
    }
}

/// Builds one collector instance.
pub type Factory = fn(&CollectorSettings) -> Result<Box<dyn Collector>, CollectorError>;

/// Register every collector compiled into this binary.
pub fn register_builtin(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register(cpu::NAME, cpu::factory)?;
    registry.register(idle::NAME, idle::factory)?;
    registry.register(memory::NAME, memory::factory)?;
    Ok(())
}
