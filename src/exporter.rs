use crate::context::ScrapeContext;
use crate::dispatcher::{Dispatcher, ScrapeReport};
use crate::errors::EncodeError;
use crate::metrics;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Ties a dispatcher to the exposition format: one call, one scrape.
pub struct Exporter {
    dispatcher: Dispatcher,
    procfs_root: PathBuf,
    scrapes: AtomicU64,
}

impl Exporter {
    pub fn new(dispatcher: Dispatcher, procfs_root: impl Into<PathBuf>) -> Self {
        Self {
            dispatcher,
            procfs_root: procfs_root.into(),
            scrapes: AtomicU64::new(0),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run every collector once and render what they emitted.
    ///
    /// Collector failures do not fail the scrape; they show up in the report and
    /// in the `infra_exporter_collector_success` meta-metric.
    pub async fn scrape(&self) -> Result<(String, ScrapeReport), EncodeError> {
        let id = self.scrapes.fetch_add(1, Ordering::Relaxed) + 1;
        let ctx = Arc::new(ScrapeContext::new(id, self.procfs_root.clone()));
        let (sink, mut stream) = metrics::channel();

        let report = self.dispatcher.run_scrape(ctx, &sink).await;
        let body = metrics::encode(stream.drain())?;
        Ok((body, report))
    }
}
