//! Runs one scrape over the active collector set.
//!
//! Every collector runs in its own task under a timeout. A failing, slow or
//! panicking collector only costs its own samples; the others still report.

use crate::collectors::Collector;
use crate::context::ScrapeContext;
use crate::errors::CollectorError;
use crate::metrics::{Desc, MetricSink};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::{self, JoinSet};

pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(5);

/// The lock keeps a collector from being invoked concurrently with itself,
/// even when two scrapes overlap.
type SharedCollector = Arc<Mutex<Box<dyn Collector>>>;

/// What happened to one collector during a scrape.
#[derive(Debug)]
pub struct CollectorOutcome {
    pub name: &'static str,
    pub duration: Duration,
    pub result: Result<(), CollectorError>,
}

impl CollectorOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcomes of one scrape, in configured collector order.
#[derive(Debug, Default)]
pub struct ScrapeReport {
    pub outcomes: Vec<CollectorOutcome>,
}

impl ScrapeReport {
    pub fn failures(&self) -> Vec<(&'static str, &CollectorError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.name, e)))
            .collect()
    }

    /// True when every collector succeeded. A partial scrape is still served.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(CollectorOutcome::is_success)
    }
}

pub struct Dispatcher {
    collectors: Vec<(&'static str, SharedCollector)>,
    timeout: Duration,
    duration_desc: Arc<Desc>,
    success_desc: Arc<Desc>,
}

impl Dispatcher {
    pub fn new(collectors: Vec<Box<dyn Collector>>, timeout: Duration) -> Self {
        Self {
            collectors: collectors
                .into_iter()
                .map(|c| (c.name(), Arc::new(Mutex::new(c))))
                .collect(),
            timeout,
            duration_desc: Desc::gauge(
                "exporter",
                "collector_duration_seconds",
                "Duration of a collection",
                &["collector"],
            ),
            success_desc: Desc::gauge(
                "exporter",
                "collector_success",
                "Whether the collector succeeded",
                &["collector"],
            ),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|(name, _)| *name).collect()
    }

    /// Invoke every collector once, concurrently, and wait for all of them to
    /// return or time out. Collector failures are recorded, never propagated.
    ///
    /// Dropping the returned future aborts the collectors still running.
    pub async fn run_scrape(&self, ctx: Arc<ScrapeContext>, sink: &MetricSink) -> ScrapeReport {
        let scrape_start = Instant::now();

        // dropping the set aborts every task still in it
        let mut tasks = JoinSet::new();
        let mut task_index: HashMap<task::Id, usize> = HashMap::with_capacity(self.collectors.len());
        for (index, (name, collector)) in self.collectors.iter().enumerate() {
            let collector = Arc::clone(collector);
            let ctx = Arc::clone(&ctx);
            let sink = sink.clone();
            let timeout = self.timeout;
            let name = *name;

            let handle = tasks.spawn(async move {
                let start = Instant::now();
                tracing::debug!(collector = name, scrape = ctx.id(), "collecting");
                let result = invoke(collector, &ctx, &sink, timeout).await;
                (index, start.elapsed(), result)
            });
            task_index.insert(handle.id(), index);
        }

        let mut finished: Vec<Option<(Duration, Result<(), CollectorError>)>> =
            (0..self.collectors.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, duration, result)) => finished[index] = Some((duration, result)),
                Err(e) => {
                    // a panicked task never returns its index
                    if let Some(&index) = task_index.get(&e.id()) {
                        finished[index] = Some((
                            scrape_start.elapsed(),
                            Err(CollectorError::Panicked(join_error_message(e))),
                        ));
                    }
                }
            }
        }

        let outcomes = self
            .collectors
            .iter()
            .zip(finished)
            .map(|((name, _), slot)| {
                let (duration, result) = slot.unwrap_or_else(|| {
                    (
                        scrape_start.elapsed(),
                        Err(CollectorError::Panicked("collector task was lost".to_string())),
                    )
                });
                CollectorOutcome {
                    name: *name,
                    duration,
                    result,
                }
            })
            .collect();

        let report = ScrapeReport { outcomes };
        self.report(&ctx, &report, sink);

        tracing::info!(
            scrape = ctx.id(),
            collectors = report.outcomes.len(),
            failed = report.failures().len(),
            duration_ms = scrape_start.elapsed().as_millis() as u64,
            "scrape finished"
        );
        report
    }

    /// Log each outcome and emit the per-collector meta-metrics.
    fn report(&self, ctx: &ScrapeContext, report: &ScrapeReport, sink: &MetricSink) {
        for outcome in &report.outcomes {
            let seconds = outcome.duration.as_secs_f64();
            match &outcome.result {
                Ok(()) => tracing::debug!(
                    collector = outcome.name,
                    scrape = ctx.id(),
                    duration_seconds = seconds,
                    "collector succeeded"
                ),
                Err(e) => tracing::warn!(
                    collector = outcome.name,
                    scrape = ctx.id(),
                    duration_seconds = seconds,
                    error = %e,
                    "collector failed"
                ),
            }

            let success = if outcome.is_success() { 1.0 } else { 0.0 };
            let emitted = sink
                .emit(&self.duration_desc, seconds, &[outcome.name])
                .and_then(|()| sink.emit(&self.success_desc, success, &[outcome.name]));
            if let Err(e) = emitted {
                tracing::debug!(collector = outcome.name, error = %e, "meta-metrics dropped");
            }
        }
    }
}

async fn invoke(
    collector: SharedCollector,
    ctx: &ScrapeContext,
    sink: &MetricSink,
    timeout: Duration,
) -> Result<(), CollectorError> {
    // waiting for a previous, still running invocation counts against the timeout
    let invocation = async {
        let mut collector = collector.lock().await;
        collector.collect(ctx, sink).await
    };

    match tokio::time::timeout(timeout, invocation).await {
        Ok(result) => result,
        Err(_) => Err(CollectorError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

fn join_error_message(e: tokio::task::JoinError) -> String {
    if !e.is_panic() {
        return "collector task was cancelled".to_string();
    }
    panic_message(e.into_panic())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{self, Sample};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Emits a fixed value under its own name.
    struct Fixed {
        name: &'static str,
        value: f64,
        desc: Arc<Desc>,
    }

    impl Fixed {
        fn boxed(name: &'static str, value: f64) -> Box<dyn Collector> {
            Box::new(Self {
                name,
                value,
                desc: Desc::gauge("test", name, "fixed value", &[]),
            })
        }
    }

    #[async_trait]
    impl Collector for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn describe(&self) -> Vec<Arc<Desc>> {
            vec![Arc::clone(&self.desc)]
        }

        async fn collect(
            &mut self,
            _ctx: &ScrapeContext,
            sink: &MetricSink,
        ) -> Result<(), CollectorError> {
            sink.emit(&self.desc, self.value, &[])
        }
    }

    enum Misbehavior {
        Fail,
        Hang,
        Panic,
        Nothing,
    }

    struct Faulty {
        name: &'static str,
        how: Misbehavior,
    }

    #[async_trait]
    impl Collector for Faulty {
        fn name(&self) -> &'static str {
            self.name
        }

        fn describe(&self) -> Vec<Arc<Desc>> {
            Vec::new()
        }

        async fn collect(
            &mut self,
            _ctx: &ScrapeContext,
            _sink: &MetricSink,
        ) -> Result<(), CollectorError> {
            match self.how {
                Misbehavior::Fail => Err(CollectorError::DataSource("access denied".into())),
                Misbehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
                Misbehavior::Panic => panic!("collector blew up"),
                Misbehavior::Nothing => Ok(()),
            }
        }
    }

    fn faulty(name: &'static str, how: Misbehavior) -> Box<dyn Collector> {
        Box::new(Faulty { name, how })
    }

    /// Records the highest number of overlapping invocations.
    struct Overlap {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Collector for Overlap {
        fn name(&self) -> &'static str {
            "overlap"
        }

        fn describe(&self) -> Vec<Arc<Desc>> {
            Vec::new()
        }

        async fn collect(
            &mut self,
            _ctx: &ScrapeContext,
            _sink: &MetricSink,
        ) -> Result<(), CollectorError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Hangs on its first invocation only.
    struct StallOnce {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Collector for StallOnce {
        fn name(&self) -> &'static str {
            "stall_once"
        }

        fn describe(&self) -> Vec<Arc<Desc>> {
            Vec::new()
        }

        async fn collect(
            &mut self,
            _ctx: &ScrapeContext,
            _sink: &MetricSink,
        ) -> Result<(), CollectorError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(())
        }
    }

    fn ctx(id: u64) -> Arc<ScrapeContext> {
        Arc::new(ScrapeContext::new(id, "/proc"))
    }

    fn value_of(samples: &[Sample], fq_name: &str, label: Option<&str>) -> Option<f64> {
        samples
            .iter()
            .find(|s| {
                s.desc.fq_name == fq_name
                    && label.map_or(true, |l| s.label_values.first().map(String::as_str) == Some(l))
            })
            .map(|s| s.value)
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let dispatcher = Dispatcher::new(
            vec![faulty("a", Misbehavior::Fail), Fixed::boxed("b", 42.0)],
            DEFAULT_SCRAPE_TIMEOUT,
        );
        let (sink, mut stream) = metrics::channel();

        let report = dispatcher.run_scrape(ctx(1), &sink).await;
        let samples = stream.drain();

        assert_eq!(value_of(&samples, "infra_test_b", None), Some(42.0));
        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "a");
        assert!(!report.is_success());

        assert_eq!(
            value_of(&samples, "infra_exporter_collector_success", Some("a")),
            Some(0.0)
        );
        assert_eq!(
            value_of(&samples, "infra_exporter_collector_success", Some("b")),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_empty_collection_is_success() {
        let dispatcher = Dispatcher::new(
            vec![faulty("quiet", Misbehavior::Nothing)],
            DEFAULT_SCRAPE_TIMEOUT,
        );
        let (sink, mut stream) = metrics::channel();

        let report = dispatcher.run_scrape(ctx(1), &sink).await;
        assert!(report.is_success());
        assert!(report.failures().is_empty());

        // only the meta-metrics
        assert_eq!(stream.drain().len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_a_collector_failure() {
        let dispatcher = Dispatcher::new(
            vec![faulty("slow", Misbehavior::Hang), Fixed::boxed("fast", 1.0)],
            Duration::from_millis(100),
        );
        let (sink, mut stream) = metrics::channel();

        let started = Instant::now();
        let report = dispatcher.run_scrape(ctx(1), &sink).await;
        assert!(started.elapsed() < Duration::from_secs(10));

        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "slow");
        assert!(matches!(
            failures[0].1,
            CollectorError::Timeout { timeout_ms: 100 }
        ));
        assert_eq!(value_of(&stream.drain(), "infra_test_fast", None), Some(1.0));
    }

    #[tokio::test]
    async fn test_panic_is_a_collector_failure() {
        let dispatcher = Dispatcher::new(
            vec![faulty("boom", Misbehavior::Panic), Fixed::boxed("ok", 1.0)],
            DEFAULT_SCRAPE_TIMEOUT,
        );
        let (sink, mut stream) = metrics::channel();

        let report = dispatcher.run_scrape(ctx(1), &sink).await;
        match &report.outcomes[0].result {
            Err(CollectorError::Panicked(msg)) => assert!(msg.contains("collector blew up")),
            other => panic!("expected Panicked, got {:?}", other),
        }
        assert!(report.outcomes[1].is_success());
        assert_eq!(value_of(&stream.drain(), "infra_test_ok", None), Some(1.0));

        // the collector is still usable on the next scrape
        let report = dispatcher.run_scrape(ctx(2), &sink).await;
        assert!(matches!(
            report.outcomes[0].result,
            Err(CollectorError::Panicked(_))
        ));
    }

    #[tokio::test]
    async fn test_outcomes_follow_configured_order() {
        let dispatcher = Dispatcher::new(
            vec![
                Fixed::boxed("c", 3.0),
                faulty("a", Misbehavior::Fail),
                Fixed::boxed("b", 2.0),
            ],
            DEFAULT_SCRAPE_TIMEOUT,
        );
        let (sink, _stream) = metrics::channel();
        let report = dispatcher.run_scrape(ctx(1), &sink).await;
        let names: Vec<_> = report.outcomes.iter().map(|o| o.name).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert_eq!(dispatcher.names(), names);
    }

    #[tokio::test]
    async fn test_repeated_scrapes_are_identical() {
        let dispatcher = Dispatcher::new(vec![Fixed::boxed("steady", 7.5)], DEFAULT_SCRAPE_TIMEOUT);
        let (sink, mut stream) = metrics::channel();

        dispatcher.run_scrape(ctx(1), &sink).await;
        let first = value_of(&stream.drain(), "infra_test_steady", None);
        dispatcher.run_scrape(ctx(2), &sink).await;
        let second = value_of(&stream.drain(), "infra_test_steady", None);

        assert_eq!(first, Some(7.5));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_collector_never_overlaps_itself() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(
            vec![Box::new(Overlap {
                current: Arc::clone(&current),
                peak: Arc::clone(&peak),
            }) as Box<dyn Collector>],
            DEFAULT_SCRAPE_TIMEOUT,
        );
        let (sink, _stream) = metrics::channel();

        let (a, b) = tokio::join!(
            dispatcher.run_scrape(ctx(1), &sink),
            dispatcher.run_scrape(ctx(2), &sink)
        );
        assert!(a.is_success());
        assert!(b.is_success());
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_scrape_releases_collector() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(
            vec![Box::new(StallOnce {
                calls: Arc::clone(&calls),
            }) as Box<dyn Collector>],
            Duration::from_secs(20),
        );
        let (sink, _stream) = metrics::channel();

        // the caller gives up long before the collector timeout
        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), dispatcher.run_scrape(ctx(1), &sink))
                .await;
        assert!(abandoned.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // the aborted task gave the lock back: the next scrape is not stuck behind it
        let next = tokio::time::timeout(Duration::from_secs(2), dispatcher.run_scrape(ctx(2), &sink))
            .await
            .expect("next scrape waited for the abandoned one");
        assert!(next.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_scrape_with_closed_sink_still_reports() {
        let dispatcher = Dispatcher::new(vec![Fixed::boxed("orphan", 1.0)], DEFAULT_SCRAPE_TIMEOUT);
        let (sink, stream) = metrics::channel();
        drop(stream);

        let report = dispatcher.run_scrape(ctx(1), &sink).await;
        assert!(matches!(
            report.outcomes[0].result,
            Err(CollectorError::SinkClosed)
        ));
    }

    #[test]
    fn test_panic_message_payloads() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(3u8)), "unknown panic payload");
    }
}
