//! Idle detection from process I/O activity.
//!
//! The collector keeps the last I/O counter seen for every live process. Any
//! difference between two scrapes (a counter moved, a process appeared or went
//! away) marks the host active. The host is reported idle again only once no
//! difference has been seen for longer than the configured threshold.

use super::process_io::{IoSnapshot, ProcessIoSource, SysinfoIoSource};
use super::{Collector, CollectorSettings};
use crate::context::ScrapeContext;
use crate::errors::CollectorError;
use crate::metrics::{Desc, MetricSink};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const NAME: &str = "idle";

/// Eight minutes without observable activity.
pub const DEFAULT_IDLE_THRESHOLD_SECS: u64 = 480;

pub fn factory(settings: &CollectorSettings) -> Result<Box<dyn Collector>, CollectorError> {
    Ok(Box::new(IdleCollector::new(
        SysinfoIoSource::new(),
        settings.idle_threshold,
        Utc::now().timestamp_millis(),
    )))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Active,
    Idle,
}

impl IdleState {
    fn gauge_value(self) -> f64 {
        match self {
            IdleState::Active => 0.0,
            IdleState::Idle => 1.0,
        }
    }
}

/// Cross-scrape state of the idle detector. Owned by exactly one collector.
#[derive(Debug)]
pub struct IdleTracker {
    operation_counts: HashMap<String, u64>,
    state: IdleState,
    threshold_millis: i64,
    last_changed_at_millis: i64,
}

impl IdleTracker {
    /// Starts out `Idle`. The first non-empty observation always flips it to
    /// `Active` since every handle is new at that point.
    pub fn new(threshold: Duration, now_millis: i64) -> Self {
        Self {
            operation_counts: HashMap::new(),
            state: IdleState::Idle,
            threshold_millis: i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX),
            last_changed_at_millis: now_millis,
        }
    }

    pub fn state(&self) -> IdleState {
        self.state
    }

    pub fn tracked_handles(&self) -> usize {
        self.operation_counts.len()
    }

    pub fn last_changed_at_millis(&self) -> i64 {
        self.last_changed_at_millis
    }

    /// Fold one snapshot into the tracker and return the resulting state.
    ///
    /// An empty snapshot means the source is broken, not that the host is idle:
    /// it is rejected and leaves the tracker untouched. Otherwise the map, the
    /// state and the timestamp are replaced together.
    pub fn observe(
        &mut self,
        snapshot: IoSnapshot,
        now_millis: i64,
    ) -> Result<IdleState, CollectorError> {
        if snapshot.is_empty() {
            return Err(CollectorError::EmptyResultSet {
                origin: "process io table".into(),
            });
        }

        let mut changed = false;
        let mut stale = false;

        for (handle, &count) in &snapshot {
            match self.operation_counts.get(handle) {
                None => changed = true,
                Some(&previous) if previous != count => {
                    changed = true;
                    if count < previous {
                        tracing::warn!(
                            handle = %handle,
                            previous,
                            current = count,
                            "io counter went backwards, resetting idle state"
                        );
                        stale = true;
                    }
                }
                Some(_) => {}
            }
        }

        let removed = self
            .operation_counts
            .keys()
            .filter(|handle| !snapshot.contains_key(*handle))
            .count();
        if removed > 0 {
            changed = true;
        }

        if now_millis < self.last_changed_at_millis {
            tracing::warn!(
                now_millis,
                last_changed_at_millis = self.last_changed_at_millis,
                "clock went backwards, resetting idle state"
            );
            stale = true;
        }

        let previous_state = self.state;
        self.operation_counts = snapshot;
        if changed || stale {
            self.state = IdleState::Active;
            self.last_changed_at_millis = now_millis;
        } else if now_millis - self.last_changed_at_millis > self.threshold_millis {
            self.state = IdleState::Idle;
        }

        if previous_state != self.state {
            tracing::info!(
                from = ?previous_state,
                to = ?self.state,
                handles = self.operation_counts.len(),
                removed,
                "idle state changed"
            );
        }

        Ok(self.state)
    }
}

/// Emits `infra_idle_is_idle`: 1 while the host is idle, 0 while active.
pub struct IdleCollector<S> {
    source: S,
    tracker: IdleTracker,
    is_idle: Arc<Desc>,
}

impl<S> IdleCollector<S>
where
    S: ProcessIoSource,
{
    pub fn new(source: S, threshold: Duration, now_millis: i64) -> Self {
        Self {
            source,
            tracker: IdleTracker::new(threshold, now_millis),
            is_idle: Desc::gauge(
                "idle",
                "is_idle",
                "1 if no process io activity was seen for the configured threshold, 0 otherwise",
                &[],
            ),
        }
    }

    pub fn tracker(&self) -> &IdleTracker {
        &self.tracker
    }
}

#[async_trait]
impl<S> Collector for IdleCollector<S>
where
    S: ProcessIoSource,
{
    fn name(&self) -> &'static str {
        NAME
    }

    fn describe(&self) -> Vec<Arc<Desc>> {
        vec![Arc::clone(&self.is_idle)]
    }

    async fn collect(
        &mut self,
        ctx: &ScrapeContext,
        sink: &MetricSink,
    ) -> Result<(), CollectorError> {
        let snapshot = self.source.snapshot().await?;

        // no await below: a cancelled scrape never sees a half-applied update.
        // The clock is read only now, after any wait for the lock or the source.
        let state = self.tracker.observe(snapshot, ctx.now_millis())?;
        sink.emit(&self.is_idle, state.gauge_value(), &[])
    }
}
