use super::{Collector, CollectorSettings};
use crate::context::ScrapeContext;
use crate::errors::CollectorError;
use crate::metrics::{Desc, MetricSink};
use async_trait::async_trait;
use std::sync::Arc;

pub const NAME: &str = "cpu";

const STAT: &str = "stat";
const LOADAVG: &str = "loadavg";

pub fn factory(_settings: &CollectorSettings) -> Result<Box<dyn Collector>, CollectorError> {
    Ok(Box::new(CpuCollector::new()))
}

/// CPU metrics collector that reads /proc/stat and /proc/loadavg.
pub struct CpuCollector {
    prev_sample: Option<CpuSample>,
    ticks: Arc<Desc>,
    usage: Arc<Desc>,
    cores: Arc<Desc>,
    load: Arc<Desc>,
}

/// Raw CPU tick counts from /proc/stat.
#[derive(Debug, Clone)]
struct CpuSample {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
    iowait: u64,
    irq: u64,
    softirq: u64,
    steal: u64,
}

impl CpuSample {
    fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    fn modes(&self) -> [(&'static str, u64); 8] {
        [
            ("user", self.user),
            ("nice", self.nice),
            ("system", self.system),
            ("idle", self.idle),
            ("iowait", self.iowait),
            ("irq", self.irq),
            ("softirq", self.softirq),
            ("steal", self.steal),
        ]
    }
}

/// Percentages of the interval between two samples.
#[derive(Debug, Clone, PartialEq)]
struct CpuUsage {
    user_pct: f64,
    system_pct: f64,
    iowait_pct: f64,
    idle_pct: f64,
}

impl CpuCollector {
    pub fn new() -> Self {
        Self {
            prev_sample: None,
            ticks: Desc::counter(
                "cpu",
                "time_ticks_total",
                "Cumulative CPU time in clock ticks, by mode",
                &["mode"],
            ),
            usage: Desc::gauge(
                "cpu",
                "usage_percent",
                "CPU time share since the previous scrape, by mode",
                &["mode"],
            ),
            cores: Desc::gauge("cpu", "cores", "Number of logical CPU cores", &[]),
            load: Desc::gauge("cpu", "load_average", "System load average", &["window"]),
        }
    }

    /// Parse the aggregate CPU line from /proc/stat.
    fn parse_cpu_line(line: &str) -> Result<CpuSample, CollectorError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 9 {
            return Err(CollectorError::ParseError {
                path: STAT.into(),
                field: "cpu".into(),
                raw: line.to_string(),
            });
        }

        let parse = |idx: usize, field: &str| -> Result<u64, CollectorError> {
            parts[idx]
                .parse::<u64>()
                .map_err(|_| CollectorError::ParseError {
                    path: STAT.into(),
                    field: field.into(),
                    raw: parts[idx].to_string(),
                })
        };

        Ok(CpuSample {
            user: parse(1, "user")?,
            nice: parse(2, "nice")?,
            system: parse(3, "system")?,
            idle: parse(4, "idle")?,
            iowait: parse(5, "iowait")?,
            irq: parse(6, "irq")?,
            softirq: parse(7, "softirq")?,
            steal: parse(8, "steal")?,
        })
    }

    /// Parse /proc/loadavg for load averages.
    fn parse_loadavg(content: &str) -> Result<(f64, f64, f64), CollectorError> {
        let parts: Vec<&str> = content.split_whitespace().collect();
        if parts.len() < 3 {
            return Err(CollectorError::ParseError {
                path: LOADAVG.into(),
                field: "loadavg".into(),
                raw: content.to_string(),
            });
        }

        let parse = |idx: usize, field: &str| -> Result<f64, CollectorError> {
            parts[idx]
                .parse::<f64>()
                .map_err(|_| CollectorError::ParseError {
                    path: LOADAVG.into(),
                    field: field.into(),
                    raw: parts[idx].to_string(),
                })
        };

        Ok((parse(0, "1m")?, parse(1, "5m")?, parse(2, "15m")?))
    }

    /// Count CPU cores from /proc/stat (lines starting with "cpu" followed by a digit).
    fn count_cores(stat_content: &str) -> u32 {
        stat_content
            .lines()
            .filter(|line| {
                line.starts_with("cpu") && line.chars().nth(3).is_some_and(|c| c.is_ascii_digit())
            })
            .count() as u32
    }

    fn usage_between(prev: &CpuSample, current: &CpuSample) -> CpuUsage {
        let total_delta = current.total().saturating_sub(prev.total());
        if total_delta == 0 {
            return CpuUsage {
                user_pct: 0.0,
                system_pct: 0.0,
                iowait_pct: 0.0,
                idle_pct: 100.0,
            };
        }

        let td = total_delta as f64;
        CpuUsage {
            user_pct: (current.user.saturating_sub(prev.user)
                + current.nice.saturating_sub(prev.nice)) as f64
                / td
                * 100.0,
            system_pct: (current.system.saturating_sub(prev.system)
                + current.irq.saturating_sub(prev.irq)
                + current.softirq.saturating_sub(prev.softirq)) as f64
                / td
                * 100.0,
            iowait_pct: current.iowait.saturating_sub(prev.iowait) as f64 / td * 100.0,
            idle_pct: current.idle.saturating_sub(prev.idle) as f64 / td * 100.0,
        }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for CpuCollector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn describe(&self) -> Vec<Arc<Desc>> {
        vec![
            Arc::clone(&self.ticks),
            Arc::clone(&self.usage),
            Arc::clone(&self.cores),
            Arc::clone(&self.load),
        ]
    }

    async fn collect(
        &mut self,
        ctx: &ScrapeContext,
        sink: &MetricSink,
    ) -> Result<(), CollectorError> {
        let stat_content = ctx.read_proc(STAT).await?;

        let cpu_line = stat_content
            .lines()
            .next()
            .ok_or_else(|| CollectorError::ParseError {
                path: STAT.into(),
                field: "cpu_line".into(),
                raw: "empty file".into(),
            })?;

        let current = Self::parse_cpu_line(cpu_line)?;
        let num_cores = Self::count_cores(&stat_content);

        let loadavg_content = ctx.read_proc(LOADAVG).await?;
        let (load_1m, load_5m, load_15m) = Self::parse_loadavg(&loadavg_content)?;

        for (mode, ticks) in current.modes() {
            sink.emit(&self.ticks, ticks as f64, &[mode])?;
        }
        sink.emit(&self.cores, num_cores as f64, &[])?;
        sink.emit(&self.load, load_1m, &["1m"])?;
        sink.emit(&self.load, load_5m, &["5m"])?;
        sink.emit(&self.load, load_15m, &["15m"])?;

        // First sample only seeds the baseline.
        if let Some(ref prev) = self.prev_sample {
            let usage = Self::usage_between(prev, &current);
            sink.emit(&self.usage, usage.user_pct, &["user"])?;
            sink.emit(&self.usage, usage.system_pct, &["system"])?;
            sink.emit(&self.usage, usage.iowait_pct, &["iowait"])?;
            sink.emit(&self.usage, usage.idle_pct, &["idle"])?;
        }

        self.prev_sample = Some(current);
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Unit tests — validate on hardcoded information
// ─────────────────────────────────────────────
