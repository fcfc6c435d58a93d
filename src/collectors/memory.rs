use super::{Collector, CollectorSettings};
use crate::context::ScrapeContext;
use crate::errors::CollectorError;
use crate::metrics::{Desc, MetricSink};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub const NAME: &str = "memory";

const MEMINFO: &str = "meminfo";

pub fn factory(_settings: &CollectorSettings) -> Result<Box<dyn Collector>, CollectorError> {
    Ok(Box::new(MemoryCollector::new()))
}

/// Memory metrics collector reading /proc/meminfo.
pub struct MemoryCollector {
    total: Arc<Desc>,
    available: Arc<Desc>,
    used: Arc<Desc>,
    swap_total: Arc<Desc>,
    swap_used: Arc<Desc>,
    pressure: Arc<Desc>,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self {
            total: Desc::gauge("memory", "total_bytes", "Total usable memory", &[]),
            available: Desc::gauge(
                "memory",
                "available_bytes",
                "Memory available for new allocations without swapping",
                &[],
            ),
            used: Desc::gauge("memory", "used_bytes", "Total minus available memory", &[]),
            swap_total: Desc::gauge("memory", "swap_total_bytes", "Total swap space", &[]),
            swap_used: Desc::gauge("memory", "swap_used_bytes", "Swap space in use", &[]),
            pressure: Desc::gauge(
                "memory",
                "pressure_percent",
                "Used memory as a share of total memory",
                &[],
            ),
        }
    }

    /// Parse /proc/meminfo into a key-value map of kB values.
    fn parse_meminfo(content: &str) -> HashMap<String, u64> {
        let mut map = HashMap::new();
        for line in content.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                let key = parts[0].trim_end_matches(':').to_string();
                if let Ok(val) = parts[1].parse::<u64>() {
                    map.insert(key, val);
                }
            }
        }
        map
    }

    /// Extract a required field from meminfo, converting kB -> bytes.
    fn get_bytes(map: &HashMap<String, u64>, field: &str) -> Result<u64, CollectorError> {
        map.get(field)
            .map(|kb| kb * 1024)
            .ok_or_else(|| CollectorError::ParseError {
                path: MEMINFO.into(),
                field: field.into(),
                raw: "field not found".into(),
            })
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for MemoryCollector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn describe(&self) -> Vec<Arc<Desc>> {
        vec![
            Arc::clone(&self.total),
            Arc::clone(&self.available),
            Arc::clone(&self.used),
            Arc::clone(&self.swap_total),
            Arc::clone(&self.swap_used),
            Arc::clone(&self.pressure),
        ]
    }

    async fn collect(
        &mut self,
        ctx: &ScrapeContext,
        sink: &MetricSink,
    ) -> Result<(), CollectorError> {
        let content = ctx.read_proc(MEMINFO).await?;
        let map = Self::parse_meminfo(&content);

        let total = Self::get_bytes(&map, "MemTotal")?;
        let available = Self::get_bytes(&map, "MemAvailable")?;
        let swap_total = Self::get_bytes(&map, "SwapTotal").unwrap_or(0);
        let swap_free = Self::get_bytes(&map, "SwapFree").unwrap_or(0);

        let used = total.saturating_sub(available);
        let swap_used = swap_total.saturating_sub(swap_free);
        let pressure_pct = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        sink.emit(&self.total, total as f64, &[])?;
        sink.emit(&self.available, available as f64, &[])?;
        sink.emit(&self.used, used as f64, &[])?;
        sink.emit(&self.swap_total, swap_total as f64, &[])?;
        sink.emit(&self.swap_used, swap_used as f64, &[])?;
        sink.emit(&self.pressure, pressure_pct, &[])?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics;

    const SAMPLE_MEMINFO: &str = "\
MemTotal:       16384000 kB
MemFree:         2048000 kB
MemAvailable:    4096000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapTotal:       8192000 kB
SwapFree:        4096000 kB";

    #[test]
    fn test_parse_meminfo() {
        let map = MemoryCollector::parse_meminfo(SAMPLE_MEMINFO);
        assert_eq!(map["MemTotal"], 16384000);
        assert_eq!(map["MemAvailable"], 4096000);
        assert_eq!(map["SwapTotal"], 8192000);
        assert_eq!(map["SwapFree"], 4096000);
    }

    #[test]
    fn test_get_bytes_converts_kb_to_bytes() {
        let mut map = HashMap::new();
        map.insert("MemTotal".to_string(), 1024);
        let bytes = MemoryCollector::get_bytes(&map, "MemTotal").unwrap();
        assert_eq!(bytes, 1024 * 1024);
    }

    #[test]
    fn test_get_bytes_missing_field() {
        let map = HashMap::new();
        assert!(MemoryCollector::get_bytes(&map, "NonExistent").is_err());
    }

    #[tokio::test]
    async fn test_collect_emits_pressure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("meminfo"), SAMPLE_MEMINFO).unwrap();

        let mut collector = MemoryCollector::new();
        let (sink, mut stream) = metrics::channel();
        let ctx = ScrapeContext::new(1, dir.path());
        collector.collect(&ctx, &sink).await.unwrap();

        let samples = stream.drain();
        assert_eq!(samples.len(), 6);
        let pressure = samples
            .iter()
            .find(|s| s.desc.fq_name == "infra_memory_pressure_percent")
            .unwrap();
        assert!((pressure.value - 75.0).abs() < 0.01);
        let swap_used = samples
            .iter()
            .find(|s| s.desc.fq_name == "infra_memory_swap_used_bytes")
            .unwrap();
        assert_eq!(swap_used.value, (4096000u64 * 1024) as f64);
    }

    #[tokio::test]
    async fn test_collect_without_mem_available() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("meminfo"), "MemTotal: 1024 kB\n").unwrap();

        let mut collector = MemoryCollector::new();
        let (sink, mut stream) = metrics::channel();
        let ctx = ScrapeContext::new(1, dir.path());
        assert!(matches!(
            collector.collect(&ctx, &sink).await,
            Err(CollectorError::ParseError { .. })
        ));
        assert!(stream.drain().is_empty());
    }
}
