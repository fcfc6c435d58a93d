//! Metric descriptors, the multi-producer sample sink and the text encoder.
//!
//! Collectors never touch the exposition format. They push [`Sample`]s into a
//! [`MetricSink`] and the exporter renders whatever arrived once every
//! collector has returned or timed out.

use crate::errors::{CollectorError, EncodeError};
use prometheus::core::Collector as _;
use prometheus::proto::MetricFamily;
use prometheus::{Counter, CounterVec, Encoder, Gauge, GaugeVec, Opts, TextEncoder};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Prefix shared by every metric this exporter produces.
pub const NAMESPACE: &str = "infra";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Gauge,
    Counter,
}

/// Static description of one metric: name, help text and label names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Desc {
    pub fq_name: String,
    pub help: String,
    pub label_names: Vec<String>,
    pub value_type: ValueType,
}

impl Desc {
    pub fn new(
        subsystem: &str,
        name: &str,
        help: &str,
        label_names: &[&str],
        value_type: ValueType,
    ) -> Arc<Self> {
        Arc::new(Self {
            fq_name: format!("{}_{}_{}", NAMESPACE, subsystem, name),
            help: help.to_string(),
            label_names: label_names.iter().map(|l| l.to_string()).collect(),
            value_type,
        })
    }

    pub fn gauge(subsystem: &str, name: &str, help: &str, label_names: &[&str]) -> Arc<Self> {
        Self::new(subsystem, name, help, label_names, ValueType::Gauge)
    }

    pub fn counter(subsystem: &str, name: &str, help: &str, label_names: &[&str]) -> Arc<Self> {
        Self::new(subsystem, name, help, label_names, ValueType::Counter)
    }

    /// Check the metric and label names against the exposition format rules.
    pub fn validate(&self) -> prometheus::Result<()> {
        prometheus::core::Desc::new(
            self.fq_name.clone(),
            self.help.clone(),
            self.label_names.clone(),
            HashMap::new(),
        )
        .map(|_| ())
    }
}

/// One observed value for a descriptor.
#[derive(Debug, Clone)]
pub struct Sample {
    pub desc: Arc<Desc>,
    pub value: f64,
    pub label_values: Vec<String>,
}

/// Producer half handed to collectors. Cheap to clone, safe to use from many tasks.
#[derive(Debug, Clone)]
pub struct MetricSink {
    tx: mpsc::UnboundedSender<Sample>,
}

/// Consumer half kept by whoever runs the scrape.
#[derive(Debug)]
pub struct SampleStream {
    rx: mpsc::UnboundedReceiver<Sample>,
}

pub fn channel() -> (MetricSink, SampleStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MetricSink { tx }, SampleStream { rx })
}

impl MetricSink {
    pub fn emit(
        &self,
        desc: &Arc<Desc>,
        value: f64,
        label_values: &[&str],
    ) -> Result<(), CollectorError> {
        if label_values.len() != desc.label_names.len() {
            return Err(CollectorError::LabelMismatch {
                metric: desc.fq_name.clone(),
                expected: desc.label_names.len(),
                got: label_values.len(),
            });
        }

        self.tx
            .send(Sample {
                desc: Arc::clone(desc),
                value,
                label_values: label_values.iter().map(|v| v.to_string()).collect(),
            })
            .map_err(|_| CollectorError::SinkClosed)
    }
}

impl SampleStream {
    /// Take every sample queued so far.
    ///
    /// Does not wait for the senders to hang up: a timed-out collector may still
    /// hold a sink clone in a detached blocking task.
    pub fn drain(&mut self) -> Vec<Sample> {
        let mut samples = Vec::new();
        while let Ok(sample) = self.rx.try_recv() {
            samples.push(sample);
        }
        samples
    }
}

/// Render samples in the Prometheus text exposition format, sorted by metric name.
///
/// A family the exposition format rejects is logged and left out; the rest of
/// the scrape is still rendered.
pub fn encode(samples: Vec<Sample>) -> Result<String, EncodeError> {
    let mut grouped: BTreeMap<String, (Arc<Desc>, Vec<Sample>)> = BTreeMap::new();
    for sample in samples {
        grouped
            .entry(sample.desc.fq_name.clone())
            .or_insert_with(|| (Arc::clone(&sample.desc), Vec::new()))
            .1
            .push(sample);
    }

    let mut families: Vec<MetricFamily> = Vec::with_capacity(grouped.len());
    for (name, (desc, samples)) in grouped {
        let usable = usable_samples(&desc, &samples);
        // the text encoder rejects families without metrics
        if usable.is_empty() {
            continue;
        }
        match materialize(&desc, &usable) {
            Ok(collected) => families.extend(collected),
            Err(e) => tracing::warn!(metric = %name, error = %e, "dropping invalid metric family"),
        }
    }

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn usable_samples<'a>(desc: &Desc, samples: &'a [Sample]) -> Vec<&'a Sample> {
    samples
        .iter()
        .filter(|s| {
            if s.desc.label_names != desc.label_names {
                tracing::warn!(metric = %desc.fq_name, "dropping sample with conflicting label names");
                return false;
            }
            if desc.value_type == ValueType::Counter && s.value < 0.0 {
                tracing::warn!(metric = %desc.fq_name, value = s.value, "dropping negative counter sample");
                return false;
            }
            true
        })
        .collect()
}

fn materialize(desc: &Desc, samples: &[&Sample]) -> prometheus::Result<Vec<MetricFamily>> {
    let opts = Opts::new(desc.fq_name.as_str(), desc.help.as_str());
    let label_names: Vec<&str> = desc.label_names.iter().map(String::as_str).collect();

    match (desc.value_type, label_names.is_empty()) {
        (ValueType::Gauge, true) => {
            let gauge = Gauge::with_opts(opts)?;
            for sample in samples {
                gauge.set(sample.value);
            }
            Ok(gauge.collect())
        }
        (ValueType::Gauge, false) => {
            let vec = GaugeVec::new(opts, &label_names)?;
            for sample in samples {
                let values: Vec<&str> = sample.label_values.iter().map(String::as_str).collect();
                vec.with_label_values(&values[..]).set(sample.value);
            }
            Ok(vec.collect())
        }
        (ValueType::Counter, true) => {
            let counter = Counter::with_opts(opts)?;
            // last value wins, same as the labeled path
            if let Some(sample) = samples.last() {
                counter.inc_by(sample.value);
            }
            Ok(counter.collect())
        }
        (ValueType::Counter, false) => {
            let vec = CounterVec::new(opts, &label_names)?;
            for sample in samples {
                let values: Vec<&str> = sample.label_values.iter().map(String::as_str).collect();
                let counter = vec.with_label_values(&values[..]);
                counter.reset();
                counter.inc_by(sample.value);
            }
            Ok(vec.collect())
        }
    }
}
