//! Process-wide store of named, labeled series.
//!
//! The registry is built once at startup and shared as `Arc<Registry>`.
//! Writers on disjoint label combinations never contend: every sample is an
//! atomic accumulator, and creating a new label combination only locks the
//! series it belongs to.

mod recorder;
mod sample;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

pub use sample::{CounterCell, GaugeCell, HistogramCell, Sample};

use crate::error::RegistryError;

/// Request duration boundaries, in milliseconds.
pub const DEFAULT_BUCKETS: &[f64] =
    &[50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 10000.0, 30000.0];

/// Kind of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    /// Name used on `# TYPE` lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered series and its samples.
#[derive(Debug)]
pub struct Series {
    name: String,
    help: String,
    kind: MetricKind,
    label_names: Vec<String>,
    buckets: Arc<[f64]>,
    samples: RwLock<HashMap<Vec<String>, Sample>>,
}

impl Series {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Samples ordered by label values.
    pub fn samples(&self) -> Vec<(Vec<String>, Sample)> {
        let mut samples: Vec<_> = self
            .samples
            .read()
            .iter()
            .map(|(values, sample)| (values.clone(), sample.clone()))
            .collect();
        samples.sort_by(|a, b| a.0.cmp(&b.0));
        samples
    }

    fn new_sample(&self) -> Sample {
        match self.kind {
            MetricKind::Counter => Sample::Counter(Arc::default()),
            MetricKind::Gauge => Sample::Gauge(Arc::default()),
            MetricKind::Histogram => Sample::Histogram(Arc::new(
                HistogramCell::new(Arc::clone(&self.buckets)),
            )),
        }
    }
}

/// Cheap, cloneable reference to a registered series.
///
/// Label values are passed in the order the handle was registered with,
/// which may differ from the order of the series itself.
#[derive(Debug, Clone)]
pub struct SeriesHandle {
    series: Arc<Series>,
    /// For each series label, its position in the caller's values.
    order: Option<Arc<[usize]>>,
}

impl SeriesHandle {
    fn new(series: Arc<Series>) -> Self {
        Self {
            series,
            order: None,
        }
    }

    pub fn series(&self) -> &Series {
        &self.series
    }

    /// Get or lazily create the sample for `values`.
    pub fn sample<S: AsRef<str>>(
        &self,
        values: &[S],
    ) -> Result<Sample, RegistryError> {
        let series = &self.series;
        if values.len() != series.label_names.len() {
            return Err(RegistryError::LabelCardinality {
                name: series.name.clone(),
                expected: series.label_names.len(),
                got: values.len(),
            });
        }

        let key: Vec<String> = match &self.order {
            Some(order) => {
                order.iter().map(|&i| values[i].as_ref().to_owned()).collect()
            },
            None => values.iter().map(|v| v.as_ref().to_owned()).collect(),
        };
        if let Some(sample) = series.samples.read().get(&key) {
            return Ok(sample.clone());
        }

        let mut samples = series.samples.write();
        Ok(samples
            .entry(key)
            .or_insert_with(|| series.new_sample())
            .clone())
    }

    /// Increment a counter.
    pub fn increment<S: AsRef<str>>(
        &self,
        values: &[S],
        value: u64,
    ) -> Result<(), RegistryError> {
        match self.sample(values)? {
            Sample::Counter(counter) => {
                counter.increment(value);
                Ok(())
            },
            _ => Err(self.mismatch()),
        }
    }

    /// Move a gauge up or down.
    pub fn add<S: AsRef<str>>(
        &self,
        values: &[S],
        delta: f64,
    ) -> Result<(), RegistryError> {
        match self.sample(values)? {
            Sample::Gauge(gauge) => {
                gauge.add(delta);
                Ok(())
            },
            _ => Err(self.mismatch()),
        }
    }

    /// Set a gauge.
    pub fn set<S: AsRef<str>>(
        &self,
        values: &[S],
        value: f64,
    ) -> Result<(), RegistryError> {
        match self.sample(values)? {
            Sample::Gauge(gauge) => {
                gauge.set(value);
                Ok(())
            },
            _ => Err(self.mismatch()),
        }
    }

    /// Record a histogram observation.
    pub fn record<S: AsRef<str>>(
        &self,
        values: &[S],
        value: f64,
    ) -> Result<(), RegistryError> {
        match self.sample(values)? {
            Sample::Histogram(histogram) => {
                histogram.record(value);
                Ok(())
            },
            _ => Err(self.mismatch()),
        }
    }

    /// Apply `delta` the way the series kind understands it: counters are
    /// incremented, gauges moved, histograms observe it.
    pub fn observe<S: AsRef<str>>(
        &self,
        values: &[S],
        delta: f64,
    ) -> Result<(), RegistryError> {
        match self.series.kind {
            MetricKind::Counter if delta < 0.0 => {
                Err(RegistryError::NegativeIncrement(self.series.name.clone()))
            },
            MetricKind::Counter if !delta.is_finite() || delta.fract() != 0.0 => {
                Err(RegistryError::FractionalIncrement(
                    self.series.name.clone(),
                    delta,
                ))
            },
            MetricKind::Counter => self.increment(values, delta as u64),
            MetricKind::Gauge => self.add(values, delta),
            MetricKind::Histogram => self.record(values, delta),
        }
    }

    fn mismatch(&self) -> RegistryError {
        RegistryError::KindMismatch {
            name: self.series.name.clone(),
            kind: self.series.kind,
        }
    }
}

/// Registry of every series in the process.
#[derive(Debug)]
pub struct Registry {
    series: RwLock<BTreeMap<String, Arc<Series>>>,
    descriptions: RwLock<HashMap<String, String>>,
    buckets: Arc<[f64]>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKETS)
    }
}

impl Registry {
    /// Create a new [`Registry`] whose histograms use `buckets`.
    pub fn new(buckets: &[f64]) -> Self {
        Self {
            series: RwLock::default(),
            descriptions: RwLock::default(),
            buckets: Arc::from(buckets),
        }
    }

    /// Register a series, or return the existing one if the definition is
    /// identical.
    pub fn register(
        &self,
        name: &str,
        kind: MetricKind,
        label_names: &[&str],
        help: &str,
    ) -> Result<SeriesHandle, RegistryError> {
        validate_metric_name(name)?;
        for (i, label) in label_names.iter().enumerate() {
            validate_label_name(label, kind)?;
            if label_names[..i].contains(label) {
                return Err(RegistryError::InvalidName((*label).to_owned()));
            }
        }
        let label_names: Vec<String> =
            label_names.iter().map(|l| (*l).to_owned()).collect();

        if let Some(series) = self.series.read().get(name) {
            return existing(series, kind, &label_names);
        }

        let mut registry = self.series.write();
        // another writer may have won the race.
        if let Some(series) = registry.get(name) {
            return existing(series, kind, &label_names);
        }

        let help = if help.is_empty() {
            self.descriptions.read().get(name).cloned().unwrap_or_default()
        } else {
            help.to_owned()
        };
        let series = Arc::new(Series {
            name: name.to_owned(),
            help,
            kind,
            label_names,
            buckets: Arc::clone(&self.buckets),
            samples: RwLock::default(),
        });
        registry.insert(name.to_owned(), Arc::clone(&series));

        tracing::trace!(name, %kind, "series registered");
        Ok(SeriesHandle::new(series))
    }

    /// Look up a series by name.
    pub fn get(&self, name: &str) -> Option<SeriesHandle> {
        self.series.read().get(name).cloned().map(SeriesHandle::new)
    }

    /// Every registered series, ordered by name.
    pub fn series(&self) -> Vec<SeriesHandle> {
        self.series.read().values().cloned().map(SeriesHandle::new).collect()
    }

    /// Remember help text for a series that may be registered later.
    pub fn describe(&self, name: &str, help: &str) {
        self.descriptions
            .write()
            .insert(name.to_owned(), help.to_owned());
    }

    /// Histogram boundaries shared by every histogram.
    pub fn buckets(&self) -> &[f64] {
        &self.buckets
    }
}

/// Handle on an already registered series, when `kind` and `label_names`
/// describe the same definition, in any label order.
fn existing(
    series: &Arc<Series>,
    kind: MetricKind,
    label_names: &[String],
) -> Result<SeriesHandle, RegistryError> {
    let conflict = || RegistryError::DefinitionConflict {
        name: series.name.clone(),
        existing: series.kind,
        existing_labels: series.label_names.clone(),
    };
    if series.kind != kind || series.label_names.len() != label_names.len() {
        return Err(conflict());
    }
    if series.label_names == label_names {
        return Ok(SeriesHandle::new(Arc::clone(series)));
    }

    let order = series
        .label_names
        .iter()
        .map(|name| label_names.iter().position(|l| l == name))
        .collect::<Option<Vec<usize>>>()
        .ok_or_else(conflict)?;

    Ok(SeriesHandle {
        series: Arc::clone(series),
        order: Some(order.into()),
    })
}

fn validate_metric_name(name: &str) -> Result<(), RegistryError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':');

    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidName(name.to_owned()))
    }
}

fn validate_label_name(
    label: &str,
    kind: MetricKind,
) -> Result<(), RegistryError> {
    let mut chars = label.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !label.starts_with("__")
        && !(kind == MetricKind::Histogram && label == "le");

    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidName(label.to_owned()))
    }
}
