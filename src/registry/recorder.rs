//! `metrics` facade over the registry.
//!
//! Lets code written against `metrics::counter!`/`gauge!`/`histogram!` record
//! into an injected [`Registry`] through `metrics::with_local_recorder`.

use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString,
    Unit,
};

use super::{MetricKind, Registry, Sample, SeriesHandle};

impl Registry {
    fn resolve(&self, key: &Key, kind: MetricKind) -> Option<Sample> {
        let (names, values): (Vec<&str>, Vec<&str>) =
            key.labels().map(|label| (label.key(), label.value())).unzip();

        let handle: SeriesHandle =
            match self.register(key.name(), kind, &names, "") {
                Ok(handle) => handle,
                Err(err) => {
                    tracing::warn!(%err, name = key.name(), "metric dropped");
                    return None;
                },
            };

        // the handle maps the macro label order onto the series order.
        match handle.sample(&values) {
            Ok(sample) => Some(sample),
            Err(err) => {
                tracing::warn!(%err, name = key.name(), "metric dropped");
                None
            },
        }
    }

    fn describe_with_unit(
        &self,
        key: KeyName,
        unit: Option<Unit>,
        description: SharedString,
    ) {
        let description: &str = &description;
        let help = match unit {
            Some(unit) => {
                format!("{description} ({})", unit.as_str())
            },
            None => description.to_owned(),
        };
        self.describe(key.as_str(), &help);
    }
}

impl Recorder for Registry {
    fn describe_counter(
        &self,
        key: KeyName,
        unit: Option<Unit>,
        description: SharedString,
    ) {
        self.describe_with_unit(key, unit, description);
    }

    fn describe_gauge(
        &self,
        key: KeyName,
        unit: Option<Unit>,
        description: SharedString,
    ) {
        self.describe_with_unit(key, unit, description);
    }

    fn describe_histogram(
        &self,
        key: KeyName,
        unit: Option<Unit>,
        description: SharedString,
    ) {
        self.describe_with_unit(key, unit, description);
    }

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        match self.resolve(key, MetricKind::Counter) {
            Some(Sample::Counter(counter)) => Counter::from_arc(counter),
            _ => Counter::noop(),
        }
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        match self.resolve(key, MetricKind::Gauge) {
            Some(Sample::Gauge(gauge)) => Gauge::from_arc(gauge),
            _ => Gauge::noop(),
        }
    }

    fn register_histogram(
        &self,
        key: &Key,
        _metadata: &Metadata<'_>,
    ) -> Histogram {
        match self.resolve(key, MetricKind::Histogram) {
            Some(Sample::Histogram(histogram)) => {
                Histogram::from_arc(histogram)
            },
            _ => Histogram::noop(),
        }
    }
}
