//! Prometheus text exposition format, version 0.0.4.

use std::io::{self, Write};

use crate::registry::{Registry, Sample, Series};

/// Content type of the scrape response.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Write every series of `registry` to `sink`, then flush it.
pub fn export<W: Write>(registry: &Registry, sink: &mut W) -> io::Result<()> {
    for handle in registry.series() {
        write_series(handle.series(), sink)?;
    }
    sink.flush()
}

/// Render the registry in memory.
pub fn render(registry: &Registry) -> String {
    let mut buffer = Vec::new();
    if let Err(err) = export(registry, &mut buffer) {
        // writing to a Vec never fails, keep whatever was written.
        tracing::error!(%err, "failed to render metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

fn write_series<W: Write>(series: &Series, sink: &mut W) -> io::Result<()> {
    let name = series.name();
    writeln!(sink, "# HELP {name} {}", escape_help(series.help()))?;
    writeln!(sink, "# TYPE {name} {}", series.kind())?;

    for (values, sample) in series.samples() {
        let labels = labels(series.label_names(), &values);
        match sample {
            Sample::Counter(counter) => {
                writeln!(sink, "{name}{} {}", braces(&labels), counter.get())?
            },
            Sample::Gauge(gauge) => writeln!(
                sink,
                "{name}{} {}",
                braces(&labels),
                format_value(gauge.get())
            )?,
            Sample::Histogram(histogram) => {
                let count = histogram.count();
                for (bound, cumulative) in histogram.cumulative() {
                    let le = format!("le=\"{}\"", format_value(bound));
                    writeln!(
                        sink,
                        "{name}_bucket{} {cumulative}",
                        braces(&with(&labels, &le))
                    )?;
                }
                writeln!(
                    sink,
                    "{name}_bucket{} {count}",
                    braces(&with(&labels, "le=\"+Inf\""))
                )?;
                writeln!(
                    sink,
                    "{name}_sum{} {}",
                    braces(&labels),
                    format_value(histogram.sum())
                )?;
                writeln!(sink, "{name}_count{} {count}", braces(&labels))?;
            },
        }
    }
    Ok(())
}

fn labels(names: &[String], values: &[String]) -> String {
    names
        .iter()
        .zip(values)
        .map(|(name, value)| format!("{name}=\"{}\"", escape_label(value)))
        .collect::<Vec<_>>()
        .join(",")
}

fn with(labels: &str, extra: &str) -> String {
    if labels.is_empty() {
        extra.to_owned()
    } else {
        format!("{labels},{extra}")
    }
}

fn braces(labels: &str) -> String {
    if labels.is_empty() {
        String::default()
    } else {
        format!("{{{labels}}}")
    }
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_owned()
    } else if value == f64::INFINITY {
        "+Inf".to_owned()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_owned()
    } else {
        value.to_string()
    }
}

fn escape_help(help: &str) -> String {
    help.replace('\\', r"\\").replace('\n', r"\n")
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', r"\\")
        .replace('"', "\\\"")
        .replace('\n', r"\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, UserEvent};
    use crate::mapper::EventMapper;
    use crate::registry::MetricKind;

    #[test]
    fn test_login_line() {
        let registry = Registry::default();
        let mapper = EventMapper::new(&registry, "keycloak", "keycloak").unwrap();
        mapper
            .record_user_event(&UserEvent::new(EventKind::Login, "myrealm").client("THE_CLIENT_ID"))
            .unwrap();

        let output = render(&registry);
        assert!(output.contains("# TYPE keycloak_logins counter\n"));
        assert!(output.contains(
            "keycloak_logins{realm=\"myrealm\",provider=\"keycloak\",client_id=\"THE_CLIENT_ID\"} 1\n"
        ));
    }

    #[test]
    fn test_histogram_lines() {
        let registry = Registry::new(&[1.0, 5.0]);
        let duration = registry
            .register("request_duration", MetricKind::Histogram, &["code"], "Duration")
            .unwrap();
        for value in [0.5, 3.0, 4.0, 8.0] {
            duration.record(&["200"], value).unwrap();
        }

        let output = render(&registry);
        let expected = "# HELP request_duration Duration\n\
            # TYPE request_duration histogram\n\
            request_duration_bucket{code=\"200\",le=\"1\"} 1\n\
            request_duration_bucket{code=\"200\",le=\"5\"} 3\n\
            request_duration_bucket{code=\"200\",le=\"+Inf\"} 4\n\
            request_duration_sum{code=\"200\"} 15.5\n\
            request_duration_count{code=\"200\"} 4\n";
        assert_eq!(output, expected);
    }

    #[test]
    fn test_escaping() {
        let registry = Registry::default();
        let gauge = registry
            .register("odd", MetricKind::Gauge, &["value"], "Back\\slash\nnewline")
            .unwrap();
        gauge.set(&["say \"hi\"\n\\"], 2.5).unwrap();

        let output = render(&registry);
        assert!(output.contains("# HELP odd Back\\\\slash\\nnewline\n"));
        assert!(output.contains("odd{value=\"say \\\"hi\\\"\\n\\\\\"} 2.5\n"));
    }

    #[test]
    fn test_ordering_and_empty_series() {
        let registry = Registry::default();
        let b = registry
            .register("b_total", MetricKind::Counter, &["realm"], "B")
            .unwrap();
        registry
            .register("a_total", MetricKind::Counter, &[], "A")
            .unwrap();
        b.increment(&["zeta"], 1).unwrap();
        b.increment(&["alpha"], 2).unwrap();

        let output = render(&registry);
        assert_eq!(
            output,
            "# HELP a_total A\n# TYPE a_total counter\n\
             # HELP b_total B\n# TYPE b_total counter\n\
             b_total{realm=\"alpha\"} 2\nb_total{realm=\"zeta\"} 1\n"
        );
    }

    #[test]
    fn test_render_while_recording() {
        let registry = std::sync::Arc::new(Registry::default());
        let events = registry
            .register("events_total", MetricKind::Counter, &["realm"], "Events")
            .unwrap();

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let events = events.clone();
                std::thread::spawn(move || {
                    for j in 0..250 {
                        let realm = format!("realm-{}", (i + j) % 5);
                        events.increment(&[realm], 1).unwrap();
                    }
                })
            })
            .collect();
        let reader = {
            let registry = std::sync::Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let output = render(&registry);
                    assert!(output.starts_with("# HELP events_total Events\n"));
                    for line in output.lines().filter(|l| !l.starts_with('#')) {
                        let value = line.rsplit(' ').next().unwrap();
                        assert!(value.parse::<u64>().unwrap() <= 1000);
                    }
                }
            })
        };
        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();

        let total: u64 = render(&registry)
            .lines()
            .filter(|l| !l.starts_with('#'))
            .map(|l| l.rsplit(' ').next().unwrap().parse::<u64>().unwrap())
            .sum();
        assert_eq!(total, 1000);
    }
}
