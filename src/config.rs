//! Configuration manager for keycloak-metrics.
//!
//! Values come from `config.yaml` first, then from the environment variables
//! historically used to deploy the metrics provider. The result is resolved
//! once at startup and handed to every component constructor.

use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;
use crate::error::ConfigError;
use crate::registry::DEFAULT_BUCKETS;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_ADDRESS: &str = "0.0.0.0:9100";
const DEFAULT_NAMESPACE: &str = "keycloak";
const DEFAULT_JOB: &str = "keycloak";
const DEFAULT_PROCESS_REFRESH: u64 = 10;
/// Prefix of a grouping key read from another environment variable.
const ENV_REDIRECT: &str = "ENVVALUE:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Listen address of the HTTP server.
    pub address: String,
    /// Related to metrics collection.
    pub metrics: Metrics,
    #[serde(skip)]
    path: PathBuf,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_owned(),
            metrics: Metrics::default(),
            path: PathBuf::default(),
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// Prefix of every domain series, without the trailing underscore.
    pub namespace: String,
    /// `provider` label when an event has no identity provider.
    pub platform: String,
    /// Related to the `uri` label.
    pub uri: UriMetrics,
    /// Always emit an empty `resource` label.
    pub resource_scraping_disabled: bool,
    /// Reject scrapes forwarded by a reverse proxy.
    pub disable_external_access: bool,
    /// `request_duration` boundaries, in milliseconds.
    pub request_duration_buckets: Option<Vec<f64>>,
    /// Seconds between two process metrics refreshes.
    pub process_refresh_secs: u64,
    /// Event kinds declared by the host, checked once at startup.
    pub declared_event_kinds: Vec<String>,
    /// Related to push gateway delivery.
    pub push: Option<Push>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_owned(),
            platform: DEFAULT_NAMESPACE.to_owned(),
            uri: UriMetrics::default(),
            resource_scraping_disabled: false,
            disable_external_access: false,
            request_duration_buckets: None,
            process_refresh_secs: DEFAULT_PROCESS_REFRESH,
            declared_event_kinds: Vec::new(),
            push: None,
        }
    }
}

/// `uri` label configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UriMetrics {
    /// Emit a `uri` label on HTTP series.
    pub enabled: bool,
    /// Keep realm names and client IDs in the label.
    pub detailed: bool,
    /// Only paths starting with one of these prefixes get a `uri` label.
    pub filter: Vec<String>,
}

/// Push gateway configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Push {
    /// Hostname:(?port) or URL of the push gateway.
    pub address: String,
    /// Job name, `keycloak` by default.
    pub job: Option<String>,
    /// `instance` grouping key; `ENVVALUE:NAME` reads variable `NAME`.
    pub grouping_key: Option<String>,
}

/// Where the `instance` grouping key comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupingKey {
    /// Read this environment variable at push time.
    Env(String),
    /// Use this value.
    Literal(String),
    /// Use the outbound IP address of the process.
    LocalAddress,
}

impl GroupingKey {
    /// Empty values count as absent.
    fn parse(value: Option<&str>) -> Self {
        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Self::LocalAddress;
        };

        match value.strip_prefix(ENV_REDIRECT).map(str::trim) {
            Some("") => Self::LocalAddress,
            Some(variable) => Self::Env(variable.to_owned()),
            None => Self::Literal(value.to_owned()),
        }
    }
}

/// Resolved push gateway target.
#[derive(Debug, Clone, PartialEq)]
pub struct PushTarget {
    pub base_url: Url,
    pub job: String,
    pub grouping_key: GroupingKey,
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location, then applies environment overrides.
    pub fn read(self) -> Arc<Self> {
        let file_path: &Path = if self.path.is_file() {
            &self.path
        } else {
            Path::new(DEFAULT_CONFIG_PATH)
        };

        let config = match File::open(file_path) {
            Ok(file) => match serde_yaml::from_reader(file) {
                Ok(config) => config,
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        };

        Arc::new(config.with_env(|key| std::env::var(key).ok()))
    }

    /// Apply environment overrides read through `lookup`.
    pub fn with_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let flag = |key: &str| {
            lookup(key).map(|v| v.trim().eq_ignore_ascii_case("true"))
        };

        if let Some(address) = lookup("METRICS_ADDRESS") {
            self.address = address;
        }
        if let Some(address) = lookup("PROMETHEUS_PUSHGATEWAY_ADDRESS") {
            self.metrics.push.get_or_insert_with(Push::default).address = address;
        }
        if let Some(push) = self.metrics.push.as_mut() {
            if let Some(job) = lookup("PROMETHEUS_PUSHGATEWAY_JOB") {
                push.job = Some(job);
            }
            if let Some(key) = lookup("PROMETHEUS_GROUPING_KEY_INSTANCE") {
                push.grouping_key = Some(key);
            }
        }
        if let Some(enabled) = flag("URI_METRICS_ENABLED") {
            self.metrics.uri.enabled = enabled;
        }
        if let Some(detailed) = flag("URI_METRICS_DETAILED") {
            self.metrics.uri.detailed = detailed;
        }
        if let Some(filter) = lookup("URI_METRICS_FILTER") {
            self.metrics.uri.filter = filter
                .split(',')
                .map(str::trim)
                .filter(|prefix| !prefix.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(disabled) = flag("RESOURCE_SCRAPING_DISABLED") {
            self.metrics.resource_scraping_disabled = disabled;
        }
        if let Some(disabled) = flag("DISABLE_EXTERNAL_ACCESS") {
            self.metrics.disable_external_access = disabled;
        }
        if let Some(buckets) = lookup("REQUEST_DURATION_BUCKETS") {
            match buckets
                .split(',')
                .map(|b| b.trim().parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(parsed) => self.metrics.request_duration_buckets = Some(parsed),
                Err(err) => {
                    tracing::warn!(%err, %buckets, "`REQUEST_DURATION_BUCKETS` is invalid, falling back to defaults");
                    self.metrics.request_duration_buckets = None;
                },
            }
        }

        self
    }

    /// Parsed listen address.
    pub fn socket_address(&self) -> Result<SocketAddr, ConfigError> {
        self.address
            .parse()
            .map_err(|_| ConfigError::Address(self.address.clone()))
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` cannot be read, using defaults");
        Self::default()
    }
}

impl Metrics {
    /// Histogram boundaries, falling back to the defaults when the configured
    /// ones are unusable.
    pub fn buckets(&self) -> Vec<f64> {
        let Some(buckets) = &self.request_duration_buckets else {
            return DEFAULT_BUCKETS.to_vec();
        };

        if buckets.is_empty() {
            tracing::warn!("request duration buckets are empty, falling back to defaults");
            return DEFAULT_BUCKETS.to_vec();
        }

        if buckets.iter().any(|&b| !b.is_finite() || b <= 0.0) {
            tracing::warn!(
                ?buckets,
                "request duration buckets contain invalid values, falling back to defaults"
            );
            return DEFAULT_BUCKETS.to_vec();
        }

        if !buckets.is_sorted_by(|a, b| a < b) {
            tracing::warn!(
                ?buckets,
                "request duration buckets are not strictly ascending, falling back to defaults"
            );
            return DEFAULT_BUCKETS.to_vec();
        }

        buckets.clone()
    }

    /// Resolve the push gateway target, if any.
    pub fn push_target(&self) -> Result<Option<PushTarget>, ConfigError> {
        let Some(push) = &self.push else {
            return Ok(None);
        };
        if push.address.trim().is_empty() {
            return Ok(None);
        }

        let address = push.address.trim();
        let with_scheme =
            if address.starts_with("http://") || address.starts_with("https://") {
                address.to_owned()
            } else {
                format!("http://{address}")
            };
        let base_url =
            Url::parse(&with_scheme).map_err(|source| ConfigError::PushAddress {
                address: address.to_owned(),
                source,
            })?;

        Ok(Some(PushTarget {
            base_url,
            job: push.job.clone().unwrap_or_else(|| DEFAULT_JOB.to_owned()),
            grouping_key: GroupingKey::parse(push.grouping_key.as_deref()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_yaml() {
        let config: Configuration = serde_yaml::from_str(
            r#"
address: 127.0.0.1:8080
metrics:
  uri:
    enabled: true
    filter: ["realms/{realm}/protocol"]
  push:
    address: localhost:9091
    job: iam
"#,
        )
        .unwrap();

        assert_eq!(config.socket_address().unwrap().port(), 8080);
        assert!(config.metrics.uri.enabled);
        assert!(!config.metrics.uri.detailed);
        assert_eq!(config.metrics.namespace, "keycloak");
        assert_eq!(config.metrics.process_refresh_secs, DEFAULT_PROCESS_REFRESH);

        let target = config.metrics.push_target().unwrap().unwrap();
        assert_eq!(target.base_url.as_str(), "http://localhost:9091/");
        assert_eq!(target.job, "iam");
        assert_eq!(target.grouping_key, GroupingKey::LocalAddress);
    }

    #[test]
    fn test_env_overrides() {
        let config = Configuration::default().with_env(env(&[
            ("PROMETHEUS_PUSHGATEWAY_ADDRESS", "https://localhost:9091"),
            ("PROMETHEUS_GROUPING_KEY_INSTANCE", "ENVVALUE:HOSTNAME"),
            ("URI_METRICS_ENABLED", "true"),
            ("URI_METRICS_FILTER", "realms, admin/realms ,"),
            ("RESOURCE_SCRAPING_DISABLED", "TRUE"),
            ("REQUEST_DURATION_BUCKETS", "10, 20,30"),
        ]));

        assert!(config.metrics.uri.enabled);
        assert_eq!(config.metrics.uri.filter, vec!["realms", "admin/realms"]);
        assert!(config.metrics.resource_scraping_disabled);
        assert_eq!(config.metrics.buckets(), vec![10.0, 20.0, 30.0]);

        let target = config.metrics.push_target().unwrap().unwrap();
        assert_eq!(target.base_url.scheme(), "https");
        assert_eq!(target.job, DEFAULT_JOB);
        assert_eq!(target.grouping_key, GroupingKey::Env("HOSTNAME".into()));
    }

    #[test]
    fn test_no_push_gateway() {
        let config = Configuration::default().with_env(env(&[]));
        assert_eq!(config.metrics.push_target().unwrap(), None);
    }

    #[test]
    fn test_invalid_push_gateway() {
        let config = Configuration::default()
            .with_env(env(&[("PROMETHEUS_PUSHGATEWAY_ADDRESS", "http://[::1")]));
        assert!(matches!(
            config.metrics.push_target(),
            Err(ConfigError::PushAddress { .. })
        ));
    }

    #[test]
    fn test_unparsable_bucket_env() {
        let mut config = Configuration::default();
        config.metrics.request_duration_buckets = Some(vec![1.0, 2.0]);
        let config = config
            .with_env(env(&[("REQUEST_DURATION_BUCKETS", "10,20,abc,30")]));

        assert_eq!(config.metrics.request_duration_buckets, None);
        assert_eq!(config.metrics.buckets(), DEFAULT_BUCKETS);
    }

    #[test]
    fn test_empty_grouping_key() {
        for key in ["", "  ", "ENVVALUE:"] {
            let config = Configuration::default().with_env(env(&[
                ("PROMETHEUS_PUSHGATEWAY_ADDRESS", "localhost:9091"),
                ("PROMETHEUS_GROUPING_KEY_INSTANCE", key),
            ]));
            let target = config.metrics.push_target().unwrap().unwrap();
            assert_eq!(target.grouping_key, GroupingKey::LocalAddress, "{key:?}");
        }

        assert_eq!(
            GroupingKey::parse(Some("node-1")),
            GroupingKey::Literal("node-1".into())
        );
    }

    #[test]
    fn test_invalid_buckets() {
        let mut metrics = Metrics {
            request_duration_buckets: Some(vec![100.0, 50.0]),
            ..Default::default()
        };
        assert_eq!(metrics.buckets(), DEFAULT_BUCKETS);

        metrics.request_duration_buckets = Some(vec![]);
        assert_eq!(metrics.buckets(), DEFAULT_BUCKETS);

        metrics.request_duration_buckets = Some(vec![-1.0, 5.0]);
        assert_eq!(metrics.buckets(), DEFAULT_BUCKETS);
    }
}
