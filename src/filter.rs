//! Request/response instrumentation.

use std::time::Instant;

use crate::error::RegistryError;
use crate::registry::{MetricKind, Registry, SeriesHandle};
use crate::resource::ResourceExtractor;

/// Media types whose responses are timed.
const TIMED_MEDIA_TYPES: &[&str] =
    &["text/html", "application/json", "application/xml"];

/// Start of an in-flight request.
#[derive(Debug, Clone, Copy)]
pub struct RequestSpan {
    start: Instant,
}

impl RequestSpan {
    pub fn now() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Milliseconds since the span started.
    pub fn elapsed_millis(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

/// What the filter needs to know about a request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    /// Matched route templates, most specific first.
    pub matched_uris: Vec<String>,
    pub span: Option<RequestSpan>,
}

impl RequestContext {
    pub fn new(method: &str, path: &str, matched_uris: Vec<String>) -> Self {
        Self {
            method: method.to_owned(),
            path: path.to_owned(),
            matched_uris,
            span: None,
        }
    }
}

/// What the filter needs to know about a response.
#[derive(Debug, Clone, Default)]
pub struct ResponseContext {
    pub status: u16,
    pub content_type: Option<String>,
}

impl ResponseContext {
    /// Parameters such as `charset` are ignored.
    fn is_timed(&self) -> bool {
        self.content_type.as_deref().is_some_and(|content_type| {
            let essence = content_type.split(';').next().unwrap_or_default().trim();
            TIMED_MEDIA_TYPES
                .iter()
                .any(|timed| essence.eq_ignore_ascii_case(timed))
        })
    }
}

/// Counts responses and times them.
#[derive(Debug, Clone)]
pub struct RequestFilter {
    extractor: ResourceExtractor,
    response_total: SeriesHandle,
    response_errors: SeriesHandle,
    request_duration: SeriesHandle,
}

impl RequestFilter {
    /// Register the HTTP series in `registry`.
    pub fn new(
        registry: &Registry,
        namespace: &str,
        extractor: ResourceExtractor,
    ) -> Result<Self, RegistryError> {
        let labels: &[&str] = if extractor.uri_enabled() {
            &["code", "method", "resource", "uri"]
        } else {
            &["code", "method", "resource"]
        };

        Ok(Self {
            response_total: registry.register(
                &format!("{namespace}_response_total"),
                MetricKind::Counter,
                labels,
                "Total number of responses",
            )?,
            response_errors: registry.register(
                &format!("{namespace}_response_errors"),
                MetricKind::Counter,
                labels,
                "Total number of error responses",
            )?,
            request_duration: registry.register(
                &format!("{namespace}_request_duration"),
                MetricKind::Histogram,
                labels,
                "Request duration in milliseconds",
            )?,
            extractor,
        })
    }

    /// Stamp the start time into the request.
    pub fn on_request_start(&self, request: &mut RequestContext) {
        request.span = Some(RequestSpan::now());
    }

    /// Record the outcome of a request, consuming its span.
    pub fn on_response_complete(
        &self,
        request: &mut RequestContext,
        response: &ResponseContext,
    ) -> Result<(), RegistryError> {
        let span = request.span.take();
        let labels = self.labels(request, response.status);

        self.response_total.increment(&labels, 1)?;
        if response.status >= 400 {
            self.response_errors.increment(&labels, 1)?;
        }

        match span {
            Some(span) if response.is_timed() => {
                self.request_duration.record(&labels, span.elapsed_millis())
            },
            _ => Ok(()),
        }
    }

    fn labels(&self, request: &RequestContext, status: u16) -> Vec<String> {
        let mut labels = vec![
            status.to_string(),
            request.method.clone(),
            self.extractor.resource(&request.matched_uris),
        ];
        if self.extractor.uri_enabled() {
            labels.push(self.extractor.uri(&request.path, status));
        }
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UriMetrics;
    use crate::registry::Sample;

    fn filter(uri_enabled: bool) -> (Registry, RequestFilter) {
        let registry = Registry::default();
        let extractor = ResourceExtractor::new(
            false,
            UriMetrics {
                enabled: uri_enabled,
                ..Default::default()
            },
        );
        let filter = RequestFilter::new(&registry, "keycloak", extractor).unwrap();
        (registry, filter)
    }

    fn request(path: &str) -> RequestContext {
        RequestContext::new(
            "GET",
            path,
            vec![
                "realms/master/protocol/openid-connect/token".into(),
                "realms/master/protocol/openid-connect".into(),
                "realms".into(),
            ],
        )
    }

    fn json(status: u16) -> ResponseContext {
        ResponseContext {
            status,
            content_type: Some("application/json".into()),
        }
    }

    fn count(registry: &Registry, name: &str, values: &[&str]) -> u64 {
        match registry.get(name).unwrap().sample(values).unwrap() {
            Sample::Counter(counter) => counter.get(),
            Sample::Histogram(histogram) => histogram.count(),
            Sample::Gauge(_) => unreachable!(),
        }
    }

    #[test]
    fn test_success_is_counted_and_timed() {
        let (registry, filter) = filter(false);
        let mut req = request("/realms/master/protocol/openid-connect/token");
        filter.on_request_start(&mut req);
        filter.on_response_complete(&mut req, &json(200)).unwrap();

        let labels = ["200", "GET", "token,openid-connect"];
        assert_eq!(count(&registry, "keycloak_response_total", &labels), 1);
        assert_eq!(count(&registry, "keycloak_request_duration", &labels), 1);
        assert!(registry.get("keycloak_response_errors").unwrap().series().samples().is_empty());
        assert!(req.span.is_none());
    }

    #[test]
    fn test_errors_are_counted() {
        let (registry, filter) = filter(false);
        let mut req = request("/realms/master/protocol/openid-connect/token");
        filter.on_request_start(&mut req);
        filter.on_response_complete(&mut req, &json(500)).unwrap();

        let labels = ["500", "GET", "token,openid-connect"];
        assert_eq!(count(&registry, "keycloak_response_total", &labels), 1);
        assert_eq!(count(&registry, "keycloak_response_errors", &labels), 1);
    }

    #[test]
    fn test_duration_requires_span_and_content_type() {
        let (registry, filter) = filter(false);

        let mut req = request("/realms/master/protocol/openid-connect/token");
        filter.on_response_complete(&mut req, &json(200)).unwrap();

        let mut req = request("/realms/master/protocol/openid-connect/token");
        filter.on_request_start(&mut req);
        let image = ResponseContext {
            status: 200,
            content_type: Some("image/png".into()),
        };
        filter.on_response_complete(&mut req, &image).unwrap();

        let labels = ["200", "GET", "token,openid-connect"];
        assert_eq!(count(&registry, "keycloak_response_total", &labels), 2);
        assert!(registry.get("keycloak_request_duration").unwrap().series().samples().is_empty());
    }

    #[test]
    fn test_only_document_media_types_are_timed() {
        let (registry, filter) = filter(false);
        for content_type in ["image/svg+xml", "application/xhtml+xml", "text/css"] {
            let mut req = request("/realms/master/protocol/openid-connect/token");
            filter.on_request_start(&mut req);
            let response = ResponseContext {
                status: 200,
                content_type: Some(content_type.into()),
            };
            filter.on_response_complete(&mut req, &response).unwrap();
        }
        assert!(registry.get("keycloak_request_duration").unwrap().series().samples().is_empty());

        for content_type in ["text/html; charset=UTF-8", "Application/JSON", "application/xml"] {
            let mut req = request("/realms/master/protocol/openid-connect/token");
            filter.on_request_start(&mut req);
            let response = ResponseContext {
                status: 200,
                content_type: Some(content_type.into()),
            };
            filter.on_response_complete(&mut req, &response).unwrap();
        }
        let labels = ["200", "GET", "token,openid-connect"];
        assert_eq!(count(&registry, "keycloak_request_duration", &labels), 3);
        assert_eq!(count(&registry, "keycloak_response_total", &labels), 6);
    }

    #[test]
    fn test_uri_label() {
        let (registry, filter) = filter(true);

        let mut req = request("/realms/master/protocol/openid-connect/token");
        filter.on_request_start(&mut req);
        filter.on_response_complete(&mut req, &json(200)).unwrap();

        let mut missing = request("/realms/master/unknown");
        filter.on_request_start(&mut missing);
        filter.on_response_complete(&mut missing, &json(404)).unwrap();

        let mut redirect = request("/realms/master/login");
        filter.on_request_start(&mut redirect);
        filter
            .on_response_complete(
                &mut redirect,
                &ResponseContext {
                    status: 302,
                    content_type: Some("text/html".into()),
                },
            )
            .unwrap();

        assert_eq!(
            count(
                &registry,
                "keycloak_response_total",
                &["200", "GET", "token,openid-connect", "realms/{realm}/protocol/openid-connect/token"]
            ),
            1
        );
        assert_eq!(
            count(
                &registry,
                "keycloak_response_errors",
                &["404", "GET", "token,openid-connect", "NOT_FOUND"]
            ),
            1
        );
        assert_eq!(
            count(
                &registry,
                "keycloak_request_duration",
                &["302", "GET", "token,openid-connect", "REDIRECTION"]
            ),
            1
        );
    }
}
