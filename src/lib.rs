//! keycloak-metrics turns identity server events into Prometheus metrics.
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod event;
pub mod exporter;
pub mod exposition;
pub mod filter;
pub mod label;
pub mod mapper;
mod middleware;
pub mod push;
pub mod registry;
pub mod resource;
mod router;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use error::ServerError;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: axum::http::Method,
    path: &str,
    headers: &[(&str, &str)],
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub metrics: Arc<exporter::Metrics>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]));

    let scrape_router = Router::new()
        // `GET /metrics` goes to `scrape`.
        .route("/metrics", get(router::scrape::handler))
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            middleware::external_access,
        ));

    Router::new()
        .merge(scrape_router)
        .merge(router::router())
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            middleware::track,
        ))
        .with_state(state)
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state(
    config: Arc<config::Configuration>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let target = config.metrics.push_target()?;
    let metrics = Arc::new(exporter::Metrics::new(&config.metrics, target)?);

    // refresh process gauges in background.
    telemetry::ProcessCollector::new(Arc::clone(metrics.registry()))
        .spawn(Duration::from_secs(config.metrics.process_refresh_secs.max(1)));

    Ok(AppState { config, metrics })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use http_body_util::BodyExt;

    async fn state(config: config::Configuration) -> AppState {
        initialize_state(Arc::new(config)).await.unwrap()
    }

    async fn body(response: axum::http::Response<axum::body::Body>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_scrape() {
        let state = state(config::Configuration::default()).await;
        let response =
            make_request(app(state), Method::GET, "/metrics", &[], String::default())
                .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            exposition::CONTENT_TYPE
        );
        let body = body(response).await;
        assert!(body.contains("# TYPE keycloak_logins counter"));
        assert!(body.contains("# TYPE process_memory_used_bytes gauge"));
    }

    #[tokio::test]
    async fn test_user_event_is_exported() {
        let state = state(config::Configuration::default()).await;
        let event = r#"{"kind":"LOGIN","realm_id":"myrealm","client_id":"account"}"#;

        let response = make_request(
            app(state.clone()),
            Method::POST,
            "/events",
            &[],
            event.to_owned(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response =
            make_request(app(state), Method::GET, "/metrics", &[], String::default())
                .await;
        let body = body(response).await;
        assert!(body.contains(
            "keycloak_logins{realm=\"myrealm\",provider=\"keycloak\",client_id=\"account\"} 1\n"
        ));
        assert!(body.contains(
            "keycloak_response_total{code=\"202\",method=\"POST\",resource=\"\"} 1\n"
        ));
    }

    #[tokio::test]
    async fn test_admin_event_and_sessions() {
        let state = state(config::Configuration::default()).await;

        let response = make_request(
            app(state.clone()),
            Method::POST,
            "/admin-events?include_details=true",
            &[],
            r#"{"operation_kind":"DELETE","resource_kind":"USER","realm_id":"master"}"#.to_owned(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = make_request(
            app(state.clone()),
            Method::POST,
            "/sessions",
            &[],
            r#"{"realm":"master","online":{"account":3}}"#.to_owned(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let output = state.metrics.render();
        assert!(output.contains(
            "keycloak_admin_event_DELETE{realm=\"master\",resource=\"USER\"} 1\n"
        ));
        assert!(output.contains(
            "keycloak_online_sessions{realm=\"master\",client_id=\"account\"} 3\n"
        ));
    }

    #[tokio::test]
    async fn test_unknown_kind_is_accepted() {
        let state = state(config::Configuration::default()).await;
        let response = make_request(
            app(state),
            Method::POST,
            "/events",
            &[],
            r#"{"kind":"SOMETHING_NEW","realm_id":"master"}"#.to_owned(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let state = state(config::Configuration::default()).await;
        let response = make_request(
            app(state),
            Method::POST,
            "/events",
            &[],
            "{not json".to_owned(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/problem+json"
        );
    }

    #[tokio::test]
    async fn test_external_access() {
        let mut config = config::Configuration::default();
        config.metrics.disable_external_access = true;
        let state = state(config).await;

        let response = make_request(
            app(state.clone()),
            Method::GET,
            "/metrics",
            &[("x-forwarded-host", "sso.example.com")],
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response =
            make_request(app(state), Method::GET, "/metrics", &[], String::default())
                .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
