//! Middlewares for routes.

use std::sync::Arc;

use axum::extract::{MatchedPath, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::ServerError;
use crate::config::Configuration;
use crate::error::Result;
use crate::exporter::Metrics;
use crate::filter::{RequestContext, ResponseContext};

const FORWARDED_HOST: &str = "x-forwarded-host";

/// Refuse scrapes relayed by a reverse proxy when external access is off.
pub async fn external_access(
    State(config): State<Arc<Configuration>>,
    req: Request,
    next: Next,
) -> Result<Response> {
    if config.metrics.disable_external_access
        && req.headers().contains_key(FORWARDED_HOST)
    {
        tracing::debug!(path = req.uri().path(), "proxied scrape refused");
        return Err(ServerError::Unauthorized);
    }

    Ok(next.run(req).await)
}

/// Count and time every routed request.
pub async fn track(
    State(metrics): State<Arc<Metrics>>,
    req: Request,
    next: Next,
) -> Response {
    let matched_uris = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| matched_uris(path.as_str()))
        .unwrap_or_default();
    let mut context =
        RequestContext::new(req.method().as_str(), req.uri().path(), matched_uris);
    metrics.on_request_start(&mut context);

    let response = next.run(req).await;

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    metrics.on_response_complete(
        &mut context,
        &ResponseContext {
            status: response.status().as_u16(),
            content_type,
        },
    );

    response
}

/// Every prefix of a route template, most specific first.
fn matched_uris(template: &str) -> Vec<String> {
    let segments: Vec<&str> = template
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    (1..=segments.len())
        .rev()
        .map(|len| segments[..len].join("/"))
        .collect()
}
