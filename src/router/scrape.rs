//! Scrape endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use crate::ServerError;
use crate::exporter::Metrics;
use crate::exposition::CONTENT_TYPE;

/// Text exposition of every series.
pub async fn handler(
    State(metrics): State<Arc<Metrics>>,
) -> Result<impl IntoResponse, ServerError> {
    let mut body = Vec::new();
    metrics
        .export(&mut body)
        .map_err(|err| ServerError::Internal {
            details: "cannot write metrics exposition".into(),
            source: Some(Box::new(err)),
        })?;

    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE)], body))
}
