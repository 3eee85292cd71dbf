//! Event ingestion from the host.
//!
//! Bodies are acknowledged as soon as they parse; what happens to the event
//! afterwards is never reported back.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::ServerError;
use crate::event::{AdminEvent, SessionStats, UserEvent};
use crate::exporter::Metrics;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AdminQuery {
    include_details: bool,
}

pub async fn user_event(
    State(metrics): State<Arc<Metrics>>,
    body: Result<Json<UserEvent>, JsonRejection>,
) -> Result<StatusCode, ServerError> {
    let Json(event) = body?;
    metrics.on_user_event(&event);
    Ok(StatusCode::ACCEPTED)
}

pub async fn admin_event(
    State(metrics): State<Arc<Metrics>>,
    Query(query): Query<AdminQuery>,
    body: Result<Json<AdminEvent>, JsonRejection>,
) -> Result<StatusCode, ServerError> {
    let Json(event) = body?;
    metrics.on_admin_event(&event, query.include_details);
    Ok(StatusCode::ACCEPTED)
}

pub async fn sessions(
    State(metrics): State<Arc<Metrics>>,
    body: Result<Json<SessionStats>, JsonRejection>,
) -> Result<StatusCode, ServerError> {
    let Json(stats) = body?;
    metrics.record_sessions(&stats);
    Ok(StatusCode::ACCEPTED)
}
