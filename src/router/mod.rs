//! HTTP API of the exporter.
pub mod events;
pub mod scrape;

use axum::Router;
use axum::routing::post;

use crate::AppState;

/// Routes receiving events from the host.
pub fn router() -> Router<AppState> {
    Router::new()
        // `POST /events` goes to `user_event`.
        .route("/events", post(events::user_event))
        // `POST /admin-events` goes to `admin_event`.
        .route("/admin-events", post(events::admin_event))
        // `POST /sessions` goes to `sessions`.
        .route("/sessions", post(events::sessions))
}
