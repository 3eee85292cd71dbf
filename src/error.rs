//! Error handler for keycloak-metrics.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::registry::MetricKind;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors raised by the metric registry.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("metric `{name}` is already registered as {existing} with labels {existing_labels:?}")]
    DefinitionConflict {
        name: String,
        existing: MetricKind,
        existing_labels: Vec<String>,
    },

    #[error("invalid metric or label name `{0}`")]
    InvalidName(String),

    #[error("metric `{name}` expects {expected} label values, got {got}")]
    LabelCardinality {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("metric `{name}` is a {kind} and does not support this operation")]
    KindMismatch { name: String, kind: MetricKind },

    #[error("counter `{0}` cannot be decremented")]
    NegativeIncrement(String),

    #[error("counter `{0}` only accepts whole increments, got {1}")]
    FractionalIncrement(String, f64),
}

/// Reasons a single host event is dropped instead of recorded.
#[derive(Debug, Error, PartialEq)]
pub enum EventError {
    #[error("event has no kind")]
    MissingKind,

    #[error("unknown event kind `{0}`")]
    UnknownKind(String),

    #[error("admin event has no realm")]
    MissingRealm,

    #[error("admin event has no resource kind")]
    MissingResourceKind,

    #[error("no series registered for event kind `{0}`")]
    Unregistered(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors that may occur while delivering a snapshot to the push gateway.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("cannot resolve grouping key: {0}")]
    GroupingKey(String),

    #[error("push gateway URL `{0}` cannot hold a path")]
    Url(String),

    #[error("push request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors that may occur during the configuration loading process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("push gateway address `{address}` is invalid: {source}")]
    PushAddress {
        address: String,
        source: url::ParseError,
    },

    #[error("listen address `{0}` is invalid")]
    Address(String),
}

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("external access to metrics is disabled")]
    Unauthorized,
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(
        self,
    ) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/problem+json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = match &self {
            ServerError::Axum(rejection) => ResponseError::default()
                .title("Request body could not be parsed.")
                .details(&rejection.body_text())
                .status(rejection.status()),

            ServerError::Unauthorized => ResponseError::default()
                .title("Metrics are not reachable through a proxy.")
                .details(&self.to_string())
                .status(StatusCode::UNAUTHORIZED),

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");

                ResponseError::default()
            },
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/problem+json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
