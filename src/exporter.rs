//! Entry points called by the host.
//!
//! Recording never fails from the caller's point of view: mapping faults are
//! logged and dropped, and pushes happen on another task.

use std::io::{self, Write};
use std::sync::Arc;

use axum::extract::FromRef;

use crate::AppState;
use crate::config::{self, PushTarget};
use crate::error::{EventError, RegistryError};
use crate::event::{AdminEvent, SessionStats, UserEvent};
use crate::exposition;
use crate::filter::{RequestContext, RequestFilter, ResponseContext};
use crate::mapper::EventMapper;
use crate::push::PushDispatcher;
use crate::registry::Registry;
use crate::resource::ResourceExtractor;
use crate::telemetry::ProcessCollector;

/// Metrics of a Keycloak deployment.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    mapper: EventMapper,
    filter: RequestFilter,
    push: PushDispatcher,
}

impl Metrics {
    /// Register every series, sample process metrics once and start the
    /// push worker, if any.
    pub fn new(
        config: &config::Metrics,
        target: Option<PushTarget>,
    ) -> Result<Self, RegistryError> {
        let registry = Arc::new(Registry::new(&config.buckets()));
        let mapper =
            EventMapper::new(&registry, &config.namespace, &config.platform)?;
        let extractor = ResourceExtractor::new(
            config.resource_scraping_disabled,
            config.uri.clone(),
        );
        let filter = RequestFilter::new(&registry, &config.namespace, extractor)?;
        mapper.reconcile(&config.declared_event_kinds);
        ProcessCollector::new(Arc::clone(&registry)).collect();

        Ok(Self {
            push: PushDispatcher::spawn(target, Arc::clone(&registry)),
            registry,
            mapper,
            filter,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Record a user event.
    pub fn on_user_event(&self, event: &UserEvent) {
        if let Err(err) = self.mapper.record_user_event(event) {
            dropped(&err, event.kind.as_deref());
            return;
        }
        self.push.push_async();
    }

    /// Record an admin event. Details never become labels.
    pub fn on_admin_event(&self, event: &AdminEvent, include_details: bool) {
        tracing::trace!(include_details, "admin event received");
        if let Err(err) = self.mapper.record_admin_event(event) {
            dropped(&err, event.operation_kind.as_deref());
            return;
        }
        self.push.push_async();
    }

    /// Set the active session gauges of a realm.
    pub fn record_sessions(&self, stats: &SessionStats) {
        match self.mapper.record_sessions(stats) {
            Ok(()) => {
                self.push.push_async();
            },
            Err(err) => {
                tracing::warn!(%err, realm = %stats.realm, "session statistics dropped")
            },
        }
    }

    /// Event kinds declared by the host that have no series.
    pub fn reconcile<S: AsRef<str>>(&self, declared: &[S]) -> Vec<String> {
        self.mapper.reconcile(declared)
    }

    pub fn on_request_start(&self, request: &mut RequestContext) {
        self.filter.on_request_start(request);
    }

    pub fn on_response_complete(
        &self,
        request: &mut RequestContext,
        response: &ResponseContext,
    ) {
        match self.filter.on_response_complete(request, response) {
            Ok(()) => {
                self.push.push_async();
            },
            Err(err) => {
                tracing::warn!(%err, method = %request.method, path = %request.path, "response metrics dropped")
            },
        }
    }

    /// Write the exposition of every series to `sink`.
    pub fn export<W: Write>(&self, sink: &mut W) -> io::Result<()> {
        exposition::export(&self.registry, sink)
    }

    pub fn render(&self) -> String {
        exposition::render(&self.registry)
    }

    /// Request a push of the current snapshot.
    pub fn push(&self) {
        self.push.push_async();
    }
}

impl FromRef<AppState> for Arc<Metrics> {
    fn from_ref(state: &AppState) -> Arc<Metrics> {
        Arc::clone(&state.metrics)
    }
}

fn dropped(err: &EventError, kind: Option<&str>) {
    tracing::warn!(%err, kind, "event dropped");
}
