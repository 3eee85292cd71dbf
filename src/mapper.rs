//! Translation of host events into registry updates.

use std::collections::HashMap;

use crate::error::{EventError, RegistryError};
use crate::event::{AdminEvent, EventKind, OperationKind, SessionStats, UserEvent};
use crate::label::sanitize;
use crate::registry::{MetricKind, Registry, SeriesHandle};

const SUCCESS_LABELS: &[&str] = &["realm", "provider", "client_id"];
const ERROR_LABELS: &[&str] = &["realm", "provider", "error", "client_id"];

/// Series written for a kind that has dedicated counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dedicated {
    Success,
    Error,
}

/// Maps every event kind to its series.
///
/// `LOGIN` and `LOGIN_ERROR` share `login_attempts`; every other pair with
/// dedicated series counts success and error independently. Remaining kinds
/// go to one generic counter per kind, all registered up front. `LOGIN` and
/// `LOGOUT` also move the `logged_in_users` gauge of their realm.
#[derive(Debug, Clone)]
pub struct EventMapper {
    platform: String,
    login_attempts: SeriesHandle,
    logged_in_users: SeriesHandle,
    dedicated: HashMap<EventKind, (SeriesHandle, Dedicated)>,
    user_events: HashMap<EventKind, SeriesHandle>,
    admin_events: HashMap<OperationKind, SeriesHandle>,
    online_sessions: SeriesHandle,
    offline_sessions: SeriesHandle,
}

impl EventMapper {
    /// Register every event series in `registry`.
    pub fn new(
        registry: &Registry,
        namespace: &str,
        platform: &str,
    ) -> Result<Self, RegistryError> {
        let name = |suffix: &str| format!("{namespace}_{suffix}");
        let counter = |suffix: &str, labels: &[&str], help: &str| {
            registry.register(&name(suffix), MetricKind::Counter, labels, help)
        };

        let login_attempts = counter(
            "login_attempts",
            SUCCESS_LABELS,
            "Total number of login attempts",
        )?;

        let pairs = [
            (EventKind::Login, EventKind::LoginError, "logins", "Total successful logins", "failed_login_attempts", "Total failed login attempts"),
            (EventKind::Register, EventKind::RegisterError, "registrations", "Total registered users", "registrations_errors", "Total errors on registrations"),
            (EventKind::RefreshToken, EventKind::RefreshTokenError, "refresh_tokens", "Total number of successful token refreshes", "refresh_tokens_errors", "Total number of failed token refreshes"),
            (EventKind::ClientLogin, EventKind::ClientLoginError, "client_logins", "Total successful client logins", "failed_client_login_attempts", "Total failed client login attempts"),
            (EventKind::CodeToToken, EventKind::CodeToTokenError, "code_to_tokens", "Total number of successful code to token", "code_to_tokens_errors", "Total number of failed code to token"),
        ];

        let mut dedicated = HashMap::new();
        for (success, error, success_name, success_help, error_name, error_help) in pairs {
            dedicated.insert(
                success,
                (counter(success_name, SUCCESS_LABELS, success_help)?, Dedicated::Success),
            );
            dedicated.insert(
                error,
                (counter(error_name, ERROR_LABELS, error_help)?, Dedicated::Error),
            );
        }

        let mut user_events = HashMap::new();
        for kind in EventKind::ALL {
            if dedicated.contains_key(kind) {
                continue;
            }
            let help = format!("Generic KeyCloak User event {kind}");
            user_events.insert(
                *kind,
                counter(&format!("user_event_{kind}"), &["realm"], &help)?,
            );
        }

        let mut admin_events = HashMap::new();
        for op in OperationKind::ALL {
            let help = format!("Generic KeyCloak Admin event {op}");
            admin_events.insert(
                *op,
                counter(&format!("admin_event_{op}"), &["realm", "resource"], &help)?,
            );
        }

        let gauge = |suffix: &str, help: &str| {
            registry.register(&name(suffix), MetricKind::Gauge, &["realm", "client_id"], help)
        };

        let logged_in_users = registry.register(
            &name("logged_in_users"),
            MetricKind::Gauge,
            &["realm"],
            "Current logged in users",
        )?;

        Ok(Self {
            platform: platform.to_owned(),
            login_attempts,
            logged_in_users,
            dedicated,
            user_events,
            admin_events,
            online_sessions: gauge("online_sessions", "Total online sessions")?,
            offline_sessions: gauge("offline_sessions", "Total offline sessions")?,
        })
    }

    /// Number of generic user and admin event series.
    pub fn generic_series(&self) -> usize {
        self.user_events.len() + self.admin_events.len()
    }

    /// Record a user event.
    pub fn record_user_event(&self, event: &UserEvent) -> Result<(), EventError> {
        let kind = event.event_kind()?;
        let realm = sanitize(event.realm_id.as_deref());

        match kind {
            EventKind::Login => self.logged_in_users.add(&[&realm], 1.0)?,
            EventKind::Logout => self.logged_in_users.add(&[&realm], -1.0)?,
            _ => {},
        }

        if let Some((series, dedicated)) = self.dedicated.get(&kind) {
            let provider = self.provider(event);
            let client = sanitize(event.client_id.as_deref());

            if matches!(kind, EventKind::Login | EventKind::LoginError) {
                self.login_attempts
                    .increment(&[&realm, &provider, &client], 1)?;
            }

            match dedicated {
                Dedicated::Success => {
                    series.increment(&[&realm, &provider, &client], 1)?
                },
                Dedicated::Error => {
                    let error = sanitize(event.error.as_deref());
                    series.increment(&[&realm, &provider, &error, &client], 1)?
                },
            }
            return Ok(());
        }

        match self.user_events.get(&kind) {
            Some(series) => Ok(series.increment(&[realm], 1)?),
            None => Err(EventError::Unregistered(kind.to_string())),
        }
    }

    /// Record an admin event.
    pub fn record_admin_event(&self, event: &AdminEvent) -> Result<(), EventError> {
        let op = event.operation()?;
        let realm = event.realm_id.as_deref().ok_or(EventError::MissingRealm)?;
        let resource = event
            .resource_kind
            .as_deref()
            .ok_or(EventError::MissingResourceKind)?;

        match self.admin_events.get(&op) {
            Some(series) => Ok(series.increment(&[realm, resource], 1)?),
            None => Err(EventError::Unregistered(op.to_string())),
        }
    }

    /// Set the active session gauges of a realm.
    pub fn record_sessions(&self, stats: &SessionStats) -> Result<(), RegistryError> {
        for (client, count) in &stats.online {
            self.online_sessions
                .set(&[stats.realm.as_str(), client.as_str()], *count as f64)?;
        }
        for (client, count) in &stats.offline {
            self.offline_sessions
                .set(&[stats.realm.as_str(), client.as_str()], *count as f64)?;
        }
        Ok(())
    }

    /// Event kinds declared by the host that this build does not know.
    pub fn reconcile<S: AsRef<str>>(&self, declared: &[S]) -> Vec<String> {
        declared
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| name.parse::<EventKind>().is_err())
            .map(|name| {
                tracing::warn!(kind = name, "host event kind has no series, its events will be dropped");
                name.to_owned()
            })
            .collect()
    }

    fn provider(&self, event: &UserEvent) -> String {
        sanitize(Some(event.identity_provider().unwrap_or(&self.platform)))
    }
}
