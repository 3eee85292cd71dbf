//! Cardinality control for HTTP path data.
//!
//! Raw request paths carry realm names, client IDs and user IDs. Two labels
//! are derived from them instead:
//! - `resource`, always emitted, built from the matched route templates;
//! - `uri`, opt-in, the request path with dynamic segments replaced by
//!   placeholders (or untouched in detailed mode).

use std::sync::LazyLock;

use regex_lite::Regex;

use crate::config::UriMetrics;

/// Root template of static assets.
const STATIC_RESOURCES: &str = "resources";
/// `uri` label for responses to unknown paths.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// `uri` label for redirections.
pub const REDIRECTION: &str = "REDIRECTION";

static REALM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?:admin/)?realms/)[^/]+").expect("valid realm pattern")
});
static ADMIN_CLIENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(admin/realms/\{realm\}/clients/)[^/]+")
        .expect("valid client pattern")
});

/// Build the `resource` label from route templates, most specific first.
///
/// The last path segment of the two most specific templates, joined by a
/// comma. Static assets all share the empty label.
pub fn resource(matched_uris: &[String]) -> String {
    let [first, second, ..] = matched_uris else {
        return String::default();
    };

    let is_static = matched_uris
        .last()
        .is_some_and(|root| root.trim_matches('/') == STATIC_RESOURCES)
        || first.trim_start_matches('/').starts_with("resources/");
    if is_static {
        return String::default();
    }

    format!("{},{}", last_segment(first), last_segment(second))
}

fn last_segment(template: &str) -> &str {
    template
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

/// Replace the realm segment, and the client segment of admin client
/// routes, by `{realm}` and `{id}`.
pub fn normalize(path: &str) -> String {
    let path = path.trim_start_matches('/');
    let path = REALM.replace(path, "${1}{realm}");
    ADMIN_CLIENT.replace(&path, "${1}{id}").into_owned()
}

/// Produces `resource` and `uri` labels according to configuration.
#[derive(Debug, Clone, Default)]
pub struct ResourceExtractor {
    resource_disabled: bool,
    uri: UriMetrics,
}

impl ResourceExtractor {
    /// Create a new [`ResourceExtractor`].
    pub fn new(resource_disabled: bool, uri: UriMetrics) -> Self {
        Self {
            resource_disabled,
            uri,
        }
    }

    /// Whether responses carry a `uri` label at all.
    pub fn uri_enabled(&self) -> bool {
        self.uri.enabled
    }

    /// `resource` label for a request.
    pub fn resource(&self, matched_uris: &[String]) -> String {
        if self.resource_disabled {
            String::default()
        } else {
            resource(matched_uris)
        }
    }

    /// `uri` label for a request.
    pub fn uri(&self, path: &str, status: u16) -> String {
        match status {
            404 => return NOT_FOUND.to_owned(),
            300..=399 => return REDIRECTION.to_owned(),
            _ => {},
        }

        let normalized = normalize(path);
        if !self.uri.filter.is_empty()
            && !self
                .uri
                .filter
                .iter()
                .any(|prefix| normalized.starts_with(prefix.trim_start_matches('/')))
        {
            return String::default();
        }

        if self.uri.detailed {
            path.trim_start_matches('/').to_owned()
        } else {
            normalized
        }
    }
}
