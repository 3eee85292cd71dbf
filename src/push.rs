//! Delivery of registry snapshots to a Prometheus push gateway.
//!
//! One worker task drains a queue holding at most one pending push. The
//! snapshot is taken when the push runs, so requests made while a push is
//! already pending are folded into it.

use std::net::IpAddr;
use std::sync::Arc;

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use url::Url;

use crate::config::{GroupingKey, PushTarget};
use crate::error::PushError;
use crate::exposition;
use crate::registry::Registry;

/// Handle used to request pushes.
#[derive(Debug, Clone, Default)]
pub struct PushDispatcher {
    sender: Option<mpsc::Sender<()>>,
}

impl PushDispatcher {
    /// A dispatcher that never pushes.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Spawn the push worker on the current tokio runtime.
    ///
    /// Without a target, or outside a runtime, the dispatcher is disabled.
    pub fn spawn(target: Option<PushTarget>, registry: Arc<Registry>) -> Self {
        let Some(target) = target else {
            return Self::disabled();
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!("no tokio runtime available, pushes are disabled");
            return Self::disabled();
        };

        let (sender, mut receiver) = mpsc::channel::<()>(1);
        let client = Client::new();
        tracing::info!(url = %target.base_url, job = %target.job, "push gateway enabled");

        runtime.spawn(async move {
            while receiver.recv().await.is_some() {
                if let Err(err) = push_once(&client, &target, &registry).await {
                    tracing::error!(%err, url = %target.base_url, "failed to push metrics");
                }
            }
        });

        Self {
            sender: Some(sender),
        }
    }

    /// A dispatcher whose requests land on the returned receiver.
    #[cfg(test)]
    pub(crate) fn channel() -> (Self, mpsc::Receiver<()>) {
        let (sender, receiver) = mpsc::channel(1);
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Request a push without waiting for it.
    ///
    /// Returns `false` when nothing new was scheduled: the dispatcher is
    /// disabled, or a pending push already covers this request.
    pub fn push_async(&self) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };

        match sender.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => false,
            Err(TrySendError::Closed(())) => {
                tracing::warn!("push worker stopped, snapshot dropped");
                false
            },
        }
    }
}

/// Push the current snapshot once, with push-add semantics.
pub async fn push_once(
    client: &Client,
    target: &PushTarget,
    registry: &Registry,
) -> Result<(), PushError> {
    let instance = match &target.grouping_key {
        GroupingKey::LocalAddress => local_address(&target.base_url).await?.to_string(),
        key => resolve_with(key, |name| std::env::var(name).ok())?,
    };
    let url = push_url(&target.base_url, &target.job, &instance)?;

    client
        .post(url)
        .header(CONTENT_TYPE, exposition::CONTENT_TYPE)
        .body(exposition::render(registry))
        .send()
        .await?
        .error_for_status()?;

    tracing::debug!(job = %target.job, %instance, "metrics pushed");
    Ok(())
}

/// Resolve a configured grouping key, reading variables through `lookup`.
pub fn resolve_with(
    key: &GroupingKey,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, PushError> {
    match key {
        GroupingKey::Literal(value) => Ok(value.clone()),
        GroupingKey::Env(variable) => lookup(variable)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                PushError::GroupingKey(format!("variable {variable} is not set"))
            }),
        GroupingKey::LocalAddress => Err(PushError::GroupingKey(
            "local address is resolved at push time".to_owned(),
        )),
    }
}

/// Outbound address used to reach the gateway. No packet is sent.
async fn local_address(gateway: &Url) -> Result<IpAddr, PushError> {
    let host = gateway
        .host_str()
        .ok_or_else(|| PushError::GroupingKey(format!("{gateway} has no host")))?;
    let port = gateway.port_or_known_default().unwrap_or(80);
    let io = |err: std::io::Error| PushError::GroupingKey(err.to_string());

    let socket = UdpSocket::bind(("0.0.0.0", 0)).await.map_err(io)?;
    socket.connect((host, port)).await.map_err(io)?;
    Ok(socket.local_addr().map_err(io)?.ip())
}

fn push_url(base: &Url, job: &str, instance: &str) -> Result<Url, PushError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| PushError::Url(base.to_string()))?
        .pop_if_empty()
        .extend(["metrics", "job", job, "instance", instance]);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(address: &str) -> PushTarget {
        PushTarget {
            base_url: Url::parse(address).unwrap(),
            job: "keycloak".into(),
            grouping_key: GroupingKey::Literal("node-1".into()),
        }
    }

    #[test]
    fn test_push_url() {
        let url = push_url(&Url::parse("http://gateway:9091").unwrap(), "keycloak", "10.0.0.2")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://gateway:9091/metrics/job/keycloak/instance/10.0.0.2"
        );

        let url = push_url(&Url::parse("http://gateway:9091/prefix/").unwrap(), "my job", "a/b")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://gateway:9091/prefix/metrics/job/my%20job/instance/a%2Fb"
        );
    }

    #[test]
    fn test_grouping_key() {
        let lookup = |name: &str| (name == "HOSTNAME").then(|| "pod-7".to_owned());

        assert_eq!(
            resolve_with(&GroupingKey::Literal("node-1".into()), lookup).unwrap(),
            "node-1"
        );
        assert_eq!(
            resolve_with(&GroupingKey::Env("HOSTNAME".into()), lookup).unwrap(),
            "pod-7"
        );
        assert!(matches!(
            resolve_with(&GroupingKey::Env("MISSING".into()), lookup),
            Err(PushError::GroupingKey(_))
        ));
    }

    #[tokio::test]
    async fn test_without_target_nothing_is_pushed() {
        let dispatcher = PushDispatcher::spawn(None, Arc::new(Registry::default()));
        assert!(!dispatcher.push_async());
        assert!(!PushDispatcher::disabled().push_async());
    }

    #[tokio::test]
    async fn test_pending_push_coalesces() {
        let (dispatcher, _receiver) = PushDispatcher::channel();
        assert!(dispatcher.push_async());
        assert!(!dispatcher.push_async());
    }

    #[tokio::test]
    async fn test_failure_does_not_escape() {
        let registry = Arc::new(Registry::default());
        let target = target("http://127.0.0.1:1");

        assert!(matches!(
            push_once(&Client::new(), &target, &registry).await,
            Err(PushError::Http(_))
        ));

        let dispatcher = PushDispatcher::spawn(Some(target), registry);
        assert!(dispatcher.push_async());
        tokio::task::yield_now().await;
        dispatcher.push_async();
    }

    #[tokio::test]
    async fn test_local_address() {
        let address = local_address(&Url::parse("http://127.0.0.1:9091").unwrap())
            .await
            .unwrap();
        assert!(address.is_loopback());
    }
}
