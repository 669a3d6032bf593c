use kube::Client;
use std::time::Duration;
use tokio::{sync::RwLock, time::Instant};
use tracing::debug;

/// How long a detection verdict is reused.
const DETECTION_TTL: Duration = Duration::from_secs(3600);

/// Decides whether the cluster serves OpenShift API groups.
pub struct OpenShiftDetector {
    client: Client,
    cache: RwLock<Option<(bool, Instant)>>,
}

impl OpenShiftDetector {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: RwLock::new(None),
        }
    }

    /// True when any served API group name ends with `.openshift.io`.
    /// A fetch failure reads as a plain Kubernetes cluster.
    pub async fn detect(&self) -> bool {
        if let Some((enabled, checked_at)) = self.cache.read().await.as_ref() {
            if checked_at.elapsed() < DETECTION_TTL {
                return *enabled;
            }
        }

        let enabled = match self.client.list_api_groups().await {
            Ok(groups) => groups
                .groups
                .iter()
                .any(|group| group.name.ends_with(".openshift.io")),
            Err(error) => {
                debug!(%error, "API group fetch failed, assuming plain kubernetes");
                false
            }
        };

        *self.cache.write().await = Some((enabled, Instant::now()));
        enabled
    }
}
