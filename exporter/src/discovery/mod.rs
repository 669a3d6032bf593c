//! Dynamic API discovery with a TTL cache.
//!
//! The server's resource universe is not known ahead of time (CRDs,
//! OpenShift extensions), so each run asks the API server what exists
//! and filters the answer down to the configured whitelist.

mod openshift;

pub use openshift::OpenShiftDetector;

use crate::error::SvcError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::{core::ApiResource, Client};
use std::time::Duration;
use tokio::{sync::RwLock, time::Instant};
use tracing::{debug, warn};

/// How long a successful discovery result is reused.
const DISCOVERY_TTL: Duration = Duration::from_secs(300);

/// One row of the discovery table: the minimal identifier needed to
/// LIST a kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub group: String,
    pub version: String,
    /// Plural resource name, e.g. `configmaps`.
    pub name: String,
    pub kind: String,
    pub namespaced: bool,
    pub verbs: Vec<String>,
}

impl ResourceDescriptor {
    /// `group/version`, or just the version for the core group.
    pub fn group_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// `name.group`, or the bare name for the core group.
    pub fn qualified_name(&self) -> String {
        if self.group.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.group)
        }
    }

    /// Whether the descriptor belongs to an OpenShift API group.
    pub fn is_openshift(&self) -> bool {
        self.group.ends_with(".openshift.io")
    }

    /// Typed handle for dynamic listing.
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.group_version(),
            kind: self.kind.clone(),
            plural: self.name.clone(),
        }
    }
}

/// Split a `group/version` discovery header. The core group reads as
/// a bare version.
fn split_group_version(group_version: &str) -> Option<(String, String)> {
    if group_version.is_empty() {
        return None;
    }
    match group_version.split('/').collect::<Vec<_>>()[..] {
        [version] => Some((String::new(), version.to_string())),
        [group, version] => Some((group.to_string(), version.to_string())),
        _ => None,
    }
}

/// Flatten one APIResourceList into descriptors. The list's
/// `group_version` header is authoritative; the per-resource group and
/// version fields are frequently empty for core resources and are
/// overwritten from it. A list whose header does not parse is skipped.
fn descriptors_from_list(list: &APIResourceList) -> Vec<ResourceDescriptor> {
    let Some((group, version)) = split_group_version(&list.group_version) else {
        debug!(header = %list.group_version, "unparseable group-version header, skipping");
        return Vec::new();
    };
    list.resources
        .iter()
        .map(|resource| ResourceDescriptor {
            group: group.clone(),
            version: version.clone(),
            name: resource.name.clone(),
            kind: resource.kind.clone(),
            namespaced: resource.namespaced,
            verbs: resource.verbs.clone(),
        })
        .collect()
}

/// Whitelist filter: listable, not a subresource, named by the
/// inclusion list in bare or `name.group` form.
fn eligible(descriptor: &ResourceDescriptor, includes: &[String]) -> bool {
    descriptor.verbs.iter().any(|verb| verb == "list")
        && !descriptor.name.contains('/')
        && (includes.iter().any(|inc| *inc == descriptor.name)
            || includes.iter().any(|inc| *inc == descriptor.qualified_name()))
}

/// Server discovery results cached for [`DISCOVERY_TTL`].
pub struct DiscoveryCache {
    client: Client,
    includes: Vec<String>,
    cache: RwLock<Option<(Vec<ResourceDescriptor>, Instant)>>,
}

impl DiscoveryCache {
    pub fn new(client: Client, includes: Vec<String>) -> Self {
        Self {
            client,
            includes,
            cache: RwLock::new(None),
        }
    }

    /// The union of all server-known resources, filtered by the
    /// whitelist. Reuses the previous answer while it is fresh.
    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, SvcError> {
        if let Some((descriptors, fetched_at)) = self.cache.read().await.as_ref() {
            if fetched_at.elapsed() < DISCOVERY_TTL {
                return Ok(descriptors.clone());
            }
        }

        let lists = self.fetch().await?;
        let mut descriptors: Vec<ResourceDescriptor> = Vec::new();
        for list in &lists {
            for descriptor in descriptors_from_list(list) {
                if !eligible(&descriptor, &self.includes) {
                    continue;
                }
                // Complete discovery sees every served version; one
                // (group, plural) pair is enough to back the kind up.
                if descriptors
                    .iter()
                    .any(|d| d.qualified_name() == descriptor.qualified_name())
                {
                    continue;
                }
                descriptors.push(descriptor);
            }
        }

        *self.cache.write().await = Some((descriptors.clone(), Instant::now()));
        Ok(descriptors)
    }

    /// Complete discovery first; any failure falls back to preferred
    /// resources only.
    async fn fetch(&self) -> Result<Vec<APIResourceList>, SvcError> {
        match self.complete().await {
            Ok(lists) => Ok(lists),
            Err(error) => {
                debug!(%error, "complete discovery failed, using preferred resources");
                self.preferred().await.map_err(|error| SvcError::Discovery {
                    reason: error.to_string(),
                })
            }
        }
    }

    /// Every version of every group. A group that fails to enumerate
    /// is logged and skipped, not fatal.
    async fn complete(&self) -> Result<Vec<APIResourceList>, kube::Error> {
        let mut lists = Vec::new();
        let core = self.client.list_core_api_versions().await?;
        for version in &core.versions {
            match self.client.list_core_api_resources(version).await {
                Ok(list) => lists.push(list),
                Err(error) => warn!(%version, %error, "core version discovery failed"),
            }
        }
        let groups = self.client.list_api_groups().await?;
        for group in &groups.groups {
            for version in &group.versions {
                match self
                    .client
                    .list_api_group_resources(&version.group_version)
                    .await
                {
                    Ok(list) => lists.push(list),
                    Err(error) => {
                        warn!(group = %group.name, version = %version.version, %error,
                            "group discovery failed")
                    }
                }
            }
        }
        Ok(lists)
    }

    /// Preferred version of each group only.
    async fn preferred(&self) -> Result<Vec<APIResourceList>, kube::Error> {
        let mut lists = Vec::new();
        if let Ok(list) = self.client.list_core_api_resources("v1").await {
            lists.push(list);
        }
        let groups = self.client.list_api_groups().await?;
        for group in &groups.groups {
            let Some(preferred) = group.preferred_version.as_ref() else {
                continue;
            };
            match self
                .client
                .list_api_group_resources(&preferred.group_version)
                .await
            {
                Ok(list) => lists.push(list),
                Err(error) => {
                    warn!(group = %group.name, %error, "preferred discovery failed")
                }
            }
        }
        Ok(lists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResource;

    fn api_resource(name: &str, kind: &str, verbs: &[&str]) -> APIResource {
        APIResource {
            name: name.to_string(),
            kind: kind.to_string(),
            namespaced: true,
            verbs: verbs.iter().map(|v| v.to_string()).collect(),
            singular_name: String::new(),
            ..Default::default()
        }
    }

    #[test]
    fn group_version_header_overrides_empty_resource_fields() {
        // Server answers often leave per-resource group/version blank.
        let list = APIResourceList {
            group_version: "apps/v1".to_string(),
            resources: vec![api_resource("deployments", "Deployment", &["list", "get"])],
        };
        let descriptors = descriptors_from_list(&list);
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].group, "apps");
        assert_eq!(descriptors[0].version, "v1");
        assert_eq!(descriptors[0].group_version(), "apps/v1");
        assert_eq!(descriptors[0].qualified_name(), "deployments.apps");
    }

    #[test]
    fn core_group_parses_as_bare_version() {
        let list = APIResourceList {
            group_version: "v1".to_string(),
            resources: vec![api_resource("configmaps", "ConfigMap", &["list"])],
        };
        let descriptors = descriptors_from_list(&list);
        assert_eq!(descriptors[0].group, "");
        assert_eq!(descriptors[0].group_version(), "v1");
        assert_eq!(descriptors[0].qualified_name(), "configmaps");
    }

    #[test]
    fn unparseable_header_skips_the_record() {
        let list = APIResourceList {
            group_version: "a/b/c".to_string(),
            resources: vec![api_resource("things", "Thing", &["list"])],
        };
        assert!(descriptors_from_list(&list).is_empty());

        let list = APIResourceList {
            group_version: String::new(),
            resources: vec![api_resource("things", "Thing", &["list"])],
        };
        assert!(descriptors_from_list(&list).is_empty());
    }

    #[test]
    fn eligibility_requires_list_verb_and_no_subresource() {
        let includes = vec!["pods".to_string(), "deployments.apps".to_string()];
        let mut pod = ResourceDescriptor {
            group: String::new(),
            version: "v1".to_string(),
            name: "pods".to_string(),
            kind: "Pod".to_string(),
            namespaced: true,
            verbs: vec!["list".to_string(), "get".to_string()],
        };
        assert!(eligible(&pod, &includes));

        pod.verbs = vec!["get".to_string()];
        assert!(!eligible(&pod, &includes));

        let status = ResourceDescriptor {
            name: "pods/status".to_string(),
            verbs: vec!["list".to_string()],
            ..pod.clone()
        };
        assert!(!eligible(&status, &includes));

        let deploy = ResourceDescriptor {
            group: "apps".to_string(),
            version: "v1".to_string(),
            name: "deployments".to_string(),
            kind: "Deployment".to_string(),
            namespaced: true,
            verbs: vec!["list".to_string()],
        };
        assert!(eligible(&deploy, &includes));

        let other = ResourceDescriptor {
            name: "statefulsets".to_string(),
            ..deploy
        };
        assert!(!eligible(&other, &includes));
    }

    #[test]
    fn openshift_groups_are_recognized() {
        let route = ResourceDescriptor {
            group: "route.openshift.io".to_string(),
            version: "v1".to_string(),
            name: "routes".to_string(),
            kind: "Route".to_string(),
            namespaced: true,
            verbs: vec!["list".to_string()],
        };
        assert!(route.is_openshift());
    }
}
