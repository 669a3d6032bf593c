//! Priority-driven resource ordering.
//!
//! Every (resource, namespace, labels) triple maps to an integer
//! priority; lower runs earlier. The tables arrive in a ConfigMap at
//! startup and fall back to a deterministic flat configuration when
//! that load fails, so ordering is always well defined.

use indexmap::IndexMap;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{api::Api, Client};
use parking_lot::RwLock;
use resilience::RetryExecutor;
use serde::{Deserialize, Deserializer};
use std::{collections::BTreeMap, time::Duration};
use tracing::{info, warn};

/// Data key holding the YAML payload inside the ConfigMap.
const CONFIG_KEY: &str = "config.yaml";

/// Priority assigned to kinds absent from every category table.
const DEFAULT_PRIORITY: i32 = 80;
/// Priority answered for everything when the ConfigMap load fails.
const FALLBACK_PRIORITY: i32 = 1000;

fn duration_from_str<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Retry settings for one priority band.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetryProfile {
    pub attempts: u32,
    #[serde(deserialize_with = "duration_from_str")]
    pub initial_delay: Duration,
    #[serde(deserialize_with = "duration_from_str")]
    pub max_delay: Duration,
}

impl Default for RetryProfile {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryProfile {
    /// Executor honoring this profile.
    pub fn executor(&self) -> RetryExecutor {
        RetryExecutor::new(self.attempts, self.initial_delay, self.max_delay)
    }
}

/// Priority tables as they appear in the ConfigMap payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PriorityConfig {
    pub core: IndexMap<String, i32>,
    pub rbac: IndexMap<String, i32>,
    pub network: IndexMap<String, i32>,
    pub workload: IndexMap<String, i32>,
    pub openshift_core: IndexMap<String, i32>,
    pub openshift_security: IndexMap<String, i32>,
    pub storage: IndexMap<String, i32>,
    pub custom: IndexMap<String, i32>,
    /// Resource names, or substrings of a group-version, to skip.
    pub exclude: Vec<String>,
    /// `key=value` label rules applied in order; first match wins.
    pub label_adjustments: IndexMap<String, i32>,
    /// Additive boost per namespace.
    pub priority_boost: IndexMap<String, i32>,
    /// Keyed by band name: `critical`, `normal`, `low`.
    pub retry_profiles: IndexMap<String, RetryProfile>,
    pub default_priority: i32,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            core: IndexMap::new(),
            rbac: IndexMap::new(),
            network: IndexMap::new(),
            workload: IndexMap::new(),
            openshift_core: IndexMap::new(),
            openshift_security: IndexMap::new(),
            storage: IndexMap::new(),
            custom: IndexMap::new(),
            exclude: Vec::new(),
            label_adjustments: IndexMap::new(),
            priority_boost: IndexMap::new(),
            retry_profiles: IndexMap::new(),
            default_priority: DEFAULT_PRIORITY,
        }
    }
}

impl PriorityConfig {
    /// Category tables in their fixed scan order.
    fn categories(&self) -> [&IndexMap<String, i32>; 8] {
        [
            &self.core,
            &self.rbac,
            &self.network,
            &self.workload,
            &self.openshift_core,
            &self.openshift_security,
            &self.storage,
            &self.custom,
        ]
    }
}

/// Priority band; drives the retry profile choice.
fn band(priority: i32) -> &'static str {
    if priority <= 10 {
        "critical"
    } else if priority <= 50 {
        "normal"
    } else {
        "low"
    }
}

/// Read-mostly priority oracle. `priority` is on the hot path, so
/// readers never contend; a future config reload would take the writer
/// side.
pub struct PriorityManager {
    config: RwLock<PriorityConfig>,
}

impl PriorityManager {
    pub fn new(config: PriorityConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Deterministic answers when no configuration could be loaded:
    /// the same priority for everything, no exclusions, default retry.
    pub fn fallback() -> Self {
        Self::new(PriorityConfig {
            default_priority: FALLBACK_PRIORITY,
            ..Default::default()
        })
    }

    /// Load the configuration from its ConfigMap; any failure on the
    /// way selects the fallback.
    pub async fn from_configmap(client: &Client, namespace: &str, name: &str) -> Self {
        let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
        let payload = match api.get(name).await {
            Ok(cm) => cm.data.unwrap_or_default().remove(CONFIG_KEY),
            Err(error) => {
                warn!(%namespace, configmap = %name, %error,
                    "priority ConfigMap unavailable, using fallback priorities");
                return Self::fallback();
            }
        };
        let Some(payload) = payload else {
            warn!(%namespace, configmap = %name, key = CONFIG_KEY,
                "priority ConfigMap is missing its payload key, using fallback priorities");
            return Self::fallback();
        };
        match serde_yaml::from_str::<PriorityConfig>(&payload) {
            Ok(config) => {
                info!(%namespace, configmap = %name, "priority configuration loaded");
                Self::new(config)
            }
            Err(error) => {
                warn!(%namespace, configmap = %name, %error,
                    "priority configuration unparseable, using fallback priorities");
                Self::fallback()
            }
        }
    }

    /// Priority of one (resource, namespace, labels) triple. Category
    /// tables are scanned in fixed order with the first hit winning,
    /// then the namespace boost and the first matching label rule are
    /// added. Never below 1.
    pub fn priority(
        &self,
        resource: &str,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> i32 {
        let config = self.config.read();
        let mut priority = config
            .categories()
            .iter()
            .find_map(|table| table.get(resource))
            .copied()
            .unwrap_or(config.default_priority);

        priority += config.priority_boost.get(namespace).copied().unwrap_or(0);

        for (rule, delta) in &config.label_adjustments {
            let Some((key, value)) = rule.split_once('=') else {
                continue;
            };
            if labels.get(key).map(String::as_str) == Some(value) {
                priority += delta;
                break;
            }
        }

        priority.max(1)
    }

    /// True when the exclude list names the resource exactly or any
    /// entry is a substring of its group-version.
    pub fn is_excluded(&self, name: &str, group_version: &str) -> bool {
        let config = self.config.read();
        config
            .exclude
            .iter()
            .any(|entry| entry == name || group_version.contains(entry.as_str()))
    }

    /// Retry profile for a priority band, falling back to `normal`,
    /// then to the built-in default.
    pub fn retry_profile(&self, priority: i32) -> RetryProfile {
        let config = self.config.read();
        config
            .retry_profiles
            .get(band(priority))
            .or_else(|| config.retry_profiles.get("normal"))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn manager() -> PriorityManager {
        let mut config = PriorityConfig::default();
        config.core.insert("configmaps".to_string(), 5);
        config.core.insert("secrets".to_string(), 5);
        config.workload.insert("deployments".to_string(), 30);
        // A workload entry must not shadow the earlier core table.
        config.workload.insert("configmaps".to_string(), 99);
        config.exclude.push("events".to_string());
        config.exclude.push("metrics.k8s.io".to_string());
        config
            .label_adjustments
            .insert("tier=critical".to_string(), -10);
        config.label_adjustments.insert("tier=batch".to_string(), 20);
        config.priority_boost.insert("prod".to_string(), -2);
        config.retry_profiles.insert(
            "critical".to_string(),
            RetryProfile {
                attempts: 5,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
            },
        );
        PriorityManager::new(config)
    }

    #[test]
    fn first_category_hit_wins() {
        let m = manager();
        assert_eq!(m.priority("configmaps", "app", &labels(&[])), 5);
        assert_eq!(m.priority("deployments", "app", &labels(&[])), 30);
        // Unknown kinds land on the default.
        assert_eq!(m.priority("widgets", "app", &labels(&[])), 80);
    }

    #[test]
    fn namespace_boost_and_first_label_rule_apply() {
        let m = manager();
        assert_eq!(m.priority("configmaps", "prod", &labels(&[])), 3);
        assert_eq!(
            m.priority("deployments", "app", &labels(&[("tier", "batch")])),
            50
        );
        // First matching rule only, scan stops there.
        assert_eq!(
            m.priority(
                "deployments",
                "prod",
                &labels(&[("tier", "critical"), ("other", "x")])
            ),
            18
        );
    }

    #[test]
    fn priority_never_drops_below_one() {
        let m = manager();
        assert_eq!(
            m.priority("configmaps", "prod", &labels(&[("tier", "critical")])),
            1
        );
    }

    #[test]
    fn exclusion_by_name_or_group_version_substring() {
        let m = manager();
        assert!(m.is_excluded("events", "v1"));
        assert!(m.is_excluded("nodes", "metrics.k8s.io/v1beta1"));
        assert!(!m.is_excluded("configmaps", "v1"));
    }

    #[test]
    fn retry_profile_bands() {
        let m = manager();
        assert_eq!(m.retry_profile(5).attempts, 5);
        // No normal profile configured: built-in default.
        assert_eq!(m.retry_profile(30), RetryProfile::default());
        assert_eq!(m.retry_profile(80), RetryProfile::default());
    }

    #[test]
    fn fallback_is_deterministic() {
        let m = PriorityManager::fallback();
        assert_eq!(m.priority("anything", "anywhere", &labels(&[])), 1000);
        assert!(!m.is_excluded("anything", "v1"));
        assert_eq!(m.retry_profile(1000), RetryProfile::default());
    }

    #[test]
    fn configmap_payload_parses() {
        let payload = r#"
core:
  configmaps: 5
rbac:
  clusterroles: 14
exclude:
  - events
labelAdjustments:
  "tier=critical": -10
priorityBoost:
  prod: -2
retryProfiles:
  critical:
    attempts: 5
    initialDelay: 1s
    maxDelay: 30s
defaultPriority: 80
"#;
        let config: PriorityConfig = serde_yaml::from_str(payload).expect("parses");
        assert_eq!(config.core.get("configmaps"), Some(&5));
        assert_eq!(config.rbac.get("clusterroles"), Some(&14));
        assert_eq!(
            config.retry_profiles.get("critical").map(|p| p.attempts),
            Some(5)
        );
        assert_eq!(config.default_priority, 80);
    }
}
