//! Streaming extraction: for one target (a namespace or the
//! cluster-global scope), list every eligible kind in ascending
//! priority order, page by page, normalizing and uploading each
//! object as it arrives.

use crate::{
    config::RunConfig,
    discovery::ResourceDescriptor,
    error::SvcError,
    layout::{self, CLUSTER_GLOBAL},
    metrics::Metrics,
    normalize::Normalizer,
    priority::PriorityManager,
};
use kube::{
    api::{Api, DynamicObject, ListParams},
    core::ObjectList,
    Client,
};
use resilience::{BreakerError, CircuitBreaker, RetryError, RetryExecutor, BACKOFF_CAP};
use std::{collections::BTreeMap, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deadline for one list request, independent of the run deadline.
const LIST_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-(target, kind) tallies.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Counters {
    pub backed_up: u64,
    pub skipped: u64,
    pub invalid: u64,
    pub total: u64,
}

impl Counters {
    pub fn add(&mut self, other: &Counters) {
        self.backed_up += other.backed_up;
        self.skipped += other.skipped;
        self.invalid += other.invalid;
        self.total += other.total;
    }
}

/// Result of extracting one kind within a target.
#[derive(Debug)]
pub struct KindOutcome {
    pub resource: String,
    pub counters: Counters,
    pub error: Option<String>,
}

/// Result of extracting one target.
#[derive(Debug)]
pub struct TargetReport {
    /// Namespace name, or `cluster-global`.
    pub target: String,
    pub outcomes: Vec<KindOutcome>,
}

impl TargetReport {
    /// Whether any kind within the target errored.
    pub fn failed(&self) -> bool {
        self.outcomes.iter().any(|outcome| outcome.error.is_some())
    }

    /// Aggregate counters across kinds.
    pub fn counters(&self) -> Counters {
        let mut total = Counters::default();
        for outcome in &self.outcomes {
            total.add(&outcome.counters);
        }
        total
    }

    /// Kinds that errored.
    pub fn error_count(&self) -> u64 {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.error.is_some())
            .count() as u64
    }
}

enum Processed {
    Uploaded,
    Skipped,
    Invalid,
}

/// Ascending priority, ties kept in discovery order.
pub fn order_descriptors(
    priorities: &PriorityManager,
    target: &str,
    descriptors: &[ResourceDescriptor],
) -> Vec<ResourceDescriptor> {
    let labels = BTreeMap::new();
    let mut ordered = descriptors.to_vec();
    ordered.sort_by_key(|descriptor| priorities.priority(&descriptor.name, target, &labels));
    ordered
}

/// Drives extraction for one run. Listing goes through the API
/// breaker with the retry profile of the kind's priority band;
/// uploads go through the store gateway's breaker with the run's
/// configured retry budget.
pub struct Extractor<'a> {
    client: Client,
    store: &'a ostor::ObjectStore,
    api_breaker: &'a CircuitBreaker,
    priorities: &'a PriorityManager,
    normalizer: &'a Normalizer,
    config: &'a RunConfig,
    cancel: &'a CancellationToken,
    metrics: &'a Metrics,
    /// Upload retry budget from the run configuration; listing uses
    /// the priority band's profile instead.
    store_retry: RetryExecutor,
}

impl<'a> Extractor<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Client,
        store: &'a ostor::ObjectStore,
        api_breaker: &'a CircuitBreaker,
        priorities: &'a PriorityManager,
        normalizer: &'a Normalizer,
        config: &'a RunConfig,
        cancel: &'a CancellationToken,
        metrics: &'a Metrics,
    ) -> Self {
        let store_retry =
            RetryExecutor::new(config.retry_attempts, config.retry_delay, BACKOFF_CAP);
        Self {
            client,
            store,
            api_breaker,
            priorities,
            normalizer,
            config,
            cancel,
            metrics,
            store_retry,
        }
    }

    /// Back up every descriptor within one target. A kind that fails
    /// is recorded and the next kind is tried; the target's aggregate
    /// is computed at the end.
    pub async fn backup_target(
        &self,
        namespace: Option<&str>,
        descriptors: &[ResourceDescriptor],
    ) -> TargetReport {
        let target = namespace.unwrap_or(CLUSTER_GLOBAL).to_string();
        let ordered = order_descriptors(self.priorities, &target, descriptors);

        let mut outcomes = Vec::with_capacity(ordered.len());
        for descriptor in &ordered {
            let outcome = self.backup_kind(namespace, descriptor).await;
            debug!(
                namespace = %target,
                resource = %descriptor.name,
                backed_up = outcome.counters.backed_up,
                skipped = outcome.counters.skipped,
                invalid = outcome.counters.invalid,
                error = outcome.error.as_deref().unwrap_or(""),
                "kind finished"
            );
            outcomes.push(outcome);
        }

        let report = TargetReport { target, outcomes };
        let counters = report.counters();
        info!(
            operation = "namespace_backup",
            namespace = %report.target,
            backed_up = counters.backed_up,
            skipped = counters.skipped,
            invalid = counters.invalid,
            total = counters.total,
            errors = report.error_count(),
            "target finished"
        );
        report
    }

    /// Paginated extraction of one kind.
    async fn backup_kind(
        &self,
        namespace: Option<&str>,
        descriptor: &ResourceDescriptor,
    ) -> KindOutcome {
        let target = namespace.unwrap_or(CLUSTER_GLOBAL);
        let priority = self
            .priorities
            .priority(&descriptor.name, target, &BTreeMap::new());
        let retry = self.priorities.retry_profile(priority).executor();

        let api_resource = descriptor.api_resource();
        let api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &api_resource),
            None => Api::all_with(self.client.clone(), &api_resource),
        };

        let mut counters = Counters::default();
        let mut continue_token: Option<String> = None;
        loop {
            let page = match self
                .list_page(&api, descriptor, target, &retry, continue_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(error) => {
                    self.metrics.errors_total.inc();
                    warn!(
                        namespace = %target,
                        resource = %descriptor.name,
                        %error,
                        "listing failed, advancing to next kind"
                    );
                    return KindOutcome {
                        resource: descriptor.name.clone(),
                        counters,
                        error: Some(error.to_string()),
                    };
                }
            };

            if page.items.is_empty() {
                break;
            }
            for object in page.items {
                counters.total += 1;
                match self.process_object(namespace, descriptor, object).await {
                    Ok(Processed::Uploaded) => counters.backed_up += 1,
                    Ok(Processed::Skipped) => counters.skipped += 1,
                    Ok(Processed::Invalid) => counters.invalid += 1,
                    Err(error) => {
                        // One failed upload means the rest of this kind
                        // would exhaust the same budget; abandon the
                        // kind, not the run.
                        self.metrics.errors_total.inc();
                        warn!(
                            namespace = %target,
                            resource = %descriptor.name,
                            %error,
                            "upload failed, abandoning kind"
                        );
                        return KindOutcome {
                            resource: descriptor.name.clone(),
                            counters,
                            error: Some(error.to_string()),
                        };
                    }
                }
            }

            match page.metadata.continue_ {
                Some(token) if !token.is_empty() => continue_token = Some(token),
                _ => break,
            }
        }

        KindOutcome {
            resource: descriptor.name.clone(),
            counters,
            error: None,
        }
    }

    async fn list_page(
        &self,
        api: &Api<DynamicObject>,
        descriptor: &ResourceDescriptor,
        target: &str,
        retry: &RetryExecutor,
        continue_token: Option<&str>,
    ) -> Result<ObjectList<DynamicObject>, SvcError> {
        let result = self
            .api_breaker
            .call(|| {
                retry.execute("list", self.cancel, || {
                    let mut params = ListParams::default().limit(self.config.batch_size);
                    if let Some(selector) = &self.config.rules.label_selector {
                        params = params.labels(selector);
                    }
                    if let Some(token) = continue_token {
                        params = params.continue_token(token);
                    }
                    async move {
                        match tokio::time::timeout(LIST_TIMEOUT, api.list(&params)).await {
                            Ok(listed) => listed.map_err(SvcError::from),
                            Err(_) => Err(SvcError::ListResource {
                                resource: descriptor.name.clone(),
                                namespace: target.to_string(),
                                reason: format!(
                                    "timed out after {}s",
                                    LIST_TIMEOUT.as_secs()
                                ),
                            }),
                        }
                    }
                })
            })
            .await;

        match result {
            Ok(page) => Ok(page),
            Err(BreakerError::Open { .. }) => Err(SvcError::ApiCircuitOpen {
                operation: format!("list {}", descriptor.name),
            }),
            Err(BreakerError::Inner(RetryError::Cancelled { operation })) => {
                Err(SvcError::Cancelled { operation })
            }
            Err(BreakerError::Inner(RetryError::Exhausted { source, .. })) => Err(source),
        }
    }

    /// Skip, normalize, validate and upload one object.
    async fn process_object(
        &self,
        namespace: Option<&str>,
        descriptor: &ResourceDescriptor,
        object: DynamicObject,
    ) -> Result<Processed, SvcError> {
        let Some(name) = object.metadata.name.clone().filter(|n| !n.is_empty()) else {
            return Ok(Processed::Skipped);
        };

        let mut value = serde_json::to_value(&object).map_err(|error| SvcError::InvalidResource {
            name: name.clone(),
            reason: error.to_string(),
        })?;

        if self.normalizer.should_skip(&value) {
            debug!(resource = %descriptor.name, %name, "filtered out");
            return Ok(Processed::Skipped);
        }

        self.normalizer.normalize(&mut value);
        let bytes = match self.normalizer.serialize(&value, &name) {
            Ok(bytes) => bytes,
            Err(error) if self.config.rules.skip_invalid_resources => {
                warn!(resource = %descriptor.name, %name, %error, "invalid resource skipped");
                return Ok(Processed::Invalid);
            }
            Err(error) => return Err(error),
        };

        let key = layout::object_key(
            &self.config.cluster_domain,
            &self.config.cluster_name,
            namespace,
            &descriptor.name,
            &name,
        );
        self.store
            .put(&key, bytes, &self.store_retry, self.cancel)
            .await
            .map_err(SvcError::from)?;
        self.metrics.resources_total.inc();
        Ok(Processed::Uploaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::PriorityConfig;

    fn descriptor(name: &str, group: &str) -> ResourceDescriptor {
        ResourceDescriptor {
            group: group.to_string(),
            version: "v1".to_string(),
            name: name.to_string(),
            kind: name.to_string(),
            namespaced: true,
            verbs: vec!["list".to_string()],
        }
    }

    #[test]
    fn descriptors_order_by_ascending_priority() {
        let mut config = PriorityConfig::default();
        config.core.insert("configmaps".to_string(), 5);
        config.rbac.insert("roles".to_string(), 15);
        config.workload.insert("deployments".to_string(), 30);
        let priorities = PriorityManager::new(config);

        let unordered = vec![
            descriptor("deployments", "apps"),
            descriptor("widgets", "example.io"),
            descriptor("configmaps", ""),
            descriptor("roles", "rbac.authorization.k8s.io"),
        ];
        let ordered = order_descriptors(&priorities, "app", &unordered);
        let names: Vec<_> = ordered.iter().map(|d| d.name.as_str()).collect();
        // Unknown kinds sink to the default priority of 80.
        assert_eq!(names, vec!["configmaps", "roles", "deployments", "widgets"]);
    }

    #[test]
    fn ordering_is_stable_for_equal_priorities() {
        let priorities = PriorityManager::new(PriorityConfig::default());
        let unordered = vec![
            descriptor("b-kind", ""),
            descriptor("a-kind", ""),
        ];
        let ordered = order_descriptors(&priorities, "app", &unordered);
        let names: Vec<_> = ordered.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["b-kind", "a-kind"]);
    }

    #[test]
    fn target_report_aggregates_and_classifies() {
        let report = TargetReport {
            target: "app".to_string(),
            outcomes: vec![
                KindOutcome {
                    resource: "configmaps".to_string(),
                    counters: Counters {
                        backed_up: 3,
                        skipped: 1,
                        invalid: 0,
                        total: 4,
                    },
                    error: None,
                },
                KindOutcome {
                    resource: "secrets".to_string(),
                    counters: Counters {
                        backed_up: 1,
                        skipped: 0,
                        invalid: 1,
                        total: 3,
                    },
                    error: Some("upload failed".to_string()),
                },
            ],
        };
        assert!(report.failed());
        assert_eq!(report.error_count(), 1);
        let counters = report.counters();
        assert_eq!(counters.backed_up, 4);
        assert_eq!(counters.skipped, 1);
        assert_eq!(counters.invalid, 1);
        assert_eq!(counters.total, 7);
    }
}
