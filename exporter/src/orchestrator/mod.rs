//! Wires discovery, priorities, extraction and cleanup into one backup
//! run and reports the aggregate outcome.

use crate::{
    cleanup::{CleanupEngine, CleanupReport},
    config::{OpenShiftMode, RunConfig},
    discovery::{DiscoveryCache, OpenShiftDetector},
    error::SvcError,
    extract::{Counters, Extractor, TargetReport},
    metrics::Metrics,
    normalize::Normalizer,
    priority::PriorityManager,
};
use kube::Client;
use ostor::ObjectStore;
use resilience::CircuitBreaker;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Global deadline bounding the whole run.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(1800);

/// End-of-run classification over the per-target outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum RunStatus {
    #[strum(serialize = "SUCCESS")]
    Success,
    #[strum(serialize = "PARTIAL SUCCESS")]
    PartialSuccess,
    #[strum(serialize = "FAILED")]
    Failed,
}

/// SUCCESS when nothing failed, FAILED when everything did, PARTIAL
/// SUCCESS in between.
pub fn classify(failed: usize, total: usize) -> RunStatus {
    if failed == 0 {
        RunStatus::Success
    } else if failed < total {
        RunStatus::PartialSuccess
    } else {
        RunStatus::Failed
    }
}

/// Aggregate outcome of one run.
#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub targets: Vec<TargetReport>,
    pub cleanup: Option<CleanupReport>,
    pub duration: Duration,
}

pub struct Orchestrator {
    config: Arc<RunConfig>,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(config: Arc<RunConfig>, metrics: Arc<Metrics>) -> Self {
        Self { config, metrics }
    }

    /// Execute the backup under the global deadline. Expiry unwinds
    /// every pending list, upload, delete and retry sleep.
    pub async fn run(&self) -> Result<RunReport, SvcError> {
        let cancel = CancellationToken::new();
        match tokio::time::timeout(RUN_TIMEOUT, self.run_inner(&cancel)).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(SvcError::RunTimeout)
            }
        }
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> Result<RunReport, SvcError> {
        let started = Instant::now();
        let config = &self.config;
        let client = Client::try_default().await?;

        let api_breaker = CircuitBreaker::new("kubernetes-api", 3, Duration::from_secs(15));
        let store_breaker = Arc::new(CircuitBreaker::new(
            "object-store",
            5,
            Duration::from_secs(30),
        ));
        let store = ObjectStore::new(config.store.clone(), store_breaker)?;
        let cleanup_engine = CleanupEngine::new(&store, config);

        let mut cleanup_report = None;
        if config.cleanup.enabled && config.cleanup.on_startup {
            cleanup_report = Some(cleanup_engine.perform_cleanup().await);
        }

        let openshift = match config.openshift_mode {
            OpenShiftMode::Enabled => true,
            OpenShiftMode::Disabled => false,
            OpenShiftMode::AutoDetect => OpenShiftDetector::new(client.clone()).detect().await,
        };
        let include_openshift = openshift && config.include_openshift_resources;
        info!(openshift, include_openshift, "openshift mode resolved");

        let bucket = store.ensure_bucket().await?;
        info!(bucket, "object store ready");

        let priorities = PriorityManager::from_configmap(
            &client,
            &config.pod_namespace,
            &config.priority_config_map,
        )
        .await;

        let discovery =
            DiscoveryCache::new(client.clone(), config.rules.include_resources.clone());
        let discovered = match discovery.list_resources().await {
            Ok(descriptors) => descriptors,
            Err(source) => {
                // Nothing to back up, but the run still completes and
                // cleanup still applies.
                error!(error = %source, "discovery failed entirely, continuing with no resources");
                Vec::new()
            }
        };
        let (cluster_scoped, namespaced): (Vec<_>, Vec<_>) = discovered
            .into_iter()
            .filter(|d| !priorities.is_excluded(&d.name, &d.group_version()))
            .filter(|d| include_openshift || !d.is_openshift())
            .partition(|d| !d.namespaced);
        info!(
            namespaced = namespaced.len(),
            cluster_scoped = cluster_scoped.len(),
            "resources discovered"
        );

        let namespaces = &config.rules.include_namespaces;
        if namespaces.is_empty() {
            return Err(SvcError::EmptyWhitelist);
        }

        let normalizer = Normalizer::new(config.rules.clone());
        let extractor = Extractor::new(
            client.clone(),
            &store,
            &api_breaker,
            &priorities,
            &normalizer,
            config,
            cancel,
            &self.metrics,
        );

        let mut targets = Vec::with_capacity(namespaces.len() + 1);
        if !cluster_scoped.is_empty() {
            targets.push(extractor.backup_target(None, &cluster_scoped).await);
        }
        for namespace in namespaces {
            targets.push(extractor.backup_target(Some(namespace), &namespaced).await);
        }

        if config.cleanup.enabled && !config.cleanup.on_startup {
            cleanup_report = Some(cleanup_engine.perform_cleanup().await);
        }

        let failed = targets.iter().filter(|t| t.failed()).count();
        let status = classify(failed, targets.len());
        let duration = started.elapsed();

        self.metrics.duration_seconds.observe(duration.as_secs_f64());
        self.metrics.namespaces_total.set(namespaces.len() as i64);
        self.metrics
            .last_success_timestamp
            .set(chrono::Utc::now().timestamp() as f64);

        let totals = targets.iter().fold(Counters::default(), |mut acc, t| {
            acc.add(&t.counters());
            acc
        });
        info!(
            operation = "backup_status_summary",
            cluster = %config.cluster_name,
            status = %status,
            targets = targets.len() as u64,
            failed_targets = failed as u64,
            backed_up = totals.backed_up,
            skipped = totals.skipped,
            invalid = totals.invalid,
            total = totals.total,
            duration_ms = duration.as_millis() as u64,
            "backup run complete"
        );

        Ok(RunReport {
            status,
            targets,
            cleanup: cleanup_report,
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_over_failed_targets() {
        assert_eq!(classify(0, 3), RunStatus::Success);
        assert_eq!(classify(1, 3), RunStatus::PartialSuccess);
        assert_eq!(classify(2, 3), RunStatus::PartialSuccess);
        assert_eq!(classify(3, 3), RunStatus::Failed);
        // Zero targets still counts as a (vacuous) success.
        assert_eq!(classify(0, 0), RunStatus::Success);
    }

    #[test]
    fn status_renders_for_the_summary_record() {
        assert_eq!(RunStatus::Success.to_string(), "SUCCESS");
        assert_eq!(RunStatus::PartialSuccess.to_string(), "PARTIAL SUCCESS");
        assert_eq!(RunStatus::Failed.to_string(), "FAILED");
    }
}
