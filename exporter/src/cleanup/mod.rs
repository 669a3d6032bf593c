//! Retention-driven cleanup: stream the cluster's prefix out of the
//! store page by page, queue keys older than the cutoff, and delete
//! them in bounded-concurrency batches.

use crate::{config::RunConfig, layout};
use futures::{stream, StreamExt};
use ostor::{ObjectMeta, ObjectStore};
use tracing::{info, warn};

/// Upper bound on concurrent deletions within one batch flush.
const MAX_DELETE_CONCURRENCY: usize = 10;

/// What one cleanup pass accomplished. Errors are advisory; cleanup
/// never fails the run.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub deleted: u64,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
}

/// Keys strictly older than the cutoff are eligible.
fn expired(object: &ObjectMeta, cutoff_epoch: i64) -> bool {
    object.last_modified_epoch < cutoff_epoch
}

pub struct CleanupEngine<'a> {
    store: &'a ObjectStore,
    config: &'a RunConfig,
}

impl<'a> CleanupEngine<'a> {
    pub fn new(store: &'a ObjectStore, config: &'a RunConfig) -> Self {
        Self { store, config }
    }

    /// One full retention pass over this cluster's prefix.
    pub async fn perform_cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        if !self.config.cleanup.enabled {
            return report;
        }

        let cutoff_epoch = chrono::Utc::now().timestamp()
            - i64::from(self.config.cleanup.retention_days) * 86_400;
        let prefix =
            layout::cluster_prefix(&self.config.cluster_domain, &self.config.cluster_name);
        let batch_size = self.config.batch_size as usize;

        let mut queue: Vec<ObjectMeta> = Vec::with_capacity(batch_size);
        let mut continuation: Option<String> = None;
        loop {
            let page = match self
                .store
                .list_page(&prefix, self.config.batch_size as i32, continuation.take())
                .await
            {
                Ok(page) => page,
                Err(error) => {
                    warn!(%prefix, %error, "cleanup listing failed, stopping the pass");
                    report.errors.push(error.to_string());
                    break;
                }
            };

            let page_len = page.objects.len();
            for object in page.objects {
                if expired(&object, cutoff_epoch) {
                    queue.push(object);
                }
                if queue.len() >= batch_size {
                    self.flush(&mut queue, &mut report).await;
                }
            }

            continuation = page.continuation;
            if page_len < batch_size || continuation.is_none() {
                break;
            }
        }
        self.flush(&mut queue, &mut report).await;

        info!(
            operation = "cleanup",
            deleted = report.deleted,
            bytes_freed = report.bytes_freed,
            errors = report.errors.len(),
            "cleanup pass finished"
        );
        report
    }

    /// Delete the queued keys with bounded fan-out.
    async fn flush(&self, queue: &mut Vec<ObjectMeta>, report: &mut CleanupReport) {
        if queue.is_empty() {
            return;
        }
        let batch: Vec<ObjectMeta> = queue.drain(..).collect();
        let concurrency = (self.config.batch_size as usize).min(MAX_DELETE_CONCURRENCY);

        let outcomes: Vec<Result<i64, String>> = stream::iter(batch)
            .map(|object| async move {
                self.store
                    .delete(&object.key)
                    .await
                    .map(|()| object.size)
                    .map_err(|error| format!("{}: {error}", object.key))
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Ok(size) => {
                    report.deleted += 1;
                    report.bytes_freed += size.max(0) as u64;
                }
                Err(error) => {
                    warn!(%error, "object deletion failed");
                    report.errors.push(error);
                }
            }
        }
    }
}
