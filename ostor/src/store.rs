use crate::error::StoreError;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    primitives::ByteStream,
    Client,
};
use resilience::{BreakerError, CircuitBreaker, RetryError, RetryExecutor};
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Content type of every uploaded backup document.
pub const CONTENT_TYPE_YAML: &str = "application/x-yaml";

/// Deadline for the MaxKeys=1 access probe during ensure-bucket.
const BUCKET_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for a single object deletion.
const DELETE_TIMEOUT: Duration = Duration::from_secs(30);

/// Object store connection settings, immutable for the run.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Host or host:port of the S3-compatible endpoint, scheme optional.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub use_ssl: bool,
    /// Primary bucket.
    pub bucket: String,
    pub auto_create_bucket: bool,
    /// Tried in order when the primary cannot be used.
    pub fallback_buckets: Vec<String>,
    pub bucket_retry_attempts: u32,
    pub bucket_retry_delay: Duration,
}

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    /// Seconds since the epoch, 0 when the store omits the timestamp.
    pub last_modified_epoch: i64,
    pub size: i64,
}

/// One page of a prefix listing.
#[derive(Debug, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectMeta>,
    pub continuation: Option<String>,
}

/// Gateway to the S3-compatible store. Every remote call runs through the
/// store circuit breaker; the active bucket is decided once by
/// [`ObjectStore::ensure_bucket`] and read-only afterwards.
pub struct ObjectStore {
    client: Client,
    breaker: Arc<CircuitBreaker>,
    config: StoreConfig,
    active_bucket: OnceLock<String>,
}

impl ObjectStore {
    /// Build the gateway. The endpoint scheme follows `use_ssl` unless the
    /// configured endpoint already carries one.
    pub fn new(config: StoreConfig, breaker: Arc<CircuitBreaker>) -> Result<Self, StoreError> {
        if config.endpoint.is_empty() {
            return Err(StoreError::Endpoint {
                endpoint: config.endpoint.clone(),
            });
        }
        let endpoint_url = if config.endpoint.contains("://") {
            config.endpoint.clone()
        } else if config.use_ssl {
            format!("https://{}", config.endpoint)
        } else {
            format!("http://{}", config.endpoint)
        };

        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "cluster-backup",
        );
        // MinIO ignores the region but the SDK requires one; path-style
        // addressing keeps bucket names out of the host.
        let sdk_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(endpoint_url)
            .region(Region::new("us-east-1"))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(sdk_config),
            breaker,
            config,
            active_bucket: OnceLock::new(),
        })
    }

    /// The bucket all uploads and listings target. Falls back to the
    /// primary before [`ObjectStore::ensure_bucket`] has run.
    pub fn active_bucket(&self) -> &str {
        self.active_bucket
            .get()
            .map(String::as_str)
            .unwrap_or(&self.config.bucket)
    }

    /// Find or create a usable bucket: the primary first, then each
    /// fallback, creating on the way when auto-create is enabled. The
    /// survivor becomes the active bucket for the rest of the run.
    pub async fn ensure_bucket(&self) -> Result<&str, StoreError> {
        let mut candidates = vec![self.config.bucket.clone()];
        candidates.extend(self.config.fallback_buckets.iter().cloned());

        for bucket in &candidates {
            if self.bucket_usable(bucket).await {
                let _ = self.active_bucket.set(bucket.clone());
                info!(%bucket, "object store bucket ready");
                return Ok(self.active_bucket());
            }
            if self.config.auto_create_bucket && self.create_bucket_with_retry(bucket).await {
                let _ = self.active_bucket.set(bucket.clone());
                info!(%bucket, "object store bucket created");
                return Ok(self.active_bucket());
            }
            warn!(%bucket, "bucket is not usable, trying next candidate");
        }

        Err(StoreError::NoUsableBucket {
            primary: self.config.bucket.clone(),
            fallbacks: self.config.fallback_buckets.clone(),
        })
    }

    /// Exists-check plus a MaxKeys=1 access probe, both within the probe
    /// deadline.
    async fn bucket_usable(&self, bucket: &str) -> bool {
        let probe = self.breaker.call(|| async {
            tokio::time::timeout(BUCKET_PROBE_TIMEOUT, async {
                self.client
                    .head_bucket()
                    .bucket(bucket)
                    .send()
                    .await
                    .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
                self.client
                    .list_objects_v2()
                    .bucket(bucket)
                    .max_keys(1)
                    .send()
                    .await
                    .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
                Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
            })
            .await
            .map_err(|_| {
                Box::new(StoreError::Timeout {
                    operation: "bucket-probe".to_string(),
                    seconds: BUCKET_PROBE_TIMEOUT.as_secs(),
                }) as Box<dyn std::error::Error + Send + Sync>
            })?
        });
        match probe.await {
            Ok(()) => true,
            Err(error) => {
                debug!(%bucket, %error, "bucket probe failed");
                false
            }
        }
    }

    /// Creation attempts spaced by the configured bucket retry delay.
    async fn create_bucket_with_retry(&self, bucket: &str) -> bool {
        for attempt in 1 ..= self.config.bucket_retry_attempts.max(1) {
            let created = self
                .breaker
                .call(|| async {
                    self.client
                        .create_bucket()
                        .bucket(bucket)
                        .send()
                        .await
                        .map(|_| ())
                })
                .await;
            match created {
                Ok(()) => {
                    if self.bucket_usable(bucket).await {
                        return true;
                    }
                }
                Err(error) => {
                    warn!(%bucket, attempt, %error, "bucket creation failed");
                }
            }
            if attempt < self.config.bucket_retry_attempts.max(1) {
                tokio::time::sleep(self.config.bucket_retry_delay).await;
            }
        }
        false
    }

    /// Upload one document. The whole retried sequence counts as a single
    /// breaker outcome.
    pub async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        retry: &RetryExecutor,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let bucket = self.active_bucket();
        let result = self
            .breaker
            .call(|| {
                retry.execute("store-put", cancel, || {
                    let body = body.clone();
                    async move {
                        self.client
                            .put_object()
                            .bucket(bucket)
                            .key(key)
                            .content_type(CONTENT_TYPE_YAML)
                            .body(ByteStream::from(body))
                            .send()
                            .await
                            .map(|_| ())
                            .map_err(|source| StoreError::Put {
                                key: key.to_string(),
                                source: Box::new(source),
                            })
                    }
                })
            })
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(BreakerError::Open { .. }) => Err(StoreError::CircuitOpen {
                operation: "put".to_string(),
            }),
            Err(BreakerError::Inner(RetryError::Cancelled { operation })) => {
                Err(StoreError::Cancelled { operation })
            }
            Err(BreakerError::Inner(RetryError::Exhausted { source, .. })) => Err(source),
        }
    }

    /// One page of keys under `prefix`, oldest continuation semantics as
    /// returned by the store.
    pub async fn list_page(
        &self,
        prefix: &str,
        page_size: i32,
        continuation: Option<String>,
    ) -> Result<ListPage, StoreError> {
        let bucket = self.active_bucket();
        let output = self
            .breaker
            .call(|| async {
                self.client
                    .list_objects_v2()
                    .bucket(bucket)
                    .prefix(prefix)
                    .max_keys(page_size)
                    .set_continuation_token(continuation.clone())
                    .send()
                    .await
                    .map_err(|source| StoreError::List {
                        prefix: prefix.to_string(),
                        source: Box::new(source),
                    })
            })
            .await
            .map_err(|e| match e {
                BreakerError::Open { .. } => StoreError::CircuitOpen {
                    operation: "list".to_string(),
                },
                BreakerError::Inner(inner) => inner,
            })?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectMeta {
                    key: object.key()?.to_string(),
                    last_modified_epoch: object.last_modified().map(|t| t.secs()).unwrap_or(0),
                    size: object.size().unwrap_or(0),
                })
            })
            .collect();
        let continuation = output
            .is_truncated()
            .unwrap_or(false)
            .then(|| output.next_continuation_token().map(str::to_string))
            .flatten();

        Ok(ListPage {
            objects,
            continuation,
        })
    }

    /// Delete one object within the per-delete deadline.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let bucket = self.active_bucket();
        self.breaker
            .call(|| async {
                tokio::time::timeout(DELETE_TIMEOUT, async {
                    self.client
                        .delete_object()
                        .bucket(bucket)
                        .key(key)
                        .send()
                        .await
                        .map(|_| ())
                        .map_err(|source| StoreError::Delete {
                            key: key.to_string(),
                            source: Box::new(source),
                        })
                })
                .await
                .map_err(|_| StoreError::Timeout {
                    operation: format!("delete '{key}'"),
                    seconds: DELETE_TIMEOUT.as_secs(),
                })?
            })
            .await
            .map_err(|e| match e {
                BreakerError::Open { .. } => StoreError::CircuitOpen {
                    operation: "delete".to_string(),
                },
                BreakerError::Inner(inner) => inner,
            })
    }
}
