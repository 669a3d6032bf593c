//! Run configuration: one pure mapping from the environment/CLI surface
//! to an immutable, validated [`RunConfig`].

mod rules;

pub use rules::{parse_annotation_selector, parse_name_list, parse_size_literal, InclusionRules};

use crate::error::SvcError;
use clap::{ArgAction, Parser};
use ostor::StoreConfig;
use std::time::Duration;
use tracing::warn;

/// How the run decides whether OpenShift resource groups are in play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OpenShiftMode {
    Enabled,
    Disabled,
    AutoDetect,
}

/// Retention-driven cleanup settings.
#[derive(Debug, Clone)]
pub struct CleanupPolicy {
    pub enabled: bool,
    /// Run cleanup before extraction instead of after.
    pub on_startup: bool,
    pub retention_days: u32,
}

/// Immutable per-run configuration, produced once at startup.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub cluster_name: String,
    pub cluster_domain: String,
    pub store: StoreConfig,
    /// List page size, also the cleanup batch size (1..=1000).
    pub batch_size: u32,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub cleanup: CleanupPolicy,
    pub rules: InclusionRules,
    pub openshift_mode: OpenShiftMode,
    pub include_openshift_resources: bool,
    pub log_level: String,
    pub metrics_port: u16,
    pub priority_config_map: String,
    pub pod_namespace: String,
}

/// Booleans on the env surface are the literal string `true`; anything
/// else reads as false.
fn truthy(raw: &str) -> Result<bool, String> {
    Ok(raw == "true")
}

/// Command line and environment surface of the exporter. Every setting
/// is reachable both as a flag and as its environment variable.
#[derive(Parser, Debug)]
#[command(name = "cluster-backup", version, about = "Cluster state exporter")]
pub struct CliArgs {
    /// Print OK and exit; wired as the container health probe.
    #[arg(long = "health-check", default_value_t = false)]
    pub health_check: bool,

    #[arg(long, env = "CLUSTER_NAME", default_value = "cluster")]
    pub cluster_name: String,

    #[arg(long, env = "CLUSTER_DOMAIN", default_value = "cluster.local")]
    pub cluster_domain: String,

    /// Host or host:port of the S3-compatible endpoint. Required.
    #[arg(long, env = "MINIO_ENDPOINT")]
    pub minio_endpoint: Option<String>,

    #[arg(long, env = "MINIO_ACCESS_KEY", default_value = "")]
    pub minio_access_key: String,

    #[arg(long, env = "MINIO_SECRET_KEY", default_value = "", hide_env_values = true)]
    pub minio_secret_key: String,

    #[arg(long, env = "MINIO_BUCKET", default_value = "cluster-backups")]
    pub minio_bucket: String,

    #[arg(long, env = "MINIO_USE_SSL", value_parser = truthy, action = ArgAction::Set, default_value = "false")]
    pub minio_use_ssl: bool,

    #[arg(long, env = "BATCH_SIZE", default_value_t = 50)]
    pub batch_size: u32,

    #[arg(long, env = "RETRY_ATTEMPTS", default_value_t = 3)]
    pub retry_attempts: u32,

    #[arg(long, env = "RETRY_DELAY", value_parser = humantime::parse_duration, default_value = "2s")]
    pub retry_delay: Duration,

    #[arg(long, env = "ENABLE_CLEANUP", value_parser = truthy, action = ArgAction::Set, default_value = "true")]
    pub enable_cleanup: bool,

    #[arg(long, env = "RETENTION_DAYS", default_value_t = 7)]
    pub retention_days: u32,

    #[arg(long, env = "CLEANUP_ON_STARTUP", value_parser = truthy, action = ArgAction::Set, default_value = "false")]
    pub cleanup_on_startup: bool,

    #[arg(long, env = "AUTO_CREATE_BUCKET", value_parser = truthy, action = ArgAction::Set, default_value = "false")]
    pub auto_create_bucket: bool,

    /// Comma separated list of buckets tried when the primary fails.
    #[arg(long, env = "FALLBACK_BUCKETS", default_value = "")]
    pub fallback_buckets: String,

    #[arg(long, env = "BUCKET_RETRY_ATTEMPTS", default_value_t = 3)]
    pub bucket_retry_attempts: u32,

    #[arg(long, env = "BUCKET_RETRY_DELAY", value_parser = humantime::parse_duration, default_value = "5s")]
    pub bucket_retry_delay: Duration,

    /// Newline or comma separated resource plurals; `#` comments allowed.
    #[arg(long, env = "INCLUDE_RESOURCES", default_value = "")]
    pub include_resources: String,

    /// Newline or comma separated namespace whitelist.
    #[arg(long, env = "INCLUDE_NAMESPACES", default_value = "")]
    pub include_namespaces: String,

    #[arg(long, env = "LABEL_SELECTOR")]
    pub label_selector: Option<String>,

    /// Single `key=value` annotation gate.
    #[arg(long, env = "ANNOTATION_SELECTOR")]
    pub annotation_selector: Option<String>,

    /// Size literal such as `512Ki` or `10M`; unset disables the gate.
    #[arg(long, env = "MAX_RESOURCE_SIZE")]
    pub max_resource_size: Option<String>,

    #[arg(long, env = "FOLLOW_OWNER_REFERENCES", value_parser = truthy, action = ArgAction::Set, default_value = "false")]
    pub follow_owner_references: bool,

    #[arg(long, env = "INCLUDE_MANAGED_FIELDS", value_parser = truthy, action = ArgAction::Set, default_value = "false")]
    pub include_managed_fields: bool,

    #[arg(long, env = "INCLUDE_STATUS", value_parser = truthy, action = ArgAction::Set, default_value = "false")]
    pub include_status: bool,

    #[arg(long, env = "OPENSHIFT_MODE", value_enum, default_value = "auto-detect")]
    pub openshift_mode: OpenShiftMode,

    #[arg(long, env = "INCLUDE_OPENSHIFT_RESOURCES", value_parser = truthy, action = ArgAction::Set, default_value = "true")]
    pub include_openshift_resources: bool,

    #[arg(long, env = "VALIDATE_YAML", value_parser = truthy, action = ArgAction::Set, default_value = "true")]
    pub validate_yaml: bool,

    #[arg(long, env = "SKIP_INVALID_RESOURCES", value_parser = truthy, action = ArgAction::Set, default_value = "false")]
    pub skip_invalid_resources: bool,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    /// ConfigMap holding the priority configuration.
    #[arg(long, env = "PRIORITY_CONFIG_MAP", default_value = "backup-priority-config")]
    pub priority_config_map: String,

    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    pub pod_namespace: String,
}

const SHELL_METACHARACTERS: &[char] = &[
    ';', '|', '&', '$', '`', '<', '>', '(', ')', '{', '}', '\'', '"', '\n', '\t', ' ',
];

fn checked_name(field: &str, value: &str) -> Result<String, SvcError> {
    if value.contains(SHELL_METACHARACTERS) {
        return Err(SvcError::InvalidConfig {
            reason: format!("{field} '{value}' contains forbidden characters"),
        });
    }
    Ok(value.to_string())
}

fn checked_range<T: PartialOrd + std::fmt::Display>(
    field: &str,
    value: T,
    min: T,
    max: T,
) -> Result<T, SvcError> {
    if value < min || value > max {
        return Err(SvcError::InvalidConfig {
            reason: format!("{field} must be within {min}..={max}, got {value}"),
        });
    }
    Ok(value)
}

fn checked_duration(
    field: &str,
    value: Duration,
    min: Duration,
    max: Duration,
) -> Result<Duration, SvcError> {
    if value < min || value > max {
        return Err(SvcError::InvalidConfig {
            reason: format!(
                "{field} must be within {}..={}, got {}",
                humantime::format_duration(min),
                humantime::format_duration(max),
                humantime::format_duration(value)
            ),
        });
    }
    Ok(value)
}

impl CliArgs {
    /// Validate the raw surface into the immutable [`RunConfig`].
    pub fn into_config(self) -> Result<RunConfig, SvcError> {
        let endpoint = match self.minio_endpoint.as_deref() {
            Some(endpoint) if !endpoint.is_empty() => endpoint.to_string(),
            _ => {
                return Err(SvcError::InvalidConfig {
                    reason: "MINIO_ENDPOINT is required".to_string(),
                })
            }
        };

        let cluster_name = checked_name("CLUSTER_NAME", &self.cluster_name)?;
        let cluster_domain = checked_name("CLUSTER_DOMAIN", &self.cluster_domain)?;
        let bucket = checked_name("MINIO_BUCKET", &self.minio_bucket)?;
        let fallback_buckets = parse_name_list(&self.fallback_buckets)
            .into_iter()
            .map(|b| checked_name("FALLBACK_BUCKETS", &b))
            .collect::<Result<Vec<_>, _>>()?;

        let include_namespaces = parse_name_list(&self.include_namespaces);
        if include_namespaces.is_empty() {
            return Err(SvcError::EmptyWhitelist);
        }
        let include_resources = parse_name_list(&self.include_resources);
        if include_resources.is_empty() {
            return Err(SvcError::InvalidConfig {
                reason: "INCLUDE_RESOURCES must name at least one resource".to_string(),
            });
        }

        let annotation_selector = self
            .annotation_selector
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .map(parse_annotation_selector)
            .transpose()?;
        let max_resource_size = self
            .max_resource_size
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .map(parse_size_literal)
            .transpose()?;

        let rules = InclusionRules {
            include_resources,
            include_namespaces,
            label_selector: self.label_selector.filter(|s| !s.is_empty()),
            annotation_selector,
            max_resource_size,
            follow_owner_references: self.follow_owner_references,
            include_managed_fields: self.include_managed_fields,
            include_status: self.include_status,
            validate_yaml: self.validate_yaml,
            skip_invalid_resources: self.skip_invalid_resources,
        };

        Ok(RunConfig {
            cluster_name,
            cluster_domain,
            store: StoreConfig {
                endpoint,
                access_key: self.minio_access_key,
                secret_key: self.minio_secret_key,
                use_ssl: self.minio_use_ssl,
                bucket,
                auto_create_bucket: self.auto_create_bucket,
                fallback_buckets,
                bucket_retry_attempts: checked_range(
                    "BUCKET_RETRY_ATTEMPTS",
                    self.bucket_retry_attempts,
                    1,
                    10,
                )?,
                bucket_retry_delay: checked_duration(
                    "BUCKET_RETRY_DELAY",
                    self.bucket_retry_delay,
                    Duration::from_secs(1),
                    Duration::from_secs(30),
                )?,
            },
            batch_size: checked_range("BATCH_SIZE", self.batch_size, 1, 1000)?,
            retry_attempts: checked_range("RETRY_ATTEMPTS", self.retry_attempts, 0, 10)?,
            retry_delay: checked_duration(
                "RETRY_DELAY",
                self.retry_delay,
                Duration::from_secs(1),
                Duration::from_secs(300),
            )?,
            cleanup: CleanupPolicy {
                enabled: self.enable_cleanup,
                on_startup: self.cleanup_on_startup,
                retention_days: checked_range("RETENTION_DAYS", self.retention_days, 1, 365)?,
            },
            rules,
            openshift_mode: self.openshift_mode,
            include_openshift_resources: self.include_openshift_resources,
            log_level: self.log_level,
            metrics_port: self.metrics_port,
            priority_config_map: self.priority_config_map,
            pod_namespace: self.pod_namespace,
        })
    }
}

/// Every environment variable the loader understands.
const KNOWN_VARS: &[&str] = &[
    "CLUSTER_NAME",
    "CLUSTER_DOMAIN",
    "MINIO_ENDPOINT",
    "MINIO_ACCESS_KEY",
    "MINIO_SECRET_KEY",
    "MINIO_BUCKET",
    "MINIO_USE_SSL",
    "BATCH_SIZE",
    "RETRY_ATTEMPTS",
    "RETRY_DELAY",
    "ENABLE_CLEANUP",
    "RETENTION_DAYS",
    "CLEANUP_ON_STARTUP",
    "AUTO_CREATE_BUCKET",
    "FALLBACK_BUCKETS",
    "BUCKET_RETRY_ATTEMPTS",
    "BUCKET_RETRY_DELAY",
    "INCLUDE_RESOURCES",
    "INCLUDE_NAMESPACES",
    "LABEL_SELECTOR",
    "ANNOTATION_SELECTOR",
    "MAX_RESOURCE_SIZE",
    "FOLLOW_OWNER_REFERENCES",
    "INCLUDE_MANAGED_FIELDS",
    "INCLUDE_STATUS",
    "OPENSHIFT_MODE",
    "INCLUDE_OPENSHIFT_RESOURCES",
    "VALIDATE_YAML",
    "SKIP_INVALID_RESOURCES",
    "LOG_LEVEL",
    "METRICS_PORT",
    "PRIORITY_CONFIG_MAP",
    "POD_NAMESPACE",
];

/// Prefix families owned by the exporter; anything else in the
/// environment is none of our business.
const OWNED_PREFIXES: &[&str] = &[
    "CLUSTER_",
    "MINIO_",
    "BATCH_",
    "BUCKET_",
    "INCLUDE_",
    "RETRY_",
    "RETENTION_",
    "CLEANUP_",
    "AUTO_",
    "FALLBACK_",
    "LABEL_",
    "ANNOTATION_",
    "MAX_",
    "FOLLOW_",
    "OPENSHIFT_",
    "VALIDATE_",
    "SKIP_",
    "LOG_",
    "METRICS_",
    "PRIORITY_",
    "POD_",
];

/// Warn about variables that look like exporter configuration but are
/// not recognized; values are never logged.
pub fn warn_unknown_vars() {
    for (name, _) in std::env::vars() {
        let owned = OWNED_PREFIXES.iter().any(|prefix| name.starts_with(prefix));
        if owned && !KNOWN_VARS.contains(&name.as_str()) {
            warn!(variable = %name, "unknown configuration variable ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec![
            "cluster-backup",
            "--minio-endpoint",
            "minio:9000",
            "--include-namespaces",
            "app",
            "--include-resources",
            "configmaps",
        ]
    }

    #[test]
    fn minimal_surface_validates() {
        let args = CliArgs::try_parse_from(base_args()).expect("valid args");
        let config = args.into_config().expect("valid config");
        assert_eq!(config.store.endpoint, "minio:9000");
        assert_eq!(config.rules.include_namespaces, vec!["app"]);
        assert_eq!(config.batch_size, 50);
        assert!(config.cleanup.enabled);
    }

    #[test]
    fn endpoint_is_required() {
        let args = CliArgs::try_parse_from([
            "cluster-backup",
            "--include-namespaces",
            "app",
            "--include-resources",
            "configmaps",
        ])
        .expect("parses");
        assert!(matches!(
            args.into_config(),
            Err(SvcError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn empty_namespace_whitelist_is_fatal() {
        let args = CliArgs::try_parse_from([
            "cluster-backup",
            "--minio-endpoint",
            "minio:9000",
            "--include-resources",
            "configmaps",
        ])
        .expect("parses");
        assert!(matches!(args.into_config(), Err(SvcError::EmptyWhitelist)));
    }

    #[test]
    fn booleans_accept_only_the_literal_true() {
        let mut args = base_args();
        args.extend(["--minio-use-ssl", "True"]);
        let config = CliArgs::try_parse_from(args)
            .expect("parses")
            .into_config()
            .expect("valid");
        assert!(!config.store.use_ssl);

        let mut args = base_args();
        args.extend(["--minio-use-ssl", "true"]);
        let config = CliArgs::try_parse_from(args)
            .expect("parses")
            .into_config()
            .expect("valid");
        assert!(config.store.use_ssl);
    }

    #[test]
    fn numeric_bounds_are_enforced() {
        let mut args = base_args();
        args.extend(["--batch-size", "0"]);
        assert!(CliArgs::try_parse_from(args)
            .expect("parses")
            .into_config()
            .is_err());

        let mut args = base_args();
        args.extend(["--retry-attempts", "11"]);
        assert!(CliArgs::try_parse_from(args)
            .expect("parses")
            .into_config()
            .is_err());

        let mut args = base_args();
        args.extend(["--retention-days", "366"]);
        assert!(CliArgs::try_parse_from(args)
            .expect("parses")
            .into_config()
            .is_err());
    }

    #[test]
    fn shell_metacharacters_are_rejected() {
        let mut args = base_args();
        args.extend(["--cluster-name", "demo;rm"]);
        assert!(CliArgs::try_parse_from(args)
            .expect("parses")
            .into_config()
            .is_err());
    }

    #[test]
    fn malformed_annotation_selector_is_fatal() {
        let mut args = base_args();
        args.extend(["--annotation-selector", "not-a-pair"]);
        assert!(CliArgs::try_parse_from(args)
            .expect("parses")
            .into_config()
            .is_err());
    }

    #[test]
    fn fallback_buckets_split_on_commas() {
        let mut args = base_args();
        args.extend(["--fallback-buckets", "b2,b3"]);
        let config = CliArgs::try_parse_from(args)
            .expect("parses")
            .into_config()
            .expect("valid");
        assert_eq!(config.store.fallback_buckets, vec!["b2", "b3"]);
    }
}
