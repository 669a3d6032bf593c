//! Deterministic object key layout for the backup store.
//!
//! Every document lands at
//! `domain/cluster/namespace/plural/name.yaml`, with cluster-scoped
//! objects stored under the synthetic namespace `cluster-global`. The
//! same coordinates always produce the same key, so a re-run overwrites
//! rather than duplicates.

/// Namespace segment used for cluster-scoped objects.
pub const CLUSTER_GLOBAL: &str = "cluster-global";

/// Strip path traversal and escape characters from one key segment.
/// Interior `/` survives so dotted or grouped resource plurals keep
/// their shape; leading and trailing `/` are trimmed.
pub fn sanitize_segment(segment: &str) -> String {
    segment
        .replace("..", "")
        .replace('\\', "")
        .trim_matches('/')
        .to_string()
}

/// Storage key of one backed-up object.
pub fn object_key(
    domain: &str,
    cluster: &str,
    namespace: Option<&str>,
    plural: &str,
    name: &str,
) -> String {
    format!(
        "{}/{}/{}/{}/{}.yaml",
        sanitize_segment(domain),
        sanitize_segment(cluster),
        sanitize_segment(namespace.unwrap_or(CLUSTER_GLOBAL)),
        sanitize_segment(plural),
        sanitize_segment(name),
    )
}

/// Listing prefix that scopes cleanup to this cluster's documents.
/// The trailing slash keeps a sibling cluster whose name starts with
/// this one out of the match.
pub fn cluster_prefix(domain: &str, cluster: &str) -> String {
    format!(
        "{}/{}/",
        sanitize_segment(domain),
        sanitize_segment(cluster)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic() {
        let a = object_key("cluster.local", "demo", Some("app"), "configmaps", "cm1");
        let b = object_key("cluster.local", "demo", Some("app"), "configmaps", "cm1");
        assert_eq!(a, b);
        assert_eq!(a, "cluster.local/demo/app/configmaps/cm1.yaml");
    }

    #[test]
    fn cluster_scoped_objects_use_the_synthetic_namespace() {
        assert_eq!(
            object_key("cluster.local", "demo", None, "clusterroles", "r1"),
            "cluster.local/demo/cluster-global/clusterroles/r1.yaml"
        );
    }

    #[test]
    fn sanitize_strips_traversal_and_escapes() {
        assert_eq!(sanitize_segment("../etc/passwd"), "etc/passwd");
        assert_eq!(sanitize_segment("a..b"), "ab");
        assert_eq!(sanitize_segment("win\\path"), "winpath");
        assert_eq!(sanitize_segment("/padded/"), "padded");
        // Interior slashes survive for dotted plurals.
        assert_eq!(sanitize_segment("a/b"), "a/b");
    }

    #[test]
    fn prefix_covers_only_this_cluster() {
        let prefix = cluster_prefix("cluster.local", "demo");
        assert_eq!(prefix, "cluster.local/demo/");
        // Every key of this cluster matches, a sibling cluster sharing
        // the name as a prefix does not.
        let own = object_key("cluster.local", "demo", Some("app"), "configmaps", "cm1");
        assert!(own.starts_with(&prefix));
        let sibling = object_key(
            "cluster.local",
            "demo-staging",
            Some("app"),
            "configmaps",
            "cm1",
        );
        assert!(!sibling.starts_with(&prefix));
    }
}
