//! Shape of the produced backup documents, as a downstream
//! reconstruction consumer would see them: configuration surface →
//! filtering → normalization → key layout.

use clap::Parser;
use exporter::{config::CliArgs, layout, normalize::Normalizer};
use serde_json::json;

fn demo_config() -> exporter::config::RunConfig {
    CliArgs::try_parse_from([
        "cluster-backup",
        "--minio-endpoint",
        "minio:9000",
        "--cluster-name",
        "demo",
        "--cluster-domain",
        "cluster.local",
        "--minio-bucket",
        "b",
        "--include-namespaces",
        "app",
        "--include-resources",
        "configmaps,clusterroles",
    ])
    .expect("surface parses")
    .into_config()
    .expect("surface validates")
}

#[test]
fn namespaced_document_lands_at_its_deterministic_key() {
    let config = demo_config();
    let normalizer = Normalizer::new(config.rules.clone());

    let mut object = json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": "cm1",
            "namespace": "app",
            "resourceVersion": "42",
            "uid": "X"
        },
        "data": {"k": "v"},
        "status": {"phase": "Active"}
    });

    assert!(!normalizer.should_skip(&object));
    normalizer.normalize(&mut object);
    let body = String::from_utf8(normalizer.serialize(&object, "cm1").expect("serializes"))
        .expect("utf8 yaml");

    assert!(!body.contains("resourceVersion"));
    assert!(!body.contains("uid"));
    assert!(!body.contains("status"));
    assert!(body.contains("name: cm1"));
    assert!(body.contains("kind: ConfigMap"));

    let key = layout::object_key(
        &config.cluster_domain,
        &config.cluster_name,
        Some("app"),
        "configmaps",
        "cm1",
    );
    assert_eq!(key, "cluster.local/demo/app/configmaps/cm1.yaml");
}

#[test]
fn cluster_scoped_document_lands_under_cluster_global() {
    let config = demo_config();
    let key = layout::object_key(
        &config.cluster_domain,
        &config.cluster_name,
        None,
        "clusterroles",
        "r1",
    );
    assert_eq!(key, "cluster.local/demo/cluster-global/clusterroles/r1.yaml");
}

#[test]
fn reupload_overwrites_the_same_key() {
    let config = demo_config();
    let first = layout::object_key(
        &config.cluster_domain,
        &config.cluster_name,
        Some("app"),
        "configmaps",
        "cm1",
    );
    let second = layout::object_key(
        &config.cluster_domain,
        &config.cluster_name,
        Some("app"),
        "configmaps",
        "cm1",
    );
    assert_eq!(first, second);
}
