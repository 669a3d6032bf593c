//! Resource normalization: strip volatile server-assigned fields so
//! the uploaded documents are portable and reapplyable, gate on size,
//! and filter objects the run should not touch.

use crate::{config::InclusionRules, error::SvcError};
use serde_json::Value;

/// Metadata fields that never survive normalization.
const VOLATILE_METADATA: &[&str] = &[
    "uid",
    "resourceVersion",
    "generation",
    "creationTimestamp",
    "selfLink",
];

/// Applies the run's normalization and filtering rules to raw objects.
pub struct Normalizer {
    rules: InclusionRules,
}

impl Normalizer {
    pub fn new(rules: InclusionRules) -> Self {
        Self { rules }
    }

    /// Remove volatile fields in place. Idempotent.
    pub fn normalize(&self, object: &mut Value) {
        let Some(map) = object.as_object_mut() else {
            return;
        };
        if !self.rules.include_status {
            map.remove("status");
        }
        if let Some(metadata) = map.get_mut("metadata").and_then(Value::as_object_mut) {
            for field in VOLATILE_METADATA {
                metadata.remove(*field);
            }
            if !self.rules.include_managed_fields {
                metadata.remove("managedFields");
            }
        }
    }

    /// Whether the object is filtered out before normalization: the
    /// annotation gate does not match, or the object is controlled by
    /// an owner and owner-following is off.
    pub fn should_skip(&self, object: &Value) -> bool {
        let metadata = object.get("metadata");

        if let Some((key, value)) = &self.rules.annotation_selector {
            let matched = metadata
                .and_then(|m| m.get("annotations"))
                .and_then(|a| a.get(key))
                .and_then(Value::as_str)
                == Some(value.as_str());
            if !matched {
                return true;
            }
        }

        if !self.rules.follow_owner_references {
            let controlled = metadata
                .and_then(|m| m.get("ownerReferences"))
                .and_then(Value::as_array)
                .is_some_and(|refs| {
                    refs.iter().any(|r| {
                        r.get("controller").and_then(Value::as_bool) == Some(true)
                    })
                });
            if controlled {
                return true;
            }
        }

        false
    }

    /// Serialize to YAML, enforcing validity and the size gate. The
    /// caller decides whether a failure skips the object or aborts the
    /// kind.
    pub fn serialize(&self, object: &Value, name: &str) -> Result<Vec<u8>, SvcError> {
        let yaml = serde_yaml::to_string(object).map_err(|error| SvcError::InvalidResource {
            name: name.to_string(),
            reason: error.to_string(),
        })?;
        if self.rules.validate_yaml {
            serde_yaml::from_str::<serde_yaml::Value>(&yaml).map_err(|error| {
                SvcError::InvalidResource {
                    name: name.to_string(),
                    reason: format!("round-trip validation failed: {error}"),
                }
            })?;
        }
        let bytes = yaml.into_bytes();
        if let Some(limit) = self.rules.max_resource_size {
            if bytes.len() as u64 > limit {
                return Err(SvcError::ResourceTooLarge {
                    name: name.to_string(),
                    size: bytes.len(),
                    limit,
                });
            }
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "cm1",
                "namespace": "app",
                "uid": "X",
                "resourceVersion": "42",
                "generation": 3,
                "creationTimestamp": "2026-01-01T00:00:00Z",
                "selfLink": "/api/v1/namespaces/app/configmaps/cm1",
                "managedFields": [{"manager": "kubectl"}],
                "labels": {"app": "demo"}
            },
            "data": {"k": "v"},
            "status": {"phase": "Active"}
        })
    }

    #[test]
    fn strips_volatile_fields_and_status() {
        let normalizer = Normalizer::new(InclusionRules::default());
        let mut object = sample();
        normalizer.normalize(&mut object);

        let metadata = object["metadata"].as_object().unwrap();
        for field in VOLATILE_METADATA {
            assert!(!metadata.contains_key(*field), "{field} must be stripped");
        }
        assert!(!metadata.contains_key("managedFields"));
        assert!(object.get("status").is_none());
        // Identifying fields survive.
        assert_eq!(metadata["name"], "cm1");
        assert_eq!(object["data"]["k"], "v");
    }

    #[test]
    fn normalization_is_idempotent() {
        let normalizer = Normalizer::new(InclusionRules::default());
        let mut once = sample();
        normalizer.normalize(&mut once);
        let mut twice = once.clone();
        normalizer.normalize(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn flags_keep_status_and_managed_fields() {
        let normalizer = Normalizer::new(InclusionRules {
            include_status: true,
            include_managed_fields: true,
            ..Default::default()
        });
        let mut object = sample();
        normalizer.normalize(&mut object);
        assert!(object.get("status").is_some());
        assert!(object["metadata"].get("managedFields").is_some());
        // Volatile metadata still goes.
        assert!(object["metadata"].get("uid").is_none());
    }

    #[test]
    fn annotation_selector_gates_objects() {
        let normalizer = Normalizer::new(InclusionRules {
            annotation_selector: Some(("backup".to_string(), "true".to_string())),
            ..Default::default()
        });

        let selected = json!({
            "metadata": {"annotations": {"backup": "true"}}
        });
        assert!(!normalizer.should_skip(&selected));

        let mismatched = json!({
            "metadata": {"annotations": {"backup": "false"}}
        });
        assert!(normalizer.should_skip(&mismatched));

        // Missing annotations map also skips.
        let missing = json!({"metadata": {}});
        assert!(normalizer.should_skip(&missing));
    }

    #[test]
    fn controller_owned_objects_skip_unless_followed() {
        let owned = json!({
            "metadata": {
                "ownerReferences": [
                    {"kind": "ReplicaSet", "controller": true}
                ]
            }
        });
        let strict = Normalizer::new(InclusionRules::default());
        assert!(strict.should_skip(&owned));

        let follower = Normalizer::new(InclusionRules {
            follow_owner_references: true,
            ..Default::default()
        });
        assert!(!follower.should_skip(&owned));

        // Non-controller references do not skip.
        let referenced = json!({
            "metadata": {
                "ownerReferences": [{"kind": "Job", "controller": false}]
            }
        });
        assert!(!strict.should_skip(&referenced));
    }

    #[test]
    fn size_gate_refuses_oversized_documents() {
        let normalizer = Normalizer::new(InclusionRules {
            max_resource_size: Some(32),
            ..Default::default()
        });
        let object = sample();
        assert!(matches!(
            normalizer.serialize(&object, "cm1"),
            Err(SvcError::ResourceTooLarge { .. })
        ));

        let unbounded = Normalizer::new(InclusionRules::default());
        assert!(unbounded.serialize(&object, "cm1").is_ok());
    }
}
