/*
* File: src/admission/mod.rs
*
* The Admission Guard: pure defaulting and validation functions over
* `ClusterVersionSpec`/`ClusterVersionStatus`. No I/O, no Kubernetes client —
* `src/webhook.rs` is the HTTP surface that calls into this module.
*
* Grounded on `original_source/api/v1/clusterversion_webhook.go`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::{ClusterVersionSpec, ClusterVersionStatus};
use std::fmt;

pub const MIN_CLUSTERS: usize = 2;
pub const DELETE_WHILE_RUNNING_MESSAGE: &str = "mustn't delete while operation is running";

/// A single field validation failure, mirroring Kubernetes'
/// `field.Invalid`/`field.ErrorList` shape closely enough that the webhook
/// layer can render it as an `AdmissionResponse` denial message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl AdmissionError {
    fn duplicate_cluster_id(id: &str) -> Self {
        AdmissionError {
            field: "spec.clusters".to_string(),
            message: format!(r#"Invalid value: "{id}": duplicate cluster id"#),
        }
    }

    fn too_few_clusters(count: usize) -> Self {
        AdmissionError {
            field: "spec.clusters".to_string(),
            message: format!(
                "Invalid value: {count}: must have at least {MIN_CLUSTERS} clusters"
            ),
        }
    }
}

/// Mutating webhook logic: if `requiredAvailableCount <= 0`, default it to 1.
pub fn default(spec: &mut ClusterVersionSpec) {
    if spec.required_available_count <= 0 {
        spec.required_available_count = 1;
    }
}

fn validate_duplicate_clusters(spec: &ClusterVersionSpec) -> Option<AdmissionError> {
    for (i, a) in spec.clusters.iter().enumerate() {
        if spec.clusters[..i].iter().any(|b| b.id == a.id) {
            return Some(AdmissionError::duplicate_cluster_id(&a.id));
        }
    }
    None
}

fn validate_min_clusters(spec: &ClusterVersionSpec) -> Option<AdmissionError> {
    if spec.clusters.len() < MIN_CLUSTERS {
        return Some(AdmissionError::too_few_clusters(spec.clusters.len()));
    }
    None
}

/// Validating webhook logic for create/update: rejects documents with
/// fewer than two clusters or with a duplicated cluster id. Returns every
/// failure found rather than stopping at the first, mirroring the
/// `field.ErrorList` accumulation pattern in the original webhook.
pub fn validate_clusters(spec: &ClusterVersionSpec) -> Result<(), Vec<AdmissionError>> {
    let errors: Vec<AdmissionError> = [validate_min_clusters(spec), validate_duplicate_clusters(spec)]
        .into_iter()
        .flatten()
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validating webhook logic for delete: refuses deletion while an
/// operation is in flight.
pub fn validate_delete(status: &ClusterVersionStatus) -> Result<(), AdmissionError> {
    if !status.is_empty() {
        return Err(AdmissionError {
            field: "status.operationID".to_string(),
            message: DELETE_WHILE_RUNNING_MESSAGE.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{ClusterTarget, OpsEndpoint};

    fn spec(ids: &[&str]) -> ClusterVersionSpec {
        ClusterVersionSpec {
            clusters: ids
                .iter()
                .map(|id| ClusterTarget {
                    id: id.to_string(),
                    version: "1.0.0".to_string(),
                })
                .collect(),
            ops_endpoint: OpsEndpoint {
                endpoint: "ops:9090".to_string(),
                insecure: true,
            },
            required_available_count: 1,
        }
    }

    #[test]
    fn defaulting_replaces_non_positive_counts_with_one() {
        let mut s = spec(&["a", "b"]);
        s.required_available_count = 0;
        default(&mut s);
        assert_eq!(s.required_available_count, 1);

        let mut s = spec(&["a", "b"]);
        s.required_available_count = -5;
        default(&mut s);
        assert_eq!(s.required_available_count, 1);
    }

    #[test]
    fn defaulting_leaves_positive_counts_untouched() {
        let mut s = spec(&["a", "b"]);
        s.required_available_count = 3;
        default(&mut s);
        assert_eq!(s.required_available_count, 3);
    }

    #[test]
    fn duplicate_cluster_ids_are_rejected_with_exact_message() {
        let s = spec(&["X/cluster-1", "X/cluster-1"]);
        let err = validate_clusters(&s).unwrap_err();
        assert_eq!(
            err[0].to_string(),
            r#"spec.clusters: Invalid value: "X/cluster-1": duplicate cluster id"#
        );
    }

    #[test]
    fn fewer_than_two_clusters_is_rejected() {
        let s = spec(&["only-one"]);
        assert!(validate_clusters(&s).is_err());
    }

    #[test]
    fn distinct_ids_validate_successfully() {
        let s = spec(&["X/cluster-1", "X/cluster-2"]);
        assert!(validate_clusters(&s).is_ok());
    }

    #[test]
    fn delete_is_refused_while_operation_running() {
        let status = ClusterVersionStatus::in_flight("c1", "op-1", "SERVICE_OUT");
        let err = validate_delete(&status).unwrap_err();
        assert_eq!(err.message, DELETE_WHILE_RUNNING_MESSAGE);
    }

    #[test]
    fn delete_is_allowed_when_idle() {
        let status = ClusterVersionStatus::default();
        assert!(validate_delete(&status).is_ok());
    }
}
