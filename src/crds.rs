/*
* File: src/crds.rs
*
* This file defines the Rust data structures that correspond to the
* ClusterVersion Custom Resource Definition. By using the `kube::CustomResource`
* derive macro, we create a strongly-typed representation of the desired-state
* document, enabling safe and idiomatic interaction with the Kubernetes API.
*
* Architecture:
* - `ClusterVersion` is the top-level kind (group `multicluster-ops.io`,
*   version `v1`), decorated with `#[kube(...)]` metadata mapping the Rust
*   struct to its CRD.
* - `ClusterVersionSpec` is the user's desired state: the cluster fleet, the
*   ops plane endpoint, and the availability floor.
* - `ClusterVersionStatus` is the operator's observed state: the identity of
*   the single in-flight operation, or all-empty when none is running.
* - `schemars` generates the OpenAPI v3 schema embedded in the CRD manifest
*   for server-side validation of `spec.clusters` (`minItems = 2`).
*
* SPDX-License-Identifier: Apache-2.0
*/

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single managed cluster and the version it should converge to.
///
/// `id` is opaque and provider-specific (for GKE, something like
/// `projects/%s/locations/%s/clusters/%s`); the controller never parses it,
/// only compares it for equality and uniqueness.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTarget {
    pub id: String,
    pub version: String,
}

/// Address of the external ops plane gRPC service that performs
/// provider-specific upgrade and service-in/out operations.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpsEndpoint {
    pub endpoint: String,
    #[serde(default)]
    pub insecure: bool,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "multicluster-ops.io",
    version = "v1",
    kind = "ClusterVersion",
    namespaced,
    status = "ClusterVersionStatus",
    printcolumn = r#"{"name":"Operation", "type":"string", "jsonPath":".status.operationType"}"#,
    printcolumn = r#"{"name":"ClusterID", "type":"string", "jsonPath":".status.clusterID"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    shortname = "cver"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterVersionSpec {
    /// Length must be >= 2; enforced by the admission guard, not the engine.
    pub clusters: Vec<ClusterTarget>,
    pub ops_endpoint: OpsEndpoint,
    /// Minimum count of OTHER clusters that must remain service-in and
    /// available before any one cluster may be taken out of service.
    /// Defaulted to 1 by the admission guard when <= 0.
    pub required_available_count: i32,
}

/// Identity of the single in-flight operation for this document, or all
/// empty when none is running. Either all three fields are empty, or all
/// three are non-empty — the engine is the only writer of this type.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterVersionStatus {
    /// `camelCase` would produce `clusterId`; pinned explicitly to match the
    /// wire format this CRD's schema and printcolumn actually expect.
    #[serde(default, rename = "clusterID")]
    pub cluster_id: String,
    #[serde(default, rename = "operationID")]
    pub operation_id: String,
    #[serde(default)]
    pub operation_type: String,
}

impl ClusterVersionStatus {
    pub fn is_empty(&self) -> bool {
        self.operation_id.is_empty()
    }

    pub fn in_flight(cluster_id: impl Into<String>, operation_id: impl Into<String>, operation_type: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            operation_id: operation_id.into(),
            operation_type: operation_type.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_status_has_no_in_flight_operation() {
        let status = ClusterVersionStatus::default();
        assert!(status.is_empty());
    }

    #[test]
    fn in_flight_status_is_not_empty() {
        let status = ClusterVersionStatus::in_flight("c1", "op-1", "SERVICE_OUT");
        assert!(!status.is_empty());
        assert_eq!(status.cluster_id, "c1");
    }
}
