/*
* File: src/ops/mod.rs
*
* Defines the capability set the Reconciliation Engine depends on for
* talking to the external ops plane, plus the transient (non-persisted)
* types that capability set exchanges. Two implementations exist: `grpc`
* (the real ops plane, over a typed gRPC surface) and `fake` (an in-memory
* simulator used by the engine's own test suite and by `OPS_PLANE_FAKE=1`
* local runs).
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod fake;
pub mod grpc;

use crate::crds::OpsEndpoint;
use async_trait::async_trait;
use thiserror::Error;

/// Master + node pool versions observed for a single cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterVersionInfo {
    pub master_version: String,
    pub node_pools: Vec<NodePoolVersionInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePoolVersionInfo {
    pub node_pool_id: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClusterStatusType {
    #[default]
    ServiceIn,
    ServiceOut,
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterStatus {
    pub status_type: ClusterStatusType,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub operation_id: String,
    pub operation_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Running,
    Done,
    Failed,
    Unknown,
}

/// Identity of an in-flight operation, as persisted in `ClusterVersionStatus`.
#[derive(Debug, Clone)]
pub struct InFlightOperation {
    pub cluster_id: String,
    pub operation_id: String,
    pub operation_type: String,
}

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("failed to dial ops plane endpoint {0}: {1}")]
    Connect(String, String),
    #[error("ops plane rpc failed: {0}")]
    Rpc(String),
    #[error("cluster {0} not found by ops plane")]
    ClusterNotFound(String),
    #[error("operation {0} not found by ops plane")]
    OperationNotFound(String),
    #[error("ops plane returned an unrecognized cluster status enum value")]
    UnknownClusterStatus,
    #[error("ops plane returned an unrecognized operation status enum value")]
    UnknownOperationStatus,
}

pub const REQUEST_GET_CLUSTER_STATUS: &str = "GetClusterStatus";
pub const REQUEST_GET_CLUSTER_VERSION: &str = "GetClusterVersion";
pub const REQUEST_GET_OPERATION_STATUS: &str = "GetOperationStatus";
pub const REQUEST_SERVICE_IN: &str = "ServiceIn";
pub const REQUEST_SERVICE_OUT: &str = "ServiceOut";
pub const REQUEST_UPGRADE_MASTER: &str = "UpgradeMaster";
pub const REQUEST_UPGRADE_NODE_POOL: &str = "UpgradeNodePool";

pub const OPERATION_SERVICE_IN: &str = "SERVICE_IN";
pub const OPERATION_SERVICE_OUT: &str = "SERVICE_OUT";
pub const OPERATION_UPGRADE_MASTER: &str = "UPGRADE_MASTER";
pub const OPERATION_UPGRADE_NODE_POOL: &str = "UPGRADE_NODE_POOL";

/// The capability set the engine depends on. Each call is a single,
/// cancelable, independently-connecting request/response exchange; no
/// implementation may hold state across calls that would let one
/// `ClusterVersion` document observe another's in-flight operation.
#[async_trait]
pub trait OpsPlane: Send + Sync {
    async fn get_operation_status(
        &self,
        endpoint: &OpsEndpoint,
        op: &InFlightOperation,
    ) -> Result<OperationStatus, OpsError>;

    async fn get_cluster_version(
        &self,
        endpoint: &OpsEndpoint,
        cluster_id: &str,
    ) -> Result<ClusterVersionInfo, OpsError>;

    async fn get_cluster_status(
        &self,
        endpoint: &OpsEndpoint,
        cluster_id: &str,
    ) -> Result<ClusterStatus, OpsError>;

    async fn service_in(
        &self,
        endpoint: &OpsEndpoint,
        cluster_id: &str,
    ) -> Result<OperationResult, OpsError>;

    async fn service_out(
        &self,
        endpoint: &OpsEndpoint,
        cluster_id: &str,
    ) -> Result<OperationResult, OpsError>;

    async fn upgrade_master(
        &self,
        endpoint: &OpsEndpoint,
        cluster_id: &str,
        version: &str,
    ) -> Result<OperationResult, OpsError>;

    async fn upgrade_node_pool(
        &self,
        endpoint: &OpsEndpoint,
        cluster_id: &str,
        node_pool_id: &str,
        version: &str,
    ) -> Result<OperationResult, OpsError>;
}

/// Increments the appropriate success/failure plugin-call counter for a
/// request type based on the outcome of calling `f`. Shared by both
/// implementations so metric bookkeeping lives in exactly one place.
pub(crate) fn record_call<T>(request_type: &str, result: &Result<T, OpsError>) {
    match result {
        Ok(_) => crate::metrics::add_success_plugin_call(request_type),
        Err(_) => crate::metrics::add_failed_plugin_call(request_type),
    }
}
