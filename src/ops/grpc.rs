/*
* File: src/ops/grpc.rs
*
* The real `OpsPlane` implementation: a typed gRPC client generated from
* proto/clusterops.proto. Every call opens a fresh connection to
* `OpsEndpoint.endpoint`, issues exactly one RPC, and drops the connection on
* all exit paths — the per-step-fresh-connection semantic from spec §4.3 and
* §5, mirroring `defer closer()` around `grpc.Dial` in the original
* `pkg/ops/plugin_operator.go`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::{
    record_call, ClusterStatus, ClusterStatusType, ClusterVersionInfo, InFlightOperation,
    NodePoolVersionInfo, OperationResult, OperationStatus, OpsError, OpsPlane,
    REQUEST_GET_CLUSTER_STATUS, REQUEST_GET_CLUSTER_VERSION, REQUEST_GET_OPERATION_STATUS,
    REQUEST_SERVICE_IN, REQUEST_SERVICE_OUT, REQUEST_UPGRADE_MASTER, REQUEST_UPGRADE_NODE_POOL,
};
use crate::crds::OpsEndpoint;
use async_trait::async_trait;
use tonic::transport::Channel;

mod pb {
    tonic::include_proto!("clusterops.v1");
}

use pb::cluster_ops_client::ClusterOpsClient;

/// Stateless: holds no long-lived connection. Each trait method dials,
/// calls, and disconnects.
#[derive(Debug, Default, Clone, Copy)]
pub struct GrpcOpsPlane;

fn dial_uri(endpoint: &OpsEndpoint) -> String {
    if endpoint.endpoint.starts_with("http://") || endpoint.endpoint.starts_with("https://") {
        return endpoint.endpoint.clone();
    }
    let scheme = if endpoint.insecure { "http" } else { "https" };
    format!("{scheme}://{}", endpoint.endpoint)
}

async fn connect(endpoint: &OpsEndpoint) -> Result<ClusterOpsClient<Channel>, OpsError> {
    let uri = dial_uri(endpoint);
    let channel = Channel::from_shared(uri.clone())
        .map_err(|e| OpsError::Connect(uri.clone(), e.to_string()))?
        .connect()
        .await
        .map_err(|e| OpsError::Connect(uri, e.to_string()))?;
    Ok(ClusterOpsClient::new(channel))
}

impl From<pb::ClusterStatusType> for ClusterStatusType {
    fn from(v: pb::ClusterStatusType) -> Self {
        match v {
            pb::ClusterStatusType::StatusServiceIn => ClusterStatusType::ServiceIn,
            pb::ClusterStatusType::StatusServiceOut => ClusterStatusType::ServiceOut,
            pb::ClusterStatusType::StatusUnknown => ClusterStatusType::Unknown,
        }
    }
}

impl From<pb::OperationStatusType> for OperationStatus {
    fn from(v: pb::OperationStatusType) -> Self {
        match v {
            pb::OperationStatusType::Done => OperationStatus::Done,
            pb::OperationStatusType::Running => OperationStatus::Running,
            pb::OperationStatusType::Failed => OperationStatus::Failed,
            pb::OperationStatusType::Unknown => OperationStatus::Unknown,
        }
    }
}

impl From<pb::OperationResult> for OperationResult {
    fn from(v: pb::OperationResult) -> Self {
        OperationResult {
            operation_id: v.operation_id,
            operation_type: v.r#type,
        }
    }
}

#[async_trait]
impl OpsPlane for GrpcOpsPlane {
    async fn get_operation_status(
        &self,
        endpoint: &OpsEndpoint,
        op: &InFlightOperation,
    ) -> Result<OperationStatus, OpsError> {
        let mut client = connect(endpoint).await?;
        let req = pb::GetOperationStatusRequest {
            cluster_id: op.cluster_id.clone(),
            operation_id: op.operation_id.clone(),
            r#type: op.operation_type.clone(),
        };
        let call_result = client
            .get_operation_status(req)
            .await
            .map_err(|e| OpsError::Rpc(e.to_string()));
        record_call(REQUEST_GET_OPERATION_STATUS, &call_result);
        let res = call_result?.into_inner();
        let status = pb::OperationStatusType::try_from(res.status)
            .map_err(|_| OpsError::UnknownOperationStatus)?;
        Ok(status.into())
    }

    async fn get_cluster_version(
        &self,
        endpoint: &OpsEndpoint,
        cluster_id: &str,
    ) -> Result<ClusterVersionInfo, OpsError> {
        let mut client = connect(endpoint).await?;
        let req = pb::GetVersionRequest {
            cluster_id: cluster_id.to_string(),
        };
        let call_result = client
            .get_version(req)
            .await
            .map_err(|e| OpsError::Rpc(e.to_string()));
        record_call(REQUEST_GET_CLUSTER_VERSION, &call_result);
        let res = call_result?.into_inner();
        let master = res
            .master
            .ok_or_else(|| OpsError::ClusterNotFound(cluster_id.to_string()))?;
        Ok(ClusterVersionInfo {
            master_version: master.version,
            node_pools: res
                .node_pools
                .into_iter()
                .map(|np| NodePoolVersionInfo {
                    node_pool_id: np.node_pool_id,
                    version: np.version,
                })
                .collect(),
        })
    }

    async fn get_cluster_status(
        &self,
        endpoint: &OpsEndpoint,
        cluster_id: &str,
    ) -> Result<ClusterStatus, OpsError> {
        let mut client = connect(endpoint).await?;
        let req = pb::GetClusterStatusRequest {
            cluster_id: cluster_id.to_string(),
        };
        let call_result = client
            .get_cluster_status(req)
            .await
            .map_err(|e| OpsError::Rpc(e.to_string()));
        record_call(REQUEST_GET_CLUSTER_STATUS, &call_result);
        let res = call_result?.into_inner();
        match pb::ClusterStatusType::try_from(res.status) {
            Ok(pb::ClusterStatusType::StatusUnknown) | Err(_) => Err(OpsError::UnknownClusterStatus),
            Ok(status) => Ok(ClusterStatus {
                status_type: status.into(),
                available: res.is_available,
            }),
        }
    }

    async fn service_in(
        &self,
        endpoint: &OpsEndpoint,
        cluster_id: &str,
    ) -> Result<OperationResult, OpsError> {
        let mut client = connect(endpoint).await?;
        let req = pb::ServiceInRequest {
            cluster_id: cluster_id.to_string(),
        };
        let call_result = client
            .service_in(req)
            .await
            .map_err(|e| OpsError::Rpc(e.to_string()));
        record_call(REQUEST_SERVICE_IN, &call_result);
        Ok(call_result?.into_inner().into())
    }

    async fn service_out(
        &self,
        endpoint: &OpsEndpoint,
        cluster_id: &str,
    ) -> Result<OperationResult, OpsError> {
        let mut client = connect(endpoint).await?;
        let req = pb::ServiceOutRequest {
            cluster_id: cluster_id.to_string(),
        };
        let call_result = client
            .service_out(req)
            .await
            .map_err(|e| OpsError::Rpc(e.to_string()));
        record_call(REQUEST_SERVICE_OUT, &call_result);
        Ok(call_result?.into_inner().into())
    }

    async fn upgrade_master(
        &self,
        endpoint: &OpsEndpoint,
        cluster_id: &str,
        version: &str,
    ) -> Result<OperationResult, OpsError> {
        let mut client = connect(endpoint).await?;
        let req = pb::UpgradeMasterRequest {
            cluster_id: cluster_id.to_string(),
            version: version.to_string(),
        };
        let call_result = client
            .upgrade_master(req)
            .await
            .map_err(|e| OpsError::Rpc(e.to_string()));
        record_call(REQUEST_UPGRADE_MASTER, &call_result);
        Ok(call_result?.into_inner().into())
    }

    async fn upgrade_node_pool(
        &self,
        endpoint: &OpsEndpoint,
        cluster_id: &str,
        node_pool_id: &str,
        version: &str,
    ) -> Result<OperationResult, OpsError> {
        let mut client = connect(endpoint).await?;
        let req = pb::UpgradeNodePoolRequest {
            cluster_id: cluster_id.to_string(),
            node_pool_id: node_pool_id.to_string(),
            version: version.to_string(),
        };
        let call_result = client
            .upgrade_node_pool(req)
            .await
            .map_err(|e| OpsError::Rpc(e.to_string()));
        record_call(REQUEST_UPGRADE_NODE_POOL, &call_result);
        Ok(call_result?.into_inner().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dial_uri_respects_insecure_flag() {
        let insecure = OpsEndpoint {
            endpoint: "ops.internal:9090".to_string(),
            insecure: true,
        };
        assert_eq!(dial_uri(&insecure), "http://ops.internal:9090");

        let secure = OpsEndpoint {
            endpoint: "ops.internal:9090".to_string(),
            insecure: false,
        };
        assert_eq!(dial_uri(&secure), "https://ops.internal:9090");
    }

    #[test]
    fn dial_uri_passes_through_explicit_scheme() {
        let endpoint = OpsEndpoint {
            endpoint: "https://ops.internal:9090".to_string(),
            insecure: true,
        };
        assert_eq!(dial_uri(&endpoint), "https://ops.internal:9090");
    }
}
