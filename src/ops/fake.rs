/*
* File: src/ops/fake.rs
*
* An in-memory ops plane simulator, grounded on
* `original_source/controllers/mock_operator_test.go`'s `mockOperator`: it
* holds per-cluster version/status maps behind a lock, and simulates an
* async operation by spawning a delayed task that flips the operation to
* Done (or Failed, if configured) and applies its effect to the relevant
* map, exactly like the Go mock's `time.AfterFunc`.
*
* Used by the engine's own test suite, and available for local smoke runs
* via `OPS_PLANE_FAKE=1` so the operator can be exercised without a real ops
* plane endpoint.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::{
    ClusterStatus, ClusterStatusType, ClusterVersionInfo, InFlightOperation, NodePoolVersionInfo,
    OperationResult, OperationStatus, OpsError, OpsPlane, OPERATION_SERVICE_IN,
    OPERATION_SERVICE_OUT, OPERATION_UPGRADE_MASTER, OPERATION_UPGRADE_NODE_POOL,
};
use crate::crds::OpsEndpoint;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const OPERATION_WAIT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Default)]
struct ClusterState {
    version: ClusterVersionInfo,
    status: ClusterStatus,
}

#[derive(Debug, Default)]
struct Inner {
    clusters: HashMap<String, ClusterState>,
    operations: HashMap<String, OperationStatus>,
    executed: Vec<OperationResult>,
    next_operation_id: u64,
    fail_next: bool,
}

/// An in-memory `OpsPlane` for tests. Clone shares the same underlying
/// state (it is an `Arc<Mutex<_>>` handle), so a test can seed clusters on
/// one handle and assert on another.
#[derive(Debug, Clone, Default)]
pub struct FakeOpsPlane {
    inner: Arc<Mutex<Inner>>,
}

impl FakeOpsPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a cluster as ServiceIn+available at the given master/node pool
    /// versions, mirroring `mockOperator.AddClusterVersion`.
    pub async fn seed_cluster(
        &self,
        cluster_id: &str,
        master_version: &str,
        node_pools: &[(&str, &str)],
    ) {
        let mut inner = self.inner.lock().await;
        inner.clusters.insert(
            cluster_id.to_string(),
            ClusterState {
                version: ClusterVersionInfo {
                    master_version: master_version.to_string(),
                    node_pools: node_pools
                        .iter()
                        .map(|(id, v)| NodePoolVersionInfo {
                            node_pool_id: id.to_string(),
                            version: v.to_string(),
                        })
                        .collect(),
                },
                status: ClusterStatus {
                    status_type: ClusterStatusType::ServiceIn,
                    available: true,
                },
            },
        );
    }

    pub async fn set_available(&self, cluster_id: &str, available: bool) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.clusters.get_mut(cluster_id) {
            state.status.available = available;
        }
    }

    /// Causes the *next* operation issued (of any kind) to resolve to
    /// Failed instead of Done, without applying its effect. The flag is
    /// consumed by that one operation.
    pub async fn fail_next_operation(&self) {
        let mut inner = self.inner.lock().await;
        inner.fail_next = true;
    }

    /// Takes and clears the pending fail-next flag, returning whether the
    /// operation about to be issued should fail.
    fn take_fail_next(inner: &mut Inner) -> bool {
        std::mem::take(&mut inner.fail_next)
    }

    pub async fn executed_operations(&self) -> Vec<OperationResult> {
        self.inner.lock().await.executed.clone()
    }

    async fn next_id(&self, inner: &mut Inner) -> String {
        inner.next_operation_id += 1;
        format!("fake-op-{}", inner.next_operation_id)
    }

    /// Spawns the delayed completion of an issued operation, applying
    /// `effect` to cluster state once it transitions to Done.
    fn complete_after_delay(
        &self,
        operation_id: String,
        should_fail: bool,
        effect: impl FnOnce(&mut Inner) + Send + 'static,
    ) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(OPERATION_WAIT).await;
            let mut inner = inner.lock().await;
            if should_fail {
                inner.operations.insert(operation_id, OperationStatus::Failed);
                return;
            }
            effect(&mut inner);
            inner.operations.insert(operation_id, OperationStatus::Done);
        });
    }
}

#[async_trait]
impl OpsPlane for FakeOpsPlane {
    async fn get_operation_status(
        &self,
        _endpoint: &OpsEndpoint,
        op: &InFlightOperation,
    ) -> Result<OperationStatus, OpsError> {
        let inner = self.inner.lock().await;
        inner
            .operations
            .get(&op.operation_id)
            .copied()
            .ok_or_else(|| OpsError::OperationNotFound(op.operation_id.clone()))
    }

    async fn get_cluster_version(
        &self,
        _endpoint: &OpsEndpoint,
        cluster_id: &str,
    ) -> Result<ClusterVersionInfo, OpsError> {
        let inner = self.inner.lock().await;
        inner
            .clusters
            .get(cluster_id)
            .map(|s| s.version.clone())
            .ok_or_else(|| OpsError::ClusterNotFound(cluster_id.to_string()))
    }

    async fn get_cluster_status(
        &self,
        _endpoint: &OpsEndpoint,
        cluster_id: &str,
    ) -> Result<ClusterStatus, OpsError> {
        let inner = self.inner.lock().await;
        inner
            .clusters
            .get(cluster_id)
            .map(|s| s.status)
            .ok_or_else(|| OpsError::ClusterNotFound(cluster_id.to_string()))
    }

    async fn service_in(
        &self,
        _endpoint: &OpsEndpoint,
        cluster_id: &str,
    ) -> Result<OperationResult, OpsError> {
        let mut inner = self.inner.lock().await;
        let id = self.next_id(&mut inner).await;
        let should_fail = Self::take_fail_next(&mut inner);
        inner.operations.insert(id.clone(), OperationStatus::Running);
        let cluster = cluster_id.to_string();
        self.complete_after_delay(id.clone(), should_fail, move |inner| {
            if let Some(state) = inner.clusters.get_mut(&cluster) {
                state.status.status_type = ClusterStatusType::ServiceIn;
            }
        });
        let result = OperationResult {
            operation_id: id,
            operation_type: OPERATION_SERVICE_IN.to_string(),
        };
        inner.executed.push(result.clone());
        Ok(result)
    }

    async fn service_out(
        &self,
        _endpoint: &OpsEndpoint,
        cluster_id: &str,
    ) -> Result<OperationResult, OpsError> {
        let mut inner = self.inner.lock().await;
        let id = self.next_id(&mut inner).await;
        let should_fail = Self::take_fail_next(&mut inner);
        inner.operations.insert(id.clone(), OperationStatus::Running);
        let cluster = cluster_id.to_string();
        self.complete_after_delay(id.clone(), should_fail, move |inner| {
            if let Some(state) = inner.clusters.get_mut(&cluster) {
                state.status.status_type = ClusterStatusType::ServiceOut;
            }
        });
        let result = OperationResult {
            operation_id: id,
            operation_type: OPERATION_SERVICE_OUT.to_string(),
        };
        inner.executed.push(result.clone());
        Ok(result)
    }

    async fn upgrade_master(
        &self,
        _endpoint: &OpsEndpoint,
        cluster_id: &str,
        version: &str,
    ) -> Result<OperationResult, OpsError> {
        let mut inner = self.inner.lock().await;
        let id = self.next_id(&mut inner).await;
        let should_fail = Self::take_fail_next(&mut inner);
        inner.operations.insert(id.clone(), OperationStatus::Running);
        let cluster = cluster_id.to_string();
        let target = version.to_string();
        self.complete_after_delay(id.clone(), should_fail, move |inner| {
            if let Some(state) = inner.clusters.get_mut(&cluster) {
                state.version.master_version = target;
            }
        });
        let result = OperationResult {
            operation_id: id,
            operation_type: OPERATION_UPGRADE_MASTER.to_string(),
        };
        inner.executed.push(result.clone());
        Ok(result)
    }

    async fn upgrade_node_pool(
        &self,
        _endpoint: &OpsEndpoint,
        cluster_id: &str,
        node_pool_id: &str,
        version: &str,
    ) -> Result<OperationResult, OpsError> {
        let mut inner = self.inner.lock().await;
        let id = self.next_id(&mut inner).await;
        let should_fail = Self::take_fail_next(&mut inner);
        inner.operations.insert(id.clone(), OperationStatus::Running);
        let cluster = cluster_id.to_string();
        let pool = node_pool_id.to_string();
        let target = version.to_string();
        self.complete_after_delay(id.clone(), should_fail, move |inner| {
            if let Some(state) = inner.clusters.get_mut(&cluster) {
                if let Some(np) = state
                    .version
                    .node_pools
                    .iter_mut()
                    .find(|np| np.node_pool_id == pool)
                {
                    np.version = target;
                }
            }
        });
        let result = OperationResult {
            operation_id: id,
            operation_type: OPERATION_UPGRADE_NODE_POOL.to_string(),
        };
        inner.executed.push(result.clone());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> OpsEndpoint {
        OpsEndpoint {
            endpoint: "fake:0".to_string(),
            insecure: true,
        }
    }

    #[tokio::test]
    async fn service_out_then_in_transitions_through_running_to_done() {
        let fake = FakeOpsPlane::new();
        fake.seed_cluster("c1", "1.0.0", &[("np1", "1.0.0")]).await;

        let result = fake.service_out(&endpoint(), "c1").await.unwrap();
        let op = InFlightOperation {
            cluster_id: "c1".to_string(),
            operation_id: result.operation_id.clone(),
            operation_type: result.operation_type.clone(),
        };
        assert_eq!(
            fake.get_operation_status(&endpoint(), &op).await.unwrap(),
            OperationStatus::Running
        );

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(
            fake.get_operation_status(&endpoint(), &op).await.unwrap(),
            OperationStatus::Done
        );
        let status = fake.get_cluster_status(&endpoint(), "c1").await.unwrap();
        assert_eq!(status.status_type, ClusterStatusType::ServiceOut);
    }

    #[tokio::test]
    async fn unknown_cluster_is_an_error() {
        let fake = FakeOpsPlane::new();
        let err = fake.get_cluster_status(&endpoint(), "missing").await;
        assert!(matches!(err, Err(OpsError::ClusterNotFound(_))));
    }
}
