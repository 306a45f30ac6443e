/*
* File: src/controllers/reconcile.rs
*
* The Reconciliation Engine: a level-triggered, idempotent state machine
* that drives a `ClusterVersion` document's fleet toward its declared target
* version without ever dropping below the declared availability floor.
*
* Architecture:
* - `step` is the pure core: given a spec, the currently observed status and
*   an `OpsPlane`, it decides the single next action and returns it without
*   touching a Kubernetes client. This is what the test suite below drives
*   directly against `FakeOpsPlane`.
* - `reconcile`/`on_error` are the `kube_runtime::Controller` entrypoints:
*   they fetch the current document, call `step`, persist any status change
*   through the `StatusStore`, publish any warning event, and translate the
*   result into an `Action`.
* - The planner/executor split follows the "callback over service-out gate"
*   redesign: `plan` emits a `PlannedAction` value; `execute` is the thin
*   step that either performs it directly or substitutes a `ServiceOut`
*   first, via `with_service_out`.
*
* Grounded on `examples/original_source/controllers/clusterversion_controller.go`
* for the algorithm, and `ph_operator/src/controllers/dr_controller.rs` for
* the Rust shape (Context struct, thiserror Error enum, on_error function).
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::{ClusterVersion, ClusterVersionSpec, ClusterVersionStatus, OpsEndpoint};
use crate::metrics;
use crate::ops::{ClusterStatusType, InFlightOperation, OperationStatus, OpsError, OpsPlane};
use crate::store::{StatusStore, StoreError};
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

/// How long to wait before the next trigger when nothing else dictates a
/// faster retry. `spec.md` calls this "the default interval (≈60s)".
pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("status store error: {0}")]
    Store(#[from] StoreError),
    #[error("ops plane error: {0}")]
    Ops(#[from] OpsError),
    #[error("ClusterVersion has no namespace")]
    MissingNamespace,
    #[error("cluster {0} is unavailable")]
    ClusterUnavailable(String),
}

/// The context every reconcile invocation shares: the ops-plane client, the
/// status store, and an event recorder identity. No mutable global state
/// beyond what `metrics` already owns process-wide.
pub struct Context {
    pub client: Client,
    pub ops: Arc<dyn OpsPlane>,
    pub store: StatusStore,
    pub reporter: Reporter,
    pub default_requeue: Duration,
}

impl Context {
    pub fn new(client: Client, ops: Arc<dyn OpsPlane>, default_requeue: Duration) -> Self {
        let store = StatusStore::new(client.clone());
        Self {
            client,
            ops,
            store,
            reporter: Reporter::from("clusterversion-operator"),
            default_requeue,
        }
    }
}

/// The single next step the planner has selected for a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PlannedAction {
    UpgradeMaster {
        cluster_id: String,
        version: String,
    },
    UpgradeNodePool {
        cluster_id: String,
        node_pool_id: String,
        version: String,
    },
    ServiceIn {
        cluster_id: String,
    },
}

enum PlanOutcome {
    Converged,
    Act(PlannedAction),
}

/// The action an executing `UpgradeMaster`/`UpgradeNodePool` gates on first.
enum GatedAction {
    UpgradeMaster { version: String },
    UpgradeNodePool { node_pool_id: String, version: String },
}

enum GateOutcome {
    Issued(InFlightOperation),
    Refused(String),
}

/// What a single `step` produced: a status to persist (if it changed) and a
/// warning event to publish (if any). The caller always requeues after
/// `Context::default_requeue` — `spec.md` prescribes one uniform interval.
struct StepResult {
    new_status: Option<ClusterVersionStatus>,
    event: Option<(&'static str, String)>,
}

impl StepResult {
    fn no_op() -> Self {
        Self {
            new_status: None,
            event: None,
        }
    }
}

/// The `kube_runtime::Controller` entrypoint.
pub async fn reconcile(obj: Arc<ClusterVersion>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = obj.namespace().ok_or(Error::MissingNamespace)?;
    let name = obj.name_any();

    let current = match ctx.store.get(&namespace, &name).await? {
        Some(current) => current,
        None => return Ok(Action::await_change()),
    };
    let status = current.status.clone().unwrap_or_default();

    let result = match step(&current.spec, &status, ctx.ops.as_ref()).await {
        Ok(result) => result,
        Err(Error::ClusterUnavailable(cluster_id)) => {
            publish_event(
                &ctx,
                &current,
                "ClusterUnavailable",
                format!("cluster {cluster_id} is unavailable"),
            )
            .await;
            return Err(Error::ClusterUnavailable(cluster_id));
        }
        Err(other) => return Err(other),
    };

    if let Some(new_status) = result.new_status {
        let mut patched = current.clone();
        patched.status = Some(new_status);
        ctx.store.update_observed_state(&patched).await?;
    }

    if let Some((reason, note)) = result.event {
        publish_event(&ctx, &current, reason, note).await;
    }

    Ok(Action::requeue(ctx.default_requeue))
}

pub fn on_error(obj: Arc<ClusterVersion>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        "reconcile failed for {}: {error}",
        obj.name_any()
    );
    Action::requeue(ctx.default_requeue)
}

async fn publish_event(ctx: &Context, obj: &ClusterVersion, reason: &str, note: String) {
    let recorder = Recorder::new(ctx.client.clone(), ctx.reporter.clone());
    if let Err(err) = recorder
        .publish(
            &Event {
                type_: EventType::Warning,
                reason: reason.to_string(),
                note: Some(note),
                action: "Reconciling".to_string(),
                secondary: None,
            },
            &obj.object_ref(&()),
        )
        .await
    {
        warn!("failed to publish {reason} event for {}: {err}", obj.name_any());
    }
}

/// The core state machine, with no Kubernetes client in sight: it only ever
/// talks to `ops`. Top-level dispatch per `spec.md` §4.1: a non-empty
/// `operationID` means an operation is in flight (Track Phase); otherwise
/// the fleet needs a plan (Plan Phase).
async fn step(
    spec: &ClusterVersionSpec,
    status: &ClusterVersionStatus,
    ops: &dyn OpsPlane,
) -> Result<StepResult, Error> {
    if status.is_empty() {
        plan_and_act(spec, ops).await
    } else {
        track(spec, status, ops).await
    }
}

async fn track(
    spec: &ClusterVersionSpec,
    status: &ClusterVersionStatus,
    ops: &dyn OpsPlane,
) -> Result<StepResult, Error> {
    let endpoint = &spec.ops_endpoint;
    let op = InFlightOperation {
        cluster_id: status.cluster_id.clone(),
        operation_id: status.operation_id.clone(),
        operation_type: status.operation_type.clone(),
    };
    let outcome = ops.get_operation_status(endpoint, &op).await?;
    match outcome {
        OperationStatus::Running => Ok(StepResult::no_op()),
        OperationStatus::Done => {
            metrics::add_success_operation(&op.operation_type);
            Ok(StepResult {
                new_status: Some(ClusterVersionStatus::default()),
                event: None,
            })
        }
        OperationStatus::Failed => {
            metrics::add_failed_operation(&op.operation_type);
            Ok(StepResult {
                new_status: Some(ClusterVersionStatus::default()),
                event: Some((
                    "OperationFailed",
                    format!(
                        "operation_type: {}, operation_id: {}",
                        op.operation_type, op.operation_id
                    ),
                )),
            })
        }
        OperationStatus::Unknown => {
            error!(
                "ops plane returned an unknown status for operation {}",
                op.operation_id
            );
            Ok(StepResult::no_op())
        }
    }
}

async fn plan_and_act(spec: &ClusterVersionSpec, ops: &dyn OpsPlane) -> Result<StepResult, Error> {
    let endpoint = &spec.ops_endpoint;
    match plan(spec, ops).await? {
        PlanOutcome::Converged => Ok(StepResult::no_op()),
        PlanOutcome::Act(action) => execute(spec, endpoint, ops, action).await,
    }
}

/// Iterates `clusters` in declared order and returns the first action still
/// needed, per `spec.md` §4.1's Plan Phase algorithm.
async fn plan(spec: &ClusterVersionSpec, ops: &dyn OpsPlane) -> Result<PlanOutcome, Error> {
    let endpoint = &spec.ops_endpoint;
    for target in &spec.clusters {
        let version = ops.get_cluster_version(endpoint, &target.id).await?;
        if version.master_version != target.version {
            return Ok(PlanOutcome::Act(PlannedAction::UpgradeMaster {
                cluster_id: target.id.clone(),
                version: target.version.clone(),
            }));
        }
        if let Some(pool) = version
            .node_pools
            .iter()
            .find(|pool| pool.version != target.version)
        {
            return Ok(PlanOutcome::Act(PlannedAction::UpgradeNodePool {
                cluster_id: target.id.clone(),
                node_pool_id: pool.node_pool_id.clone(),
                version: target.version.clone(),
            }));
        }

        let status = ops.get_cluster_status(endpoint, &target.id).await?;
        if !status.available {
            return Err(Error::ClusterUnavailable(target.id.clone()));
        }
        if status.status_type == ClusterStatusType::ServiceOut {
            return Ok(PlanOutcome::Act(PlannedAction::ServiceIn {
                cluster_id: target.id.clone(),
            }));
        }
        // Already at target version, in service and available: converged
        // for this cluster, move on to the next.
    }
    Ok(PlanOutcome::Converged)
}

async fn execute(
    spec: &ClusterVersionSpec,
    endpoint: &OpsEndpoint,
    ops: &dyn OpsPlane,
    action: PlannedAction,
) -> Result<StepResult, Error> {
    let gate_outcome = match action {
        PlannedAction::ServiceIn { cluster_id } => {
            let result = ops.service_in(endpoint, &cluster_id).await?;
            GateOutcome::Issued(InFlightOperation {
                cluster_id,
                operation_id: result.operation_id,
                operation_type: result.operation_type,
            })
        }
        PlannedAction::UpgradeMaster { cluster_id, version } => {
            with_service_out(spec, endpoint, ops, &cluster_id, GatedAction::UpgradeMaster { version }).await?
        }
        PlannedAction::UpgradeNodePool {
            cluster_id,
            node_pool_id,
            version,
        } => {
            with_service_out(
                spec,
                endpoint,
                ops,
                &cluster_id,
                GatedAction::UpgradeNodePool { node_pool_id, version },
            )
            .await?
        }
    };

    Ok(match gate_outcome {
        GateOutcome::Issued(op) => StepResult {
            new_status: Some(ClusterVersionStatus::in_flight(
                op.cluster_id,
                op.operation_id,
                op.operation_type,
            )),
            event: None,
        },
        GateOutcome::Refused(reason) => StepResult {
            new_status: None,
            event: Some(("ClusterUnavailable", reason)),
        },
    })
}

/// Per `spec.md` §4.1: an action that requires the cluster to already be
/// ServiceOut either runs directly (cluster is already ServiceOut), or
/// substitutes a ServiceOut first if the fleet can currently spare it, or
/// is refused outright. Refusal is not propagated as an error — it is the
/// "AvailabilityRefused" outcome from `spec.md` §7 and §9's Open Question:
/// emit an event, do not requeue early.
async fn with_service_out(
    spec: &ClusterVersionSpec,
    endpoint: &OpsEndpoint,
    ops: &dyn OpsPlane,
    cluster_id: &str,
    action: GatedAction,
) -> Result<GateOutcome, Error> {
    let status = ops.get_cluster_status(endpoint, cluster_id).await?;
    if status.status_type == ClusterStatusType::ServiceOut {
        let result = match action {
            GatedAction::UpgradeMaster { version } => ops.upgrade_master(endpoint, cluster_id, &version).await?,
            GatedAction::UpgradeNodePool { node_pool_id, version } => {
                ops.upgrade_node_pool(endpoint, cluster_id, &node_pool_id, &version).await?
            }
        };
        return Ok(GateOutcome::Issued(InFlightOperation {
            cluster_id: cluster_id.to_string(),
            operation_id: result.operation_id,
            operation_type: result.operation_type,
        }));
    }

    if can_service_out(spec, endpoint, ops, cluster_id).await {
        let result = ops.service_out(endpoint, cluster_id).await?;
        return Ok(GateOutcome::Issued(InFlightOperation {
            cluster_id: cluster_id.to_string(),
            operation_id: result.operation_id,
            operation_type: result.operation_type,
        }));
    }

    Ok(GateOutcome::Refused(format!(
        "cannot service-out {cluster_id}: fewer than {} other cluster(s) are service-in and available",
        spec.required_available_count
    )))
}

/// Counts OTHER clusters the ops plane reports as `ServiceIn ∧ available`,
/// treating ops-plane errors as "not counted", and returns true as soon as
/// `requiredAvailableCount` is reached.
async fn can_service_out(
    spec: &ClusterVersionSpec,
    endpoint: &OpsEndpoint,
    ops: &dyn OpsPlane,
    cluster_id: &str,
) -> bool {
    let mut available = 0i32;
    for other in spec.clusters.iter().filter(|c| c.id != cluster_id) {
        if let Ok(status) = ops.get_cluster_status(endpoint, &other.id).await {
            if status.available && status.status_type == ClusterStatusType::ServiceIn {
                available += 1;
                if available >= spec.required_available_count {
                    return true;
                }
            }
        }
    }
    available >= spec.required_available_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::ClusterTarget;
    use crate::ops::fake::FakeOpsPlane;

    const TARGET_VERSION: &str = "1.16.13-gke.404";
    const CURRENT_VERSION: &str = "1.16.13-gke.different";

    fn spec(ids: &[&str], required_available_count: i32) -> ClusterVersionSpec {
        ClusterVersionSpec {
            clusters: ids
                .iter()
                .map(|id| ClusterTarget {
                    id: id.to_string(),
                    version: TARGET_VERSION.to_string(),
                })
                .collect(),
            ops_endpoint: OpsEndpoint {
                endpoint: "fake:0".to_string(),
                insecure: true,
            },
            required_available_count,
        }
    }

    async fn seed_fleet(fake: &FakeOpsPlane, ids: &[&str]) {
        for id in ids {
            let np1 = format!("{id}/node-pool-1");
            let np2 = format!("{id}/node-pool-2");
            fake.seed_cluster(
                id,
                CURRENT_VERSION,
                &[(np1.as_str(), CURRENT_VERSION), (np2.as_str(), CURRENT_VERSION)],
            )
            .await;
        }
    }

    /// Drives `step` to completion, sleeping past the fake ops plane's
    /// simulated completion delay whenever an operation is in flight.
    async fn drive(spec: &ClusterVersionSpec, ops: &dyn OpsPlane, iterations: usize) -> ClusterVersionStatus {
        let mut status = ClusterVersionStatus::default();
        for _ in 0..iterations {
            let result = step(spec, &status, ops).await.expect("no error expected in this scenario");
            if let Some(new_status) = result.new_status {
                status = new_status;
            }
            if !status.is_empty() {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        }
        status
    }

    #[tokio::test]
    async fn happy_path_upgrades_both_clusters_in_declared_order() {
        let fake = FakeOpsPlane::new();
        seed_fleet(&fake, &["X/cluster-1", "X/cluster-2"]).await;
        let spec = spec(&["X/cluster-1", "X/cluster-2"], 1);

        let final_status = drive(&spec, &fake, 40).await;
        assert!(final_status.is_empty(), "fleet should have converged with no in-flight operation");

        let executed = fake.executed_operations().await;
        let types: Vec<&str> = executed.iter().map(|op| op.operation_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "SERVICE_OUT",
                "UPGRADE_MASTER",
                "UPGRADE_NODE_POOL",
                "UPGRADE_NODE_POOL",
                "SERVICE_IN",
                "SERVICE_OUT",
                "UPGRADE_MASTER",
                "UPGRADE_NODE_POOL",
                "UPGRADE_NODE_POOL",
                "SERVICE_IN",
            ]
        );
    }

    #[tokio::test]
    async fn availability_floor_blocks_service_out_when_no_other_cluster_qualifies() {
        let fake = FakeOpsPlane::new();
        seed_fleet(&fake, &["X/cluster-1", "X/cluster-2"]).await;
        fake.set_available("X/cluster-2", false).await;
        let spec = spec(&["X/cluster-1", "X/cluster-2"], 1);

        let status = ClusterVersionStatus::default();
        let result = step(&spec, &status, &fake).await.unwrap();

        assert!(result.new_status.is_none());
        assert!(matches!(result.event, Some((reason, _)) if reason == "ClusterUnavailable"));
        assert!(fake.executed_operations().await.is_empty());

        // Replaying the trigger is still a no-op: the floor never changes.
        let result = step(&spec, &status, &fake).await.unwrap();
        assert!(result.new_status.is_none());
        assert!(fake.executed_operations().await.is_empty());
    }

    #[tokio::test]
    async fn target_becoming_unavailable_mid_flight_stops_before_service_in() {
        let fake = FakeOpsPlane::new();
        seed_fleet(&fake, &["X/cluster-1", "X/cluster-2"]).await;
        let spec = spec(&["X/cluster-1", "X/cluster-2"], 1);

        // Drive through SERVICE_OUT, UPGRADE_MASTER and both node pool
        // upgrades for cluster-1 (4 operations), then flip it unavailable
        // before SERVICE_IN is ever issued.
        let mut status = ClusterVersionStatus::default();
        while fake.executed_operations().await.len() < 4 {
            let result = step(&spec, &status, &fake).await.expect("no error before unavailability");
            if let Some(new_status) = result.new_status {
                status = new_status;
            }
            if !status.is_empty() {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        }
        assert!(status.is_empty(), "fourth operation should already be tracked to completion");

        fake.set_available("X/cluster-1", false).await;

        let err = step(&spec, &status, &fake).await.unwrap_err();
        assert!(matches!(err, Error::ClusterUnavailable(id) if id == "X/cluster-1"));
        assert_eq!(fake.executed_operations().await.len(), 4, "no SERVICE_IN should have been issued");
    }

    #[tokio::test]
    async fn failed_operation_clears_status_and_is_replanned_identically() {
        let fake = FakeOpsPlane::new();
        seed_fleet(&fake, &["X/cluster-1", "X/cluster-2"]).await;
        let spec = spec(&["X/cluster-1", "X/cluster-2"], 1);

        fake.fail_next_operation().await;
        let result = step(&spec, &ClusterVersionStatus::default(), &fake).await.unwrap();
        let in_flight = result.new_status.expect("an operation should have been issued");
        assert!(!in_flight.is_empty());

        tokio::time::sleep(Duration::from_millis(25)).await;
        let result = step(&spec, &in_flight, &fake).await.unwrap();
        assert!(matches!(result.event, Some((reason, _)) if reason == "OperationFailed"));
        let cleared = result.new_status.expect("status should be cleared on terminal Failed");
        assert!(cleared.is_empty());

        // Replaying the trigger on the now-empty status re-plans the exact
        // same kind of action (idempotence across a failure).
        let replanned = step(&spec, &cleared, &fake).await.unwrap();
        let second_attempt = replanned.new_status.expect("the same action should be re-issued");
        assert_eq!(second_attempt.operation_type, in_flight.operation_type);
        assert_ne!(second_attempt.operation_id, in_flight.operation_id);
    }

    #[tokio::test]
    async fn reconciling_converged_fleet_twice_is_a_no_op_both_times() {
        let fake = FakeOpsPlane::new();
        fake.seed_cluster(
            "X/cluster-1",
            TARGET_VERSION,
            &[("X/cluster-1/node-pool-1", TARGET_VERSION)],
        )
        .await;
        fake.seed_cluster(
            "X/cluster-2",
            TARGET_VERSION,
            &[("X/cluster-2/node-pool-1", TARGET_VERSION)],
        )
        .await;
        let spec = spec(&["X/cluster-1", "X/cluster-2"], 1);
        let status = ClusterVersionStatus::default();

        let first = step(&spec, &status, &fake).await.unwrap();
        let second = step(&spec, &status, &fake).await.unwrap();

        assert!(first.new_status.is_none());
        assert!(second.new_status.is_none());
        assert!(fake.executed_operations().await.is_empty());
    }

    #[tokio::test]
    async fn at_most_one_in_flight_operation_while_running() {
        let fake = FakeOpsPlane::new();
        seed_fleet(&fake, &["X/cluster-1", "X/cluster-2"]).await;
        let spec = spec(&["X/cluster-1", "X/cluster-2"], 1);

        let result = step(&spec, &ClusterVersionStatus::default(), &fake).await.unwrap();
        let in_flight = result.new_status.unwrap();
        assert!(!in_flight.is_empty());

        // Reconciling again immediately (operation still Running) must not
        // issue a second RPC.
        let before = fake.executed_operations().await.len();
        let result = step(&spec, &in_flight, &fake).await.unwrap();
        assert!(result.new_status.is_none());
        assert_eq!(fake.executed_operations().await.len(), before);
    }
}
