/*
* File: src/metrics.rs
*
* This module defines and registers the custom Prometheus metrics that the
* clusterversion-operator exposes. These metrics provide insight into the
* lifecycle of the operations the engine issues against the ops plane.
*
* Using `lazy_static`, we ensure that the metrics are created only once and
* are available globally and safely across all concurrent reconciliation
* loops and the webhook/metrics server.
*
* SPDX-License-Identifier: Apache-2.0
*/

use lazy_static::lazy_static;
use prometheus::{opts, register_int_counter_vec, IntCounterVec, Registry};

lazy_static! {
    /// Counts successfully completed operations (ServiceIn/ServiceOut/
    /// UpgradeMaster/UpgradeNodePool), labeled by operation type.
    pub static ref SUCCESS_OPERATION_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "multicluster_clusterversion_success_operation_total",
            "Number of performed success cluster operations"
        ),
        &["operation"]
    )
    .unwrap();

    /// Counts operations that terminated in a Failed status, labeled by
    /// operation type.
    pub static ref FAILED_OPERATION_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "multicluster_clusterversion_failed_operation_total",
            "Number of performed failed cluster operations"
        ),
        &["operation"]
    )
    .unwrap();

    /// Counts successful ops-plane RPCs, labeled by request type.
    pub static ref SUCCESS_PLUGIN_CALL_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "multicluster_clusterversion_success_plugin_call_total",
            "Number of success calls to the ops plane"
        ),
        &["request_type"]
    )
    .unwrap();

    /// Counts failed ops-plane RPCs, labeled by request type.
    pub static ref FAILED_PLUGIN_CALL_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "multicluster_clusterversion_failed_plugin_call_total",
            "Number of failed calls to the ops plane"
        ),
        &["request_type"]
    )
    .unwrap();
}

/// Creates a new Prometheus registry and registers all custom metrics.
///
/// Intended to be called once at operator startup.
pub fn create_and_register_metrics() -> Result<Registry, prometheus::Error> {
    let r = Registry::new();
    r.register(Box::new(SUCCESS_OPERATION_TOTAL.clone()))?;
    r.register(Box::new(FAILED_OPERATION_TOTAL.clone()))?;
    r.register(Box::new(SUCCESS_PLUGIN_CALL_TOTAL.clone()))?;
    r.register(Box::new(FAILED_PLUGIN_CALL_TOTAL.clone()))?;
    Ok(r)
}

pub fn add_success_operation(operation: &str) {
    SUCCESS_OPERATION_TOTAL.with_label_values(&[operation]).inc();
}

pub fn add_failed_operation(operation: &str) {
    FAILED_OPERATION_TOTAL.with_label_values(&[operation]).inc();
}

pub fn add_success_plugin_call(request_type: &str) {
    SUCCESS_PLUGIN_CALL_TOTAL.with_label_values(&[request_type]).inc();
}

pub fn add_failed_plugin_call(request_type: &str) {
    FAILED_PLUGIN_CALL_TOTAL.with_label_values(&[request_type]).inc();
}
