/*
* File: src/store.rs
*
* The Status Store Adapter: reads and writes `ClusterVersion` against the
* Kubernetes API server. `update_observed_state` applies the status as a
* targeted subresource patch, the same pattern as
* `dr_controller.rs::update_status` in the teacher, so concurrent edits to
* `spec` by a user never collide with the engine's `status` write.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::ClusterVersion;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
}

pub const FIELD_MANAGER: &str = "clusterversion-operator";

/// Read/write access to `ClusterVersion` documents. Takes the namespace
/// explicitly on every call since the document is namespaced and a single
/// adapter instance is shared across all namespaces the operator watches.
pub struct StatusStore {
    client: Client,
}

impl StatusStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ClusterVersion> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// A "not found" result is `Ok(None)` — terminal success per the engine's
    /// top-level dispatch rule, not an error.
    pub async fn get(&self, namespace: &str, name: &str) -> Result<Option<ClusterVersion>, StoreError> {
        match self.api(namespace).get_opt(name).await? {
            Some(obj) => Ok(Some(obj)),
            None => Ok(None),
        }
    }

    /// Persists `obj.status` as a merge patch against the status
    /// subresource, leaving `spec` untouched.
    pub async fn update_observed_state(&self, obj: &ClusterVersion) -> Result<(), StoreError> {
        let namespace = obj
            .metadata
            .namespace
            .as_deref()
            .expect("ClusterVersion is namespaced");
        let name = obj
            .metadata
            .name
            .as_deref()
            .expect("ClusterVersion must have a name to patch its status");
        let patch = Patch::Merge(json!({ "status": obj.status }));
        let params = PatchParams::apply(FIELD_MANAGER);
        self.api(namespace)
            .patch_status(name, &params, &patch)
            .await?;
        Ok(())
    }
}
