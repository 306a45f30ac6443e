/*
* File: src/webhook.rs
*
* The HTTP surface for the Admission Guard: a small `warp` server exposing
* `/mutate`, `/validate` and `/healthz`, following the embedded-webhook-server
* pattern in `ph_operator/src/controllers/autoheal_controller.rs` (which
* serves Alertmanager callbacks the same way this serves the API server's
* admission callbacks).
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::admission;
use crate::crds::ClusterVersion;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use std::convert::TryInto;
use tracing::{info, warn};
use warp::Filter;

async fn mutate(review: AdmissionReview<ClusterVersion>) -> Result<impl warp::Reply, warp::Rejection> {
    let req: AdmissionRequest<ClusterVersion> = match review.try_into() {
        Ok(req) => req,
        Err(err) => {
            warn!("malformed admission review on /mutate: {err}");
            return Ok(warp::reply::json(
                &AdmissionResponse::invalid(err).into_review(),
            ));
        }
    };

    let mut res = AdmissionResponse::from(&req);
    if let Some(mut obj) = req.object.clone() {
        let before = obj.spec.required_available_count;
        admission::default(&mut obj.spec);
        if obj.spec.required_available_count != before {
            let patch = vec![json_patch::PatchOperation::Replace(
                json_patch::ReplaceOperation {
                    path: "/spec/requiredAvailableCount".parse().expect("valid json pointer"),
                    value: serde_json::json!(obj.spec.required_available_count),
                },
            )];
            res = match res.clone().with_patch(json_patch::Patch(patch)) {
                Ok(res) => res,
                Err(err) => res.deny(err.to_string()),
            };
        }
    }
    Ok(warp::reply::json(&res.into_review()))
}

async fn validate(review: AdmissionReview<ClusterVersion>) -> Result<impl warp::Reply, warp::Rejection> {
    let req: AdmissionRequest<ClusterVersion> = match review.try_into() {
        Ok(req) => req,
        Err(err) => {
            warn!("malformed admission review on /validate: {err}");
            return Ok(warp::reply::json(
                &AdmissionResponse::invalid(err).into_review(),
            ));
        }
    };

    let res = AdmissionResponse::from(&req);
    let res = match req.operation {
        Operation::Create | Operation::Update => match req.object.as_ref() {
            Some(obj) => match admission::validate_clusters(&obj.spec) {
                Ok(()) => res,
                Err(errors) => {
                    let message = errors
                        .iter()
                        .map(|e| e.to_string())
                        .collect::<Vec<_>>()
                        .join("; ");
                    res.deny(message)
                }
            },
            None => res,
        },
        Operation::Delete => match req.old_object.as_ref() {
            Some(obj) => match admission::validate_delete(&obj.status.clone().unwrap_or_default()) {
                Ok(()) => res,
                Err(err) => res.deny(err.message),
            },
            None => res,
        },
        Operation::Connect => res,
    };
    Ok(warp::reply::json(&res.into_review()))
}

/// The admission webhook + health routes, boxed so `main.rs` can `.or()`
/// them together with the metrics route onto a single server without
/// fighting warp's combinator type inference.
pub fn admission_routes() -> warp::filters::BoxedFilter<(Box<dyn warp::Reply>,)> {
    let mutate_route = warp::path("mutate")
        .and(warp::post())
        .and(warp::body::json())
        .and_then(mutate)
        .map(|reply| Box::new(reply) as Box<dyn warp::Reply>);
    let validate_route = warp::path("validate")
        .and(warp::post())
        .and(warp::body::json())
        .and_then(validate)
        .map(|reply| Box::new(reply) as Box<dyn warp::Reply>);
    let health_route = warp::path("healthz")
        .and(warp::get())
        .map(|| Box::new(warp::reply::with_status("ok", warp::http::StatusCode::OK)) as Box<dyn warp::Reply>);

    mutate_route.or(validate_route).unify().or(health_route).unify().boxed()
}

/// Standalone admission webhook server, for local development against a
/// real API server without the metrics route attached.
pub async fn run(addr: std::net::SocketAddr) {
    info!("Starting admission webhook server on {addr}");
    warp::serve(admission_routes()).run(addr).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{ClusterTarget, ClusterVersionSpec, ClusterVersionStatus, OpsEndpoint};
    use kube::core::{ObjectMeta, TypeMeta};

    fn sample_cluster_version(required_available_count: i32, ids: &[&str]) -> ClusterVersion {
        ClusterVersion {
            metadata: ObjectMeta {
                name: Some("fleet-a".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: ClusterVersionSpec {
                clusters: ids
                    .iter()
                    .map(|id| ClusterTarget {
                        id: id.to_string(),
                        version: "1.16.13-gke.404".to_string(),
                    })
                    .collect(),
                ops_endpoint: OpsEndpoint {
                    endpoint: "ops:9090".to_string(),
                    insecure: true,
                },
                required_available_count,
            },
            status: Some(ClusterVersionStatus::default()),
        }
    }

    fn review_for(
        operation: Operation,
        object: Option<ClusterVersion>,
        old_object: Option<ClusterVersion>,
    ) -> AdmissionReview<ClusterVersion> {
        let request = AdmissionRequest::<ClusterVersion> {
            types: TypeMeta {
                api_version: "admission.k8s.io/v1".to_string(),
                kind: "AdmissionReview".to_string(),
            },
            uid: "00000000-0000-0000-0000-000000000000".to_string(),
            kind: Default::default(),
            resource: Default::default(),
            sub_resource: None,
            request_kind: None,
            request_resource: None,
            request_sub_resource: None,
            name: "fleet-a".to_string(),
            namespace: Some("default".to_string()),
            operation,
            user_info: Default::default(),
            object,
            old_object,
            dry_run: false,
            options: None,
        };
        AdmissionReview::from(request)
    }

    #[tokio::test]
    async fn mutate_defaults_non_positive_required_available_count() {
        let cv = sample_cluster_version(0, &["c1", "c2"]);
        let review = review_for(Operation::Create, Some(cv), None);
        let reply = mutate(review).await.unwrap();
        let body = warp::hyper::body::to_bytes(reply.into_response().into_body())
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("\"allowed\":true"));
        assert!(text.contains("JSONPatch"));
    }

    #[tokio::test]
    async fn validate_rejects_duplicate_cluster_ids() {
        let cv = sample_cluster_version(1, &["X/cluster-1", "X/cluster-1"]);
        let review = review_for(Operation::Create, Some(cv), None);
        let reply = validate(review).await.unwrap();
        let body = warp::hyper::body::to_bytes(reply.into_response().into_body())
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("\"allowed\":false"));
        assert!(text.contains("duplicate cluster id"));
    }

    #[tokio::test]
    async fn validate_rejects_delete_while_operation_running() {
        let mut cv = sample_cluster_version(1, &["c1", "c2"]);
        cv.status = Some(ClusterVersionStatus::in_flight("c1", "op-1", "SERVICE_OUT"));
        let review = review_for(Operation::Delete, None, Some(cv));
        let reply = validate(review).await.unwrap();
        let body = warp::hyper::body::to_bytes(reply.into_response().into_body())
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("\"allowed\":false"));
        assert!(text.contains("mustn't delete while operation is running"));
    }
}
