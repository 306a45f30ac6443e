/*
* File: src/main.rs
*
* The entry point for the clusterversion-operator binary. Follows the
* teacher's `main.rs` shape: initialize tracing, build a Kubernetes client,
* register metrics, then run the controller loop and the HTTP server
* concurrently via `tokio::join!`.
*
* Unlike the teacher, this binary does not export OpenTelemetry/Jaeger
* spans — this controller has no distributed trace worth exporting across
* services, it only ever talks to one ops-plane endpoint per call — and it
* serves the admission webhooks, `/metrics` and `/healthz` from one `warp`
* server instead of a second process/port, since all three are small enough
* to share one listener.
*
* SPDX-License-Identifier: Apache-2.0
*/

mod admission;
mod config;
mod controllers;
mod crds;
mod metrics;
mod ops;
mod store;
mod webhook;

use crate::config::Config;
use crate::crds::ClusterVersion;
use crate::ops::grpc::GrpcOpsPlane;
use crate::ops::fake::FakeOpsPlane;
use crate::ops::OpsPlane;
use controllers::Context;
use futures::StreamExt;
use kube::{Client, CustomResourceExt};
use kube_runtime::{watcher, Controller};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use warp::Filter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json();
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

async fn metrics_handler(registry: Arc<Registry>) -> Result<impl warp::Reply, warp::Rejection> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder
        .encode(&registry.gather(), &mut buffer)
        .expect("failed to encode metrics");
    let body = String::from_utf8(buffer).expect("prometheus text encoding is always valid utf-8");
    Ok(warp::reply::with_header(body, "Content-Type", encoder.format_type()))
}

async fn run_http_server(addr: std::net::SocketAddr, registry: Arc<Registry>) {
    let metrics_route = warp::path("metrics")
        .and(warp::get())
        .and(warp::any().map(move || registry.clone()))
        .and_then(metrics_handler)
        .map(|reply| Box::new(reply) as Box<dyn warp::Reply>);

    let routes = webhook::admission_routes().or(metrics_route).unify();
    info!("Starting HTTP server (admission webhooks, /metrics, /healthz) on {addr}");
    warp::serve(routes).run(addr).await;
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    init_tracing();

    if std::env::args().any(|a| a == "--print-crd") {
        print!("{}", serde_yaml::to_string(&ClusterVersion::crd())?);
        return Ok(());
    }

    let config = Config::from_env();
    let client = Client::try_default().await?;

    let ops: Arc<dyn OpsPlane> = if config.ops_plane_fake {
        info!("OPS_PLANE_FAKE set: using the in-memory ops plane simulator");
        Arc::new(FakeOpsPlane::new())
    } else {
        Arc::new(GrpcOpsPlane::default())
    };

    let registry = Arc::new(metrics::create_and_register_metrics()?);
    info!("Custom metrics registered.");

    let context = Arc::new(Context::new(client.clone(), ops, config.default_requeue));
    let api = kube::Api::<ClusterVersion>::all(client.clone());

    info!("clusterversion-operator starting");

    tokio::join!(
        run_http_server(config.http_addr, registry),
        Controller::new(api, watcher::Config::default())
            .run(controllers::reconcile::reconcile, controllers::on_error, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => info!("reconciled ClusterVersion: {:?}", o),
                    Err(e) => error!("ClusterVersion reconcile error: {e}"),
                }
            }),
    );

    info!("clusterversion-operator shutting down");
    Ok(())
}
