/*
* File: src/config.rs
*
* Process configuration, read directly from the environment. The teacher's
* `main.rs` looks up `PROMETHEUS_ENDPOINT` the same way: a plain
* `std::env::var`/`unwrap_or_else` call per setting, no config-file layer.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::time::Duration;

/// Address the combined admission-webhook/metrics/health HTTP server binds.
const ENV_HTTP_ADDR: &str = "HTTP_ADDR";
const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8443";

/// Seconds to wait before the next trigger when nothing else dictates a
/// faster retry.
const ENV_DEFAULT_REQUEUE_SECS: &str = "OPS_PLANE_DEFAULT_REQUEUE_SECS";
const DEFAULT_REQUEUE_SECS: u64 = 60;

/// When set to any non-empty value, the operator talks to an in-memory
/// `FakeOpsPlane` instead of dialing a real ops plane over gRPC. Intended
/// for local smoke-testing, never for production.
const ENV_OPS_PLANE_FAKE: &str = "OPS_PLANE_FAKE";

#[derive(Debug, Clone)]
pub struct Config {
    pub http_addr: std::net::SocketAddr,
    pub default_requeue: Duration,
    pub ops_plane_fake: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let http_addr = std::env::var(ENV_HTTP_ADDR)
            .unwrap_or_else(|_| DEFAULT_HTTP_ADDR.to_string())
            .parse()
            .unwrap_or_else(|_| DEFAULT_HTTP_ADDR.parse().expect("default HTTP_ADDR is valid"));

        let default_requeue = std::env::var(ENV_DEFAULT_REQUEUE_SECS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(DEFAULT_REQUEUE_SECS));

        let ops_plane_fake = std::env::var(ENV_OPS_PLANE_FAKE)
            .map(|v| !v.is_empty())
            .unwrap_or(false);

        Self {
            http_addr,
            default_requeue,
            ops_plane_fake,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_defaults_when_env_is_unset() {
        std::env::remove_var(ENV_HTTP_ADDR);
        std::env::remove_var(ENV_DEFAULT_REQUEUE_SECS);
        std::env::remove_var(ENV_OPS_PLANE_FAKE);

        let config = Config::from_env();
        assert_eq!(config.http_addr, DEFAULT_HTTP_ADDR.parse().unwrap());
        assert_eq!(config.default_requeue, Duration::from_secs(DEFAULT_REQUEUE_SECS));
        assert!(!config.ops_plane_fake);
    }
}
