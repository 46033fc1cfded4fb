//! Shared HTTP connections for provider clients.
//!
//! Chat traffic is long-lived and bursty: a completion can run for minutes
//! and the next request almost always targets the same host. Keeping one
//! `reqwest::Client` per provider base URL avoids paying a TLS handshake
//! per turn without letting every call site build its own pool. A process
//! talks to at most a handful of provider endpoints, so a plain mutexed
//! map is enough here.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use once_cell::sync::Lazy;

/// Idle connections kept per provider host; an agent rarely runs more
/// than a few parallel turns against one endpoint.
const MAX_IDLE_PER_HOST: usize = 8;
/// Idle connections survive human-scale gaps between turns.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);
/// Connecting must fail fast even though completions may run long.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

static POOLS: Lazy<Mutex<HashMap<String, reqwest::Client>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// The shared client for a provider base URL, built on first use.
///
/// `reqwest::Client` is internally reference-counted, so the returned
/// clone shares the underlying connection pool.
pub fn shared_client(base_url: &str) -> reqwest::Client {
    let mut pools = POOLS.lock().unwrap();
    pools
        .entry(base_url.to_string())
        .or_insert_with(build_client)
        .clone()
}

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
        .pool_idle_timeout(IDLE_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .expect("static client configuration")
}
