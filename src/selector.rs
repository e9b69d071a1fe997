use crate::error::{Result, SpeedtestError};
use crate::geo;
use crate::traits::Transport;
use crate::types::{AlgoType, Coordinate, Server};
use log::{debug, info, warn};
use reqwest::Url;
use std::time::Duration;

/// A failed latency sample counts as this, so it can never win
pub const LATENCY_PENALTY: Duration = Duration::from_secs(60);

pub fn as_millis_f64(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

pub fn penalty_ms() -> f64 {
    as_millis_f64(LATENCY_PENALTY)
}

/// Resolves `file` next to the server's endpoint, replacing the last path
/// segment: `http://h/speedtest/upload.php` -> `http://h/speedtest/latency.txt`.
pub fn sibling_url(server: &Server, file: &str) -> Result<Url> {
    let base = Url::parse(&server.url)
        .map_err(|e| SpeedtestError::decode(&format!("url of server '{}'", server.id), e))?;
    base.join(file)
        .map_err(|e| SpeedtestError::decode(&format!("url of server '{}'", server.id), e))
}

pub fn latency_url(server: &Server) -> Result<Url> {
    sibling_url(server, "latency.txt")
}

/// Sorts ascending by distance from `origin`, recording each server's distance.
/// Equal distances keep catalog order.
pub fn rank_by_distance(mut servers: Vec<Server>, origin: Coordinate) -> Vec<Server> {
    for server in servers.iter_mut() {
        server.distance = Some(geo::distance(server.location, origin));
    }
    servers.sort_by(|a, b| {
        a.distance
            .unwrap_or(f64::MAX)
            .total_cmp(&b.distance.unwrap_or(f64::MAX))
    });
    servers
}

/// Exact id lookup. Returns an empty `Server` when the id is unknown.
pub fn select_by_id(id: &str, servers: &[Server]) -> Server {
    match servers.iter().find(|s| s.id == id) {
        Some(server) => server.clone(),
        None => {
            warn!("cannot locate server id '{}' in our list of speedtest servers", id);
            Server::default()
        }
    }
}

/// Probes `server` with `samples` sequential GETs and aggregates them in ms.
///
/// Failed samples count as [`LATENCY_PENALTY`] and stay in the aggregate.
/// Only an underivable latency URL is an error.
pub async fn probe_latency<T: Transport + ?Sized>(
    transport: &T,
    server: &Server,
    samples: usize,
    algo: AlgoType,
) -> Result<f64> {
    let url = latency_url(server)?;

    let mut latencies = Vec::with_capacity(samples);
    for _ in 0..samples {
        let latency = match transport.ping(url.as_str()).await {
            Ok(elapsed) => elapsed,
            Err(e) => {
                debug!("latency sample against {} failed: {}", server.id, e);
                LATENCY_PENALTY
            }
        };
        latencies.push(as_millis_f64(latency));
    }

    // samples == 0 is rejected by config validation; treat it as unreachable
    let result = algo.aggregate(&latencies).unwrap_or_else(penalty_ms);
    debug!("server {} latency {:.2}ms over {} samples", server.id, result, samples);
    Ok(result)
}

/// Latency race over a distance-ranked list.
///
/// Probes candidates in order until `num_closest` of them respond without
/// being penalized, then returns the one with the lowest latency. Candidates
/// past that point are never probed. Ties keep catalog order.
pub async fn race_latency<T: Transport + ?Sized>(
    transport: &T,
    candidates: Vec<Server>,
    num_closest: usize,
    samples: usize,
    algo: AlgoType,
) -> Result<Server> {
    let mut successful: Vec<Server> = Vec::with_capacity(num_closest);

    for mut server in candidates {
        if successful.len() >= num_closest {
            break;
        }

        let latency = match probe_latency(transport, &server, samples, algo).await {
            Ok(latency) => latency,
            Err(e) => {
                warn!("skipping server {}: {}", server.id, e);
                continue;
            }
        };

        if latency < penalty_ms() {
            server.latency = Some(latency);
            successful.push(server);
        } else {
            debug!("server {} timed out, dropping it from the race", server.id);
        }
    }

    successful.sort_by(|a, b| {
        a.latency
            .unwrap_or(f64::MAX)
            .total_cmp(&b.latency.unwrap_or(f64::MAX))
    });

    let best = successful
        .into_iter()
        .next()
        .ok_or(SpeedtestError::NoServerAvailable)?;

    info!(
        "selected server {} ({}, {}) at {:.2}ms",
        best.id,
        best.sponsor,
        best.name,
        best.latency.unwrap_or_default()
    );
    Ok(best)
}
