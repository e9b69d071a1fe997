//! Server discovery against the speedtest.net XML endpoints.

use crate::error::{Result, SpeedtestError};
use crate::traits::Transport;
use crate::types::{Coordinate, OperatorLocation, Server};
use log::{debug, warn};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use std::collections::HashSet;

// <settings><servers><server url=".." lat=".." .../></servers></settings>
#[derive(Debug, Deserialize)]
struct ServersDocument {
    servers: ServerList,
}

#[derive(Debug, Deserialize)]
struct ServerList {
    #[serde(rename = "server", default)]
    entries: Vec<ServerEntry>,
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    #[serde(rename = "@url")]
    url: String,
    #[serde(rename = "@lat")]
    lat: String,
    #[serde(rename = "@lon")]
    lon: String,
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@country", default)]
    country: String,
    #[serde(rename = "@cc", default)]
    cc: String,
    #[serde(rename = "@sponsor", default)]
    sponsor: String,
    #[serde(rename = "@id")]
    id: String,
}

// <settings><client ip=".." lat=".." lon=".." isp=".." .../>...</settings>
#[derive(Debug, Deserialize)]
struct ConfigDocument {
    client: ClientEntry,
}

#[derive(Debug, Deserialize)]
struct ClientEntry {
    #[serde(rename = "@ip", default)]
    ip: String,
    #[serde(rename = "@lat")]
    lat: String,
    #[serde(rename = "@lon")]
    lon: String,
    #[serde(rename = "@isp", default)]
    isp: String,
}

/// Appends a random `x=` query parameter so intermediaries never serve a
/// cached document.
pub fn cache_busted(url: &str) -> String {
    let token: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}x={}", url, sep, token)
}

fn parse_coordinate(what: &str, lat: &str, lon: &str) -> Result<Coordinate> {
    let lat = lat
        .trim()
        .parse::<f64>()
        .map_err(|e| SpeedtestError::decode(what, format!("latitude '{}': {}", lat, e)))?;
    let lon = lon
        .trim()
        .parse::<f64>()
        .map_err(|e| SpeedtestError::decode(what, format!("longitude '{}': {}", lon, e)))?;
    Ok(Coordinate::new(lat, lon))
}

/// Decodes a server list document, dropping blacklisted ids.
///
/// One bad coordinate fails the whole document.
pub fn parse_servers(body: &str, blacklist: &HashSet<String>) -> Result<Vec<Server>> {
    let doc: ServersDocument =
        quick_xml::de::from_str(body).map_err(|e| SpeedtestError::decode("server list", e))?;

    let mut servers = Vec::with_capacity(doc.servers.entries.len());
    for entry in doc.servers.entries {
        if blacklist.contains(&entry.id) {
            debug!("skipping blacklisted server {}", entry.id);
            continue;
        }
        let what = format!("server {}", entry.id);
        let location = parse_coordinate(&what, &entry.lat, &entry.lon)?;
        servers.push(Server {
            id: entry.id,
            sponsor: entry.sponsor,
            name: entry.name,
            country: entry.country,
            cc: entry.cc,
            location,
            url: entry.url,
            distance: None,
            latency: None,
        });
    }
    Ok(servers)
}

/// Decodes the client section of the config document.
pub fn parse_operator_location(body: &str) -> Result<OperatorLocation> {
    let doc: ConfigDocument =
        quick_xml::de::from_str(body).map_err(|e| SpeedtestError::decode("client config", e))?;
    let location = parse_coordinate("client config", &doc.client.lat, &doc.client.lon)?;
    Ok(OperatorLocation {
        ip: doc.client.ip,
        isp: doc.client.isp,
        location,
    })
}

/// Fetches the full candidate list. Never cached: every call goes to the network.
pub async fn fetch_servers<T: Transport + ?Sized>(
    transport: &T,
    servers_url: &str,
    blacklist: &HashSet<String>,
) -> Result<Vec<Server>> {
    let body = transport.fetch_text(&cache_busted(servers_url)).await?;
    let servers = parse_servers(&body, blacklist)?;
    if servers.is_empty() {
        warn!("server list from {} is empty", servers_url);
    }
    debug!("fetched {} candidate servers", servers.len());
    Ok(servers)
}

/// Fetches the requester's own ip, ISP and coordinates.
pub async fn fetch_operator_location<T: Transport + ?Sized>(
    transport: &T,
    config_url: &str,
) -> Result<OperatorLocation> {
    let body = transport.fetch_text(&cache_busted(config_url)).await?;
    let operator = parse_operator_location(&body)?;
    debug!(
        "operator {} ({}) at {:.4},{:.4}",
        operator.ip, operator.isp, operator.location.lat, operator.location.lon
    );
    Ok(operator)
}
