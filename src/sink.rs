//! Writes measurement results to InfluxDB using the v1 line protocol.

use crate::config::InfluxConfig;
use crate::error::{Result, SpeedtestError};
use crate::traits::MetricsSink;
use crate::types::MeasurementResult;
use async_trait::async_trait;
use log::debug;
use regex::Regex;
use reqwest::Client;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const MEASUREMENT: &str = "speedtest";

const WRITE_TIMEOUT: u64 = 30;

// Compiled once for the life of the process
static TAG_ESCAPE: OnceLock<Regex> = OnceLock::new();

/// Escapes commas, equals signs and spaces in tag keys and values.
fn escape_tag(s: &str) -> String {
    let re = TAG_ESCAPE
        .get_or_init(|| Regex::new(r"([ ,=])").expect("tag escape pattern is a valid regex"));
    re.replace_all(s, r"\$1").into_owned()
}

/// One line-protocol point for a complete result.
/// Tags are sorted by key; empty tag values are left out.
pub fn encode_point(result: &MeasurementResult, timestamp_secs: u64) -> Result<String> {
    let (Some(latency), Some(download), Some(upload)) =
        (result.latency_ms, result.download_mbps, result.upload_mbps)
    else {
        return Err(SpeedtestError::Sink(
            "refusing to write a partial measurement".to_string(),
        ));
    };

    let server = &result.server;
    let tags = [
        ("server_country", server.country.as_str()),
        ("server_id", server.id.as_str()),
        ("server_name", server.name.as_str()),
        ("server_sponsor", server.sponsor.as_str()),
        ("server_url", server.url.as_str()),
    ];

    let mut line = String::from(MEASUREMENT);
    for (key, value) in tags.iter().filter(|(_, v)| !v.is_empty()) {
        line.push_str(&format!(",{}={}", key, escape_tag(value)));
    }

    line.push_str(&format!(" download={},latency={}", download, latency));
    if let Some(distance) = server.distance {
        line.push_str(&format!(",server_distance={}", distance));
    }
    line.push_str(&format!(",upload={} {}", upload, timestamp_secs));

    Ok(line)
}

pub struct InfluxSink {
    client: Client,
    config: InfluxConfig,
}

impl InfluxSink {
    pub fn new(config: InfluxConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(WRITE_TIMEOUT))
            .build()
            .map_err(|e| SpeedtestError::Sink(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn write_url(&self) -> String {
        format!("{}/write", self.config.url.trim_end_matches('/'))
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("db", self.config.database.clone()),
            ("precision", "s".to_string()),
        ];
        if let Some(ref user) = self.config.username {
            query.push(("u", user.clone()));
        }
        if let Some(ref password) = self.config.password {
            query.push(("p", password.clone()));
        }
        query
    }
}

#[async_trait]
impl MetricsSink for InfluxSink {
    fn name(&self) -> &'static str {
        "influxdb"
    }

    async fn write(&self, result: &MeasurementResult) -> Result<()> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let line = encode_point(result, now)?;
        debug!("writing point: {}", line);

        let resp = self
            .client
            .post(self.write_url())
            .query(&self.query())
            .body(line)
            .send()
            .await
            .map_err(|e| SpeedtestError::Sink(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SpeedtestError::Sink(format!("{}: {}", status, body.trim())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Server;

    fn complete() -> MeasurementResult {
        MeasurementResult {
            server: Server {
                id: "1001".to_string(),
                sponsor: "Alpha Networks".to_string(),
                name: "Alphaville, AV".to_string(),
                country: "Exampleland".to_string(),
                url: "http://alpha.example.net:8080/speedtest/upload.php".to_string(),
                distance: Some(10.5),
                ..Default::default()
            },
            latency_ms: Some(12.25),
            download_mbps: Some(93.5),
            upload_mbps: Some(40.0),
        }
    }

    #[test]
    fn test_escape_tag() {
        assert_eq!(escape_tag("New York, NY"), r"New\ York\,\ NY");
        assert_eq!(escape_tag("a=b"), r"a\=b");
        assert_eq!(escape_tag("plain"), "plain");
    }

    #[test]
    fn test_escape_pattern_is_shared() {
        escape_tag("warm up");
        let first = TAG_ESCAPE.get().map(|re| re as *const Regex);
        escape_tag("again, please");
        let second = TAG_ESCAPE.get().map(|re| re as *const Regex);
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn test_encode_point() -> Result<()> {
        let line = encode_point(&complete(), 1_700_000_000)?;
        assert_eq!(
            line,
            "speedtest,server_country=Exampleland,server_id=1001,\
             server_name=Alphaville\\,\\ AV,server_sponsor=Alpha\\ Networks,\
             server_url=http://alpha.example.net:8080/speedtest/upload.php \
             download=93.5,latency=12.25,server_distance=10.5,upload=40 1700000000"
        );
        Ok(())
    }

    #[test]
    fn test_unranked_server_has_no_distance_field() -> Result<()> {
        let mut res = complete();
        res.server.distance = None;
        res.server.country.clear();

        let line = encode_point(&res, 1)?;
        assert!(!line.contains("server_distance"));
        assert!(!line.contains("server_country"));
        assert!(line.ends_with("download=93.5,latency=12.25,upload=40 1"));
        Ok(())
    }

    #[test]
    fn test_partial_result_is_refused() {
        let mut res = complete();
        res.upload_mbps = None;
        assert!(matches!(encode_point(&res, 1), Err(SpeedtestError::Sink(_))));
    }

    #[test]
    fn test_write_query() -> Result<()> {
        let sink = InfluxSink::new(InfluxConfig {
            url: "http://influx.local:8086/".to_string(),
            database: "net".to_string(),
            username: Some("u1".to_string()),
            password: None,
        })?;
        assert_eq!(sink.write_url(), "http://influx.local:8086/write");
        assert_eq!(
            sink.query(),
            vec![
                ("db", "net".to_string()),
                ("precision", "s".to_string()),
                ("u", "u1".to_string())
            ]
        );
        Ok(())
    }
}
