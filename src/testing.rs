//! In-memory Transport for tests.

use crate::error::{Result, SpeedtestError};
use crate::traits::{Transfer, Transport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const CONFIG_URL: &str = "http://c.example.net/speedtest-config.php";
pub const SERVERS_URL: &str = "http://c.example.net/servers.php";

pub const CONFIG_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<settings>
<client ip="203.0.113.7" lat="0.0000" lon="0.0000" isp="Example Telecom" isprating="3.7" rating="0" ispdlavg="0" ispulavg="0" loggedin="0" country="XX" />
<times dl1="5000000" dl2="35000000" dl3="800000000" ul1="1000000" ul2="8000000" ul3="35000000" />
</settings>"#;

// Roughly 10 km, 5 km and 20 km east of (0, 0), in that catalog order.
pub const SERVERS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<settings>
<servers>
<server url="http://alpha.example.net:8080/speedtest/upload.php" lat="0.0" lon="0.09" name="Alphaville" country="Exampleland" cc="XX" sponsor="Alpha Networks" id="1001" host="alpha.example.net:8080" />
<server url="http://bravo.example.net:8080/speedtest/upload.php" lat="0.0" lon="0.045" name="Bravo City" country="Exampleland" cc="XX" sponsor="Bravo Broadband" id="1002" host="bravo.example.net:8080" />
<server url="http://charlie.example.net:8080/speedtest/upload.php" lat="0.0" lon="0.18" name="Charlie Town" country="Exampleland" cc="XX" sponsor="Charlie Fiber" id="1003" host="charlie.example.net:8080" />
</servers>
</settings>"#;

pub const ALPHA_LATENCY: &str = "http://alpha.example.net:8080/speedtest/latency.txt";
pub const BRAVO_LATENCY: &str = "http://bravo.example.net:8080/speedtest/latency.txt";
pub const CHARLIE_LATENCY: &str = "http://charlie.example.net:8080/speedtest/latency.txt";

/// Scripted responses keyed by URL. Every request is recorded.
///
/// Ping and upload scripts cycle: sample `i` uses entry `i % len`.
/// `None` in a script is a failed request.
#[derive(Default)]
pub struct ScriptedTransport {
    documents: HashMap<String, String>,
    pings: HashMap<String, Vec<Option<Duration>>>,
    downloads: HashMap<String, Option<Transfer>>,
    uploads: HashMap<String, Vec<Option<Duration>>>,
    counters: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    /// Serves the config and server list fixtures, nothing else.
    pub fn new() -> Self {
        Self::default()
            .with_document(CONFIG_URL, CONFIG_XML)
            .with_document(SERVERS_URL, SERVERS_XML)
    }

    /// Documents are matched by prefix so cache busters don't matter.
    pub fn with_document(mut self, url: &str, body: &str) -> Self {
        self.documents.insert(url.to_string(), body.to_string());
        self
    }

    pub fn with_ping(mut self, url: &str, samples: &[Option<u64>]) -> Self {
        let samples = samples
            .iter()
            .map(|ms| ms.map(Duration::from_millis))
            .collect();
        self.pings.insert(url.to_string(), samples);
        self
    }

    pub fn with_download(mut self, url: &str, transfer: Option<Transfer>) -> Self {
        self.downloads.insert(url.to_string(), transfer);
        self
    }

    pub fn with_upload(mut self, url: &str, elapsed: &[Option<Duration>]) -> Self {
        self.uploads.insert(url.to_string(), elapsed.to_vec());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_starting_with(&self, prefix: &str) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|u| u.starts_with(prefix))
            .collect()
    }

    fn record(&self, url: &str) -> usize {
        self.requests.lock().unwrap().push(url.to_string());
        let mut counters = self.counters.lock().unwrap();
        let n = counters.entry(url.to_string()).or_insert(0);
        *n += 1;
        *n - 1
    }
}

fn cycled<T: Copy>(script: &[Option<T>], i: usize) -> Option<T> {
    if script.is_empty() {
        return None;
    }
    script[i % script.len()]
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.record(url);
        self.documents
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix.as_str()))
            .map(|(_, body)| body.clone())
            .ok_or_else(|| SpeedtestError::Fetch {
                url: url.to_string(),
                reason: "404 Not Found".to_string(),
            })
    }

    async fn ping(&self, url: &str) -> Result<Duration> {
        let i = self.record(url);
        let script = self.pings.get(url).map(Vec::as_slice).unwrap_or(&[]);
        cycled(script, i).ok_or_else(|| SpeedtestError::Fetch {
            url: url.to_string(),
            reason: "operation timed out".to_string(),
        })
    }

    async fn download(&self, url: &str) -> Result<Transfer> {
        self.record(url);
        self.downloads
            .get(url)
            .copied()
            .flatten()
            .ok_or_else(|| SpeedtestError::Transfer {
                url: url.to_string(),
                reason: "connection reset".to_string(),
            })
    }

    async fn upload(&self, url: &str, _content_type: &str, body: Vec<u8>) -> Result<Transfer> {
        let i = self.record(url);
        let script = self.uploads.get(url).map(Vec::as_slice).unwrap_or(&[]);
        match cycled(script, i) {
            Some(elapsed) => Ok(Transfer {
                bytes: body.len() as u64,
                elapsed,
            }),
            None => Err(SpeedtestError::Transfer {
                url: url.to_string(),
                reason: "connection reset".to_string(),
            }),
        }
    }
}
