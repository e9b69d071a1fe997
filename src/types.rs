use serde::{Deserialize, Serialize};

/// Latitude / longitude in decimal degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Candidate measurement server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub sponsor: String,
    pub name: String,
    pub country: String,
    pub cc: String,
    pub location: Coordinate,
    /// e.g. "http://speedtest.example.net:8080/speedtest/upload.php"
    pub url: String,
    /// km from the operator, set by distance ranking
    pub distance: Option<f64>,
    /// ms, set by the latency probe
    pub latency: Option<f64>,
}

/// Where the requester is, as reported by the config endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperatorLocation {
    pub ip: String,
    pub isp: String,
    pub location: Coordinate,
}

/// How several samples collapse into one figure.
///
/// `Max` keeps the smallest sample. The name is historical and existing
/// dashboards are built on those numbers.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum AlgoType {
    #[default]
    Avg,
    Max,
}

impl AlgoType {
    /// Mean for `Avg`, minimum for `Max`. `None` when there are no samples.
    pub fn aggregate(self, samples: &[f64]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        match self {
            AlgoType::Avg => Some(samples.iter().sum::<f64>() / samples.len() as f64),
            AlgoType::Max => samples.iter().copied().reduce(f64::min),
        }
    }
}

/// Outcome of one measurement run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MeasurementResult {
    pub server: Server,
    pub latency_ms: Option<f64>,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
}

impl MeasurementResult {
    pub fn is_complete(&self) -> bool {
        self.latency_ms.is_some() && self.download_mbps.is_some() && self.upload_mbps.is_some()
    }
}
