use async_trait::async_trait;
use crate::error::Result;
use crate::types::MeasurementResult;
use std::time::Duration;

/// One timed transfer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transfer {
    /// Payload bytes moved (received for downloads, sent for uploads)
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Transport: the HTTP capability the measurement engine runs on
#[async_trait]
pub trait Transport: Sync + Send {
    /// GET a document and return its body.
    /// Fails with `Fetch` on transport errors or non-2xx status.
    async fn fetch_text(&self, url: &str) -> Result<String>;

    /// GET `url` once and return the time until response headers arrived.
    /// The body is read and discarded.
    async fn ping(&self, url: &str) -> Result<Duration>;

    /// GET `url` in full, timing the whole transfer.
    /// Fails with `Transfer`.
    async fn download(&self, url: &str) -> Result<Transfer>;

    /// POST `body` to `url`. `bytes` in the result is the request payload size.
    /// Fails with `Transfer`.
    async fn upload(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<Transfer>;
}

/// MetricsSink: where complete measurement results end up
#[async_trait]
pub trait MetricsSink: Sync + Send {
    /// Sink name for log messages (e.g. "influxdb")
    fn name(&self) -> &'static str;

    async fn write(&self, result: &MeasurementResult) -> Result<()>;
}
