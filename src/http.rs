use crate::error::{Result, SpeedtestError};
use crate::traits::{Transfer, Transport};
use async_trait::async_trait;
use futures::StreamExt;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::Client;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Resolves the `--interface` option to a local address.
///
/// An IP literal is used as is. Anything else is taken as an interface
/// name; its first IPv4 address wins, falling back to any address.
pub fn resolve_source_address(interface: &str) -> Result<IpAddr> {
    if let Ok(ip) = interface.parse::<IpAddr>() {
        return Ok(ip);
    }

    let bind_err = |reason: String| SpeedtestError::Bind {
        interface: interface.to_string(),
        reason,
    };

    let addrs: Vec<IpAddr> = if_addrs::get_if_addrs()
        .map_err(|e| bind_err(e.to_string()))?
        .into_iter()
        .filter(|iface| iface.name == interface)
        .map(|iface| iface.ip())
        .collect();

    if addrs.is_empty() {
        return Err(bind_err("no such interface or no address found".to_string()));
    }

    Ok(addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .copied()
        .unwrap_or(addrs[0]))
}

/// reqwest-backed Transport.
///
/// One client per run; the timeout applies to connect (TLS included), keepalive
/// and the whole request.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, user_agent: &str, interface: Option<&str>) -> Result<Self> {
        let local_address = interface.map(resolve_source_address).transpose()?;

        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .tcp_keepalive(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .local_address(local_address)
            .build()
            .map_err(|e| SpeedtestError::Bind {
                interface: interface.unwrap_or_default().to_string(),
                reason: e.to_string(),
            })?;

        if let Some(addr) = local_address {
            debug!("binding outbound connections to {}", addr);
        }

        Ok(Self { client })
    }

    #[cfg(test)]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn fetch_err(url: &str, reason: impl ToString) -> SpeedtestError {
    SpeedtestError::Fetch {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

fn transfer_err(url: &str, reason: impl ToString) -> SpeedtestError {
    SpeedtestError::Transfer {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_err(url, e))?;

        if !resp.status().is_success() {
            return Err(fetch_err(url, resp.status()));
        }
        resp.text().await.map_err(|e| fetch_err(url, e))
    }

    async fn ping(&self, url: &str) -> Result<Duration> {
        let start = Instant::now();

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_err(url, e))?;
        // Latency is time to response headers
        let elapsed = start.elapsed();

        if !resp.status().is_success() {
            return Err(fetch_err(url, resp.status()));
        }
        resp.bytes().await.map_err(|e| fetch_err(url, e))?;

        Ok(elapsed)
    }

    async fn download(&self, url: &str) -> Result<Transfer> {
        let start = Instant::now();

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transfer_err(url, e))?;
        if !resp.status().is_success() {
            return Err(transfer_err(url, resp.status()));
        }

        // Count bytes as they arrive instead of buffering the image
        let mut bytes = 0u64;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            bytes += chunk.map_err(|e| transfer_err(url, e))?.len() as u64;
        }

        Ok(Transfer {
            bytes,
            elapsed: start.elapsed(),
        })
    }

    async fn upload(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<Transfer> {
        let bytes = body.len() as u64;
        let start = Instant::now();

        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| transfer_err(url, e))?;
        let elapsed = start.elapsed();

        if !resp.status().is_success() {
            return Err(transfer_err(url, resp.status()));
        }
        resp.bytes().await.map_err(|e| transfer_err(url, e))?;

        Ok(Transfer { bytes, elapsed })
    }
}
