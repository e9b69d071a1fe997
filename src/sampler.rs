use crate::error::{Result, SpeedtestError};
use crate::selector::sibling_url;
use crate::traits::{Transfer, Transport};
use crate::types::{AlgoType, Server};
use log::debug;
use rand::RngCore;

/// Content type the upload endpoint expects
pub const UPLOAD_CONTENT_TYPE: &str = "text/xml";

/// Decimal megabits per second: `bytes * 8 / 1e6 / seconds`.
pub fn megabits_per_second(transfer: &Transfer) -> Option<f64> {
    let seconds = transfer.elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return None;
    }
    Some((transfer.bytes * 8) as f64 / 1_000_000.0 / seconds)
}

/// `random{s}x{s}.jpg` next to the server endpoint
pub fn download_url(server: &Server, size: u32) -> Result<String> {
    let file = format!("random{}x{}.jpg", size, size);
    Ok(sibling_url(server, &file)?.to_string())
}

fn random_payload(len: usize) -> Vec<u8> {
    let mut payload = vec![0u8; len];
    rand::rng().fill_bytes(&mut payload);
    payload
}

fn speed_of(url: &str, transfer: &Transfer) -> Result<f64> {
    megabits_per_second(transfer).ok_or_else(|| SpeedtestError::Transfer {
        url: url.to_string(),
        reason: "transfer completed in zero time".to_string(),
    })
}

fn aggregate(url: &str, samples: &[f64], algo: AlgoType) -> Result<f64> {
    algo.aggregate(samples).ok_or_else(|| SpeedtestError::Transfer {
        url: url.to_string(),
        reason: "no sample sizes configured".to_string(),
    })
}

/// Download throughput in Mbps over one transfer per configured size.
/// Any failed sample fails the whole measurement.
pub async fn download<T: Transport + ?Sized>(
    transport: &T,
    server: &Server,
    sizes: &[u32],
    algo: AlgoType,
) -> Result<f64> {
    let mut speeds = Vec::with_capacity(sizes.len());
    for &size in sizes {
        let url = download_url(server, size)?;
        let transfer = transport.download(&url).await?;
        let mbps = speed_of(&url, &transfer)?;
        debug!(
            "download {}x{}: {} bytes in {:?} = {:.2}Mbps",
            size, size, transfer.bytes, transfer.elapsed, mbps
        );
        speeds.push(mbps);
    }
    aggregate(&server.url, &speeds, algo)
}

/// Upload throughput in Mbps, one POST of random bytes per configured size.
/// Speed is computed from the payload size, not the response.
pub async fn upload<T: Transport + ?Sized>(
    transport: &T,
    server: &Server,
    sizes: &[usize],
    algo: AlgoType,
) -> Result<f64> {
    let mut speeds = Vec::with_capacity(sizes.len());
    for &size in sizes {
        let transfer = transport
            .upload(&server.url, UPLOAD_CONTENT_TYPE, random_payload(size))
            .await?;
        let mbps = speed_of(&server.url, &transfer)?;
        debug!(
            "upload {} bytes in {:?} = {:.2}Mbps",
            transfer.bytes, transfer.elapsed, mbps
        );
        speeds.push(mbps);
    }
    aggregate(&server.url, &speeds, algo)
}
