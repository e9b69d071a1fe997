use crate::catalog;
use crate::config::SpeedtestConfig;
use crate::error::{RunError, SpeedtestError};
use crate::sampler;
use crate::selector;
use crate::traits::Transport;
use crate::types::{MeasurementResult, Server};
use log::info;

/// One end-to-end measurement: discovery, selection, download, upload.
///
/// Holds no state between runs; the catalog is fetched again every time.
pub struct Speedtest<T: Transport> {
    transport: T,
    config: SpeedtestConfig,
}

impl<T: Transport> Speedtest<T> {
    pub fn new(transport: T, config: SpeedtestConfig) -> Self {
        Self { transport, config }
    }

    pub async fn run(&self) -> Result<MeasurementResult, RunError> {
        let mut result = MeasurementResult::default();

        let server = match self.select_server(&mut result).await {
            Ok(server) => server,
            Err(source) => return Err(RunError { partial: result, source }),
        };
        result.latency_ms = server.latency;
        result.server = server;

        let cfg = &self.config;
        match sampler::download(
            &self.transport,
            &result.server,
            &cfg.download_sizes,
            cfg.algo,
        )
        .await
        {
            Ok(mbps) => result.download_mbps = Some(mbps),
            Err(source) => return Err(RunError { partial: result, source }),
        }

        match sampler::upload(&self.transport, &result.server, &cfg.upload_sizes, cfg.algo).await
        {
            Ok(mbps) => result.upload_mbps = Some(mbps),
            Err(source) => return Err(RunError { partial: result, source }),
        }

        info!(
            "server {}: ping {:.2}ms, download {:.2}Mbps, upload {:.2}Mbps",
            result.server.name,
            result.latency_ms.unwrap_or_default(),
            result.download_mbps.unwrap_or_default(),
            result.upload_mbps.unwrap_or_default()
        );
        Ok(result)
    }

    /// Picks the server to measure against, with its latency filled in.
    /// On failure `partial` receives whatever server was already chosen.
    async fn select_server(
        &self,
        partial: &mut MeasurementResult,
    ) -> Result<Server, SpeedtestError> {
        let cfg = &self.config;

        if let Some(id) = cfg.server_id.as_deref() {
            // Explicit server: no ranking, no race, a single latency probe
            let servers =
                catalog::fetch_servers(&self.transport, &cfg.servers_url, &cfg.blacklist).await?;
            let mut server = selector::select_by_id(id, &servers);
            partial.server = server.clone();

            let latency = selector::probe_latency(
                &self.transport,
                &server,
                cfg.num_latency_samples,
                cfg.algo,
            )
            .await?;
            if latency >= selector::penalty_ms() {
                partial.latency_ms = Some(latency);
                let url = selector::latency_url(&server)?;
                return Err(SpeedtestError::Fetch {
                    url: url.to_string(),
                    reason: format!("server {} did not answer latency probes", id),
                });
            }
            server.latency = Some(latency);
            return Ok(server);
        }

        let operator = catalog::fetch_operator_location(&self.transport, &cfg.config_url).await?;
        let servers =
            catalog::fetch_servers(&self.transport, &cfg.servers_url, &cfg.blacklist).await?;
        let ranked = selector::rank_by_distance(servers, operator.location);

        selector::race_latency(
            &self.transport,
            ranked,
            cfg.num_closest,
            cfg.num_latency_samples,
            cfg.algo,
        )
        .await
    }
}
