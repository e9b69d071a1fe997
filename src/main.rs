mod catalog;
mod config;
mod error;
mod geo;
mod http;
mod logs;
mod orchestrator;
mod sampler;
mod selector;
mod sink;
mod traits;
mod types;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::AppConfig;
use http::ReqwestTransport;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use orchestrator::Speedtest;
use sink::InfluxSink;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use traits::MetricsSink;
use types::AlgoType;

#[derive(Parser)]
#[command(name = "speedflux")]
#[command(about = "Speedtest -> InfluxDB ingestion daemon", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/speedflux/config.toml if present)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Also log to this file (rotated at 10 MB)
    #[arg(long, global = true)]
    log_file: Option<String>,

    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure periodically and write results to InfluxDB
    Run {
        #[command(flatten)]
        overrides: Overrides,

        /// Seconds between runs
        #[arg(long)]
        interval: Option<u64>,

        /// Run a single measurement and exit
        #[arg(long)]
        once: bool,

        /// With --once: print the result as JSON instead of writing it
        #[arg(long, requires = "once")]
        json: bool,
    },
    /// List the closest servers (e.g. to pick --server or --blacklist ids)
    Servers {
        #[command(flatten)]
        overrides: Overrides,

        /// How many servers to show
        #[arg(long, short, default_value_t = 10)]
        limit: usize,
    },
}

/// Command line values that win over the config file
#[derive(Args, Default)]
struct Overrides {
    /// Use a specific server id
    #[arg(long, short)]
    server: Option<String>,

    /// Blacklist a server id. Use this multiple times for more than one server
    #[arg(long, short)]
    blacklist: Vec<String>,

    /// User agent for every request
    #[arg(long)]
    user_agent: Option<String>,

    /// Number of responsive 'closest' servers to race
    #[arg(long)]
    num_closest: Option<usize>,

    /// Number of latency samples per server
    #[arg(long)]
    num_latency: Option<usize>,

    /// Source IP address or name of an interface
    #[arg(long, short = 'I')]
    interface: Option<String>,

    /// Sample aggregation
    #[arg(long, value_enum)]
    algo: Option<AlgoType>,

    #[arg(long)]
    influx_url: Option<String>,

    #[arg(long)]
    influx_username: Option<String>,

    #[arg(long)]
    influx_password: Option<String>,

    #[arg(long)]
    influx_db: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut AppConfig) {
        let st = &mut config.speedtest;
        if self.server.is_some() {
            st.server_id = self.server;
        }
        st.blacklist.extend(self.blacklist);
        if let Some(ua) = self.user_agent {
            st.user_agent = ua;
        }
        if let Some(n) = self.num_closest {
            st.num_closest = n;
        }
        if let Some(n) = self.num_latency {
            st.num_latency_samples = n;
        }
        if self.interface.is_some() {
            st.interface = self.interface;
        }
        if let Some(algo) = self.algo {
            st.algo = algo;
        }

        let influx = &mut config.influx;
        if let Some(url) = self.influx_url {
            influx.url = url;
        }
        if self.influx_username.is_some() {
            influx.username = self.influx_username;
        }
        if self.influx_password.is_some() {
            influx.password = self.influx_password;
        }
        if let Some(db) = self.influx_db {
            influx.database = db;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if cli.log_file.is_some() {
        config.log_file = cli.log_file;
    }
    logs::configure_logs(config.log_file.as_deref(), cli.verbose)?;

    match cli.command {
        Commands::Run {
            overrides,
            interval,
            once,
            json,
        } => {
            overrides.apply(&mut config);
            if let Some(secs) = interval {
                config.interval_secs = secs;
            }
            config.validate()?;
            handle_run(&config, once, json).await?
        }
        Commands::Servers { overrides, limit } => {
            overrides.apply(&mut config);
            config.validate()?;
            handle_servers(&config, limit).await?
        }
    }

    Ok(())
}

// --- Handlers ---

/// A fresh transport per run, so a changed interface address is picked up.
fn new_speedtest(config: &AppConfig) -> Result<Speedtest<ReqwestTransport>> {
    let st = &config.speedtest;
    let transport =
        ReqwestTransport::new(st.timeout(), &st.user_agent, st.interface.as_deref())?;
    Ok(Speedtest::new(transport, st.clone()))
}

/// One measurement; complete results go to the sink, anything else is logged.
async fn run_once(config: &AppConfig, sink: &dyn MetricsSink) {
    let speedtest = match new_speedtest(config) {
        Ok(s) => s,
        Err(e) => {
            error!("error setting up speedtest: {:#}", e);
            return;
        }
    };

    let result = match speedtest.run().await {
        Ok(res) => res,
        Err(e) => {
            error!("error running speedtest: {}", e);
            if let Some(latency) = e.partial.latency_ms {
                warn!(
                    "partial result for server '{}' (ping {:.2}ms) not written",
                    e.partial.server.id, latency
                );
            }
            return;
        }
    };

    if !result.is_complete() {
        warn!("speedtest results have no values, skipping writing to {}", sink.name());
        return;
    }

    match sink.write(&result).await {
        Ok(()) => info!(
            "wrote speedtest results {{server: {}, ping: {:.2}ms, download: {:.2}Mbps, upload: {:.2}Mbps}} to {}",
            result.server.name,
            result.latency_ms.unwrap_or_default(),
            result.download_mbps.unwrap_or_default(),
            result.upload_mbps.unwrap_or_default(),
            sink.name()
        ),
        Err(e) => error!("error writing to {}: {}", sink.name(), e),
    }
}

async fn handle_run(config: &AppConfig, once: bool, json: bool) -> Result<()> {
    if json {
        let res = new_speedtest(config)?.run().await?;
        println!("{}", serde_json::to_string_pretty(&res)?);
        return Ok(());
    }

    let sink = InfluxSink::new(config.influx.clone())?;

    if once {
        run_once(config, &sink).await;
        return Ok(());
    }

    info!("measuring every {}s", config.interval_secs);
    // Runs are awaited inside the loop, so two never overlap.
    // A run longer than the interval pushes the next tick back.
    let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = async {
                ticker.tick().await;
                run_once(config, &sink).await
            } => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, cancelling the current run");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_servers(config: &AppConfig, limit: usize) -> Result<()> {
    let st = &config.speedtest;
    let transport = ReqwestTransport::new(st.timeout(), &st.user_agent, st.interface.as_deref())?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));

    pb.set_message("Fetching client config...");
    let operator = catalog::fetch_operator_location(&transport, &st.config_url)
        .await
        .context("couldn't retrieve our config from speedtest.net")?;

    pb.set_message("Fetching server list...");
    let servers = catalog::fetch_servers(&transport, &st.servers_url, &st.blacklist).await?;
    pb.finish_and_clear();

    let ranked = selector::rank_by_distance(servers, operator.location);

    println!(
        "Client: {} ({}) at {:.4}, {:.4}",
        operator.ip, operator.isp, operator.location.lat, operator.location.lon
    );
    println!();
    println!(
        "{:<4} {:<8} {:>10} {:<30} {:<24} Country",
        "RANK", "ID", "DISTANCE", "SPONSOR", "NAME"
    );
    println!("{}", "-".repeat(90));

    for (i, server) in ranked.iter().take(limit).enumerate() {
        println!(
            "{:<4} {:<8} {:>8.1}km {:<30} {:<24} {}",
            i + 1,
            server.id,
            server.distance.unwrap_or_default(),
            truncate(&server.sponsor, 30),
            truncate(&server.name, 24),
            server.country
        );
    }
    println!("{}", "-".repeat(90));
    println!("{} servers after blacklist filtering", ranked.len());

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max - 3).collect();
    format!("{}...", cut)
}
