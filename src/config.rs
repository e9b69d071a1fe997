use crate::error::{Result, SpeedtestError};
use crate::types::AlgoType;
use directories::ProjectDirs;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_12_0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/55.0.2883.21 Safari/537.36";

/// Measurement settings, read-only for the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedtestConfig {
    pub config_url: String,
    pub servers_url: String,
    pub algo: AlgoType,
    /// How many responsive servers enter the latency race
    pub num_closest: usize,
    pub num_latency_samples: usize,
    pub blacklist: HashSet<String>,
    /// Skip discovery and always measure against this server id
    pub server_id: Option<String>,
    /// Source IP or interface name
    pub interface: Option<String>,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Image edge lengths in pixels
    pub download_sizes: Vec<u32>,
    /// Payload sizes in bytes
    pub upload_sizes: Vec<usize>,
}

impl Default for SpeedtestConfig {
    fn default() -> Self {
        Self {
            config_url: "http://c.speedtest.net/speedtest-config.php".to_string(),
            servers_url: "http://c.speedtest.net/speedtest-servers-static.php".to_string(),
            algo: AlgoType::Avg,
            num_closest: 3,
            num_latency_samples: 5,
            blacklist: HashSet::new(),
            server_id: None,
            interface: None,
            timeout_secs: 120,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            download_sizes: vec![350, 500, 750, 1000, 1500, 2000],
            upload_sizes: vec![256 * 1024, 512 * 1024, 1024 * 1024],
        }
    }
}

impl SpeedtestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// InfluxDB (v1 write API) connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    pub url: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            database: "speedtest".to_string(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub speedtest: SpeedtestConfig,
    pub influx: InfluxConfig,
    /// Seconds between the start of two runs
    pub interval_secs: u64,
    pub log_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            speedtest: SpeedtestConfig::default(),
            influx: InfluxConfig::default(),
            interval_secs: 3600,
            log_file: None,
        }
    }
}

/// ~/.config/speedflux/config.toml (or the platform equivalent)
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "speedflux").map(|dirs| dirs.config_dir().join("config.toml"))
}

impl AppConfig {
    /// Load order:
    /// 1. `path`, when given (must exist)
    /// 2. the per-user config file, when present
    /// 3. built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path().filter(|p| p.exists()),
        };

        match path {
            Some(p) => {
                let content = fs::read_to_string(&p)?;
                let config: AppConfig = toml::from_str(&content)?;
                info!("Loaded config from {:?}", p);
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let st = &self.speedtest;
        if st.num_closest == 0 {
            return Err(SpeedtestError::Config("num_closest must be at least 1".to_string()));
        }
        if st.num_latency_samples == 0 {
            return Err(SpeedtestError::Config(
                "num_latency_samples must be at least 1".to_string(),
            ));
        }
        if st.download_sizes.is_empty() || st.upload_sizes.is_empty() {
            return Err(SpeedtestError::Config(
                "download_sizes and upload_sizes must not be empty".to_string(),
            ));
        }
        if st.timeout_secs == 0 {
            return Err(SpeedtestError::Config("timeout_secs must be at least 1".to_string()));
        }
        if self.interval_secs == 0 {
            return Err(SpeedtestError::Config("interval_secs must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() -> Result<()> {
        let config = AppConfig::default();
        config.validate()?;
        assert_eq!(config.speedtest.algo, AlgoType::Avg);
        assert_eq!(config.speedtest.upload_sizes, vec![262_144, 524_288, 1_048_576]);
        assert_eq!(config.speedtest.timeout(), Duration::from_secs(120));
        Ok(())
    }

    #[test]
    fn test_load_partial_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
interval_secs = 900

[speedtest]
algo = "max"
num_closest = 5
blacklist = ["1234", "5678"]
interface = "eth0"

[influx]
url = "http://influx.local:8086"
username = "speedflux"
"#,
        )?;

        let config = AppConfig::load(Some(&path))?;
        config.validate()?;

        assert_eq!(config.interval_secs, 900);
        assert_eq!(config.speedtest.algo, AlgoType::Max);
        assert_eq!(config.speedtest.num_closest, 5);
        assert!(config.speedtest.blacklist.contains("5678"));
        assert_eq!(config.speedtest.interface.as_deref(), Some("eth0"));
        // untouched keys keep their defaults
        assert_eq!(config.speedtest.num_latency_samples, 5);
        assert_eq!(config.influx.database, "speedtest");
        assert_eq!(config.influx.username.as_deref(), Some("speedflux"));
        assert!(config.influx.password.is_none());
        Ok(())
    }

    #[test]
    fn test_unknown_algo_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(&path, "[speedtest]\nalgo = \"median\"\n")?;

        let err = AppConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, SpeedtestError::TomlDe(_)));
        Ok(())
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/speedflux.toml"))).unwrap_err();
        assert!(matches!(err, SpeedtestError::Io(_)));
    }

    #[test]
    fn test_validate() {
        let mut config = AppConfig::default();
        config.speedtest.num_closest = 0;
        assert!(matches!(config.validate(), Err(SpeedtestError::Config(_))));

        let mut config = AppConfig::default();
        config.speedtest.upload_sizes.clear();
        assert!(matches!(config.validate(), Err(SpeedtestError::Config(_))));

        let mut config = AppConfig::default();
        config.speedtest.num_latency_samples = 0;
        assert!(matches!(config.validate(), Err(SpeedtestError::Config(_))));
    }
}
