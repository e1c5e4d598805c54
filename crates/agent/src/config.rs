use serde::Deserialize;
use std::error::Error;
use tracing::info;

const DEFAULT_ROOT: &str = "/sys/fs/cgroup";
const DEFAULT_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Root of the cgroup pseudo-filesystem.
    pub root: String,
    /// Relay ingestion endpoint, e.g. `http://relay:8080/stats`.
    pub endpoint: String,
    /// Sampling cadence in seconds.
    pub interval_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    root: Option<String>,
    endpoint: Option<String>,
    interval_secs: Option<u64>,
}

impl AgentConfig {
    /// Resolves the effective config: CLI flags win over the TOML file,
    /// which wins over the `DRAIN_ENDPOINT` environment variable and the
    /// built-in defaults.
    pub fn load(
        config_path: Option<&str>,
        root_flag: Option<String>,
        endpoint_flag: Option<String>,
    ) -> Result<Self, Box<dyn Error>> {
        let file = match config_path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| format!("failed to read config file {path}: {e}"))?;
                toml::from_str::<FileConfig>(&contents)
                    .map_err(|e| format!("failed to parse config file {path}: {e}"))?
            }
            None => FileConfig::default(),
        };

        let endpoint = endpoint_flag
            .or(file.endpoint)
            .or_else(|| std::env::var("DRAIN_ENDPOINT").ok())
            .ok_or("no drain endpoint configured (flag, config file or DRAIN_ENDPOINT)")?;

        let config = AgentConfig {
            root: root_flag
                .or(file.root)
                .unwrap_or_else(|| DEFAULT_ROOT.to_string()),
            endpoint,
            interval_secs: file.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS),
        };
        info!(?config, "loaded agent config");
        Ok(config)
    }
}
