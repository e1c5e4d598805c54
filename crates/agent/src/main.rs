mod cgroup;
mod collector;
mod config;
mod namemap;
mod transport;

use std::time::Duration;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::collector::Collector;
use crate::config::AgentConfig;
use crate::namemap::{KubeNameMapper, NullNameMapper};
use crate::transport::Transport;

/// The pod name map is refreshed on the first cycle and every 16th after.
const NAME_REFRESH_CYCLES: u64 = 16;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<String>,
    /// Root of the cgroup filesystem
    #[arg(long)]
    root: Option<String>,
    /// Relay ingestion endpoint
    #[arg(long)]
    endpoint: Option<String>,
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args = Args::parse();

    let config = AgentConfig::load(args.config.as_deref(), args.root, args.endpoint)?;
    let transport = Transport::new(&config.endpoint)?;

    let kube_mapper = match KubeNameMapper::from_cluster_env() {
        Ok(mapper) => Some(mapper),
        Err(e) => {
            warn!(error = %e, "no in-cluster Kubernetes API, pod names stay unresolved");
            None
        }
    };

    let mut collector = Collector::new(&config.root);
    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs));
    let mut cycle: u64 = 0;

    info!(
        root = %config.root,
        endpoint = %config.endpoint,
        interval_secs = config.interval_secs,
        "agent started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }

        if let Some(mapper) = &kube_mapper {
            if cycle % NAME_REFRESH_CYCLES == 0 {
                mapper.refresh().await;
            }
        }
        cycle += 1;

        match &kube_mapper {
            Some(mapper) => collector.refresh(mapper),
            None => collector.refresh(&NullNameMapper),
        }

        let snapshot = collector.snapshot();
        match transport.send(&snapshot).await {
            Ok(()) => debug!(pods = snapshot.len(), "pushed snapshot"),
            Err(e) => warn!(error = %e, "failed to push snapshot"),
        }
    }
}
