//! Aggregator proxy.
//!
//! A Kubernetes aggregated-API backend that forwards connect requests to
//! in-cluster services over mutual TLS.
//!
//! # Architecture Overview
//!
//! ```text
//!   ConfigMaps + Secrets (API server)
//!        │ watch
//!        ▼
//!   ┌────────────┐   upsert/remove   ┌──────────┐
//!   │ controller │ ────────────────▶ │ registry │
//!   └────────────┘                   └────┬─────┘
//!                                         │ lookup
//!   Client ──▶ http server ──▶ dispatcher ┘ ──▶ mTLS transport ──▶ Backend service
//!                                  │
//!                                  └── 101 ──▶ upgrade tunnel
//! ```

use clap::Parser;
use std::path::PathBuf;

use aggregator_proxy::config::{load_config, AggregatorConfig};
use aggregator_proxy::lifecycle;

#[derive(Parser, Debug)]
#[command(name = "aggregator-proxy", version, about)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Kubeconfig to use instead of the in-cluster configuration.
    #[arg(long)]
    kube_config_file: Option<String>,

    /// Overrides `listener.bind_address`.
    #[arg(long)]
    bind_address: Option<String>,

    /// Overrides `observability.log_level`.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, mut config: AggregatorConfig) -> AggregatorConfig {
        if let Some(path) = self.kube_config_file {
            config.kubernetes.kubeconfig = Some(path);
        }
        if let Some(addr) = self.bind_address {
            config.listener.bind_address = addr;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AggregatorConfig::default(),
    };
    let config = cli.apply(config);
    if let Err(errors) = aggregator_proxy::config::validate_config(&config) {
        let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
        return Err(format!("invalid configuration: {}", joined.join(", ")).into());
    }

    lifecycle::run(config).await?;
    Ok(())
}
