use crate::collectors::CollectorSettings;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "infra-exporter", version, about)]
pub struct Config {
    /// Unique identifier for this exporter instance.
    /// if none provided, default to hostname.
    #[arg(long, env = "INFRA_EXPORTER_AGENT_ID")]
    pub agent_id: Option<String>,

    /// Address the HTTP endpoint listens on.
    #[arg(long, env = "INFRA_EXPORTER_LISTEN_ADDRESS", default_value = "0.0.0.0:9182")]
    pub listen_address: SocketAddr,

    /// Comma-separated list of collectors to enable.
    #[arg(
        long,
        env = "INFRA_EXPORTER_COLLECTORS",
        value_delimiter = ',',
        default_value = "cpu,memory,idle"
    )]
    pub collectors: Vec<String>,

    /// Print the available collectors and exit.
    #[arg(long, default_value_t = false)]
    pub print_collectors: bool,

    /// Per-collector time budget for one scrape, in milliseconds.
    #[arg(long, env = "INFRA_EXPORTER_SCRAPE_TIMEOUT_MS", default_value_t = 5000)]
    pub scrape_timeout_ms: u64,

    /// Seconds without process io activity before the host counts as idle.
    #[arg(long, env = "INFRA_EXPORTER_IDLE_THRESHOLD_SECS", default_value_t = 480)]
    pub idle_threshold_secs: u64,

    /// Mount point of procfs.
    #[arg(long, env = "INFRA_EXPORTER_PROCFS_ROOT", default_value = "/proc")]
    pub procfs_root: PathBuf,

    /// Enable JSON structured logging.
    #[arg(long, env = "INFRA_EXPORTER_JSON_LOGS", default_value_t = false)]
    pub json_logs: bool,
}

impl Config {
    /// get agent ID, upon failure fallback to hostname.
    pub fn resolved_agent_id(&self) -> String {
        self.agent_id.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown-agent".to_string())
        })
    }

    /// Requested collector names, trimmed, without blanks or repeats, in order.
    pub fn enabled_collectors(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in &self.collectors {
            let name = name.trim();
            if !name.is_empty() && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_millis(self.scrape_timeout_ms)
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            procfs_root: self.procfs_root.clone(),
            idle_threshold: Duration::from_secs(self.idle_threshold_secs),
        }
    }
}
