use clap::Parser;
use infra_exporter::config::Config;
use infra_exporter::dispatcher::Dispatcher;
use infra_exporter::exporter::Exporter;
use infra_exporter::logging;
use infra_exporter::registry::Registry;
use infra_exporter::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    let registry = Registry::builtin()?;

    if config.print_collectors {
        for name in registry.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    logging::init(config.json_logs)?;

    let agent_id = config.resolved_agent_id();
    let enabled = config.enabled_collectors();
    tracing::info!(
        agent_id = %agent_id,
        available = ?registry.names(),
        enabled = ?enabled,
        "starting infra-exporter"
    );

    // unknown names, factory failures and invalid metric names are configuration errors: refuse to start
    let collectors = registry.instantiate(&enabled, &config.collector_settings())?;
    let dispatcher = Dispatcher::new(collectors, config.scrape_timeout());
    let exporter = Exporter::new(dispatcher, config.procfs_root.clone());

    server::serve(config.listen_address, AppState::new(exporter, agent_id)).await?;
    tracing::info!("Bye!");
    Ok(())
}
