//! Multi-AP controller daemon entry point

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mesh_cli::{
    cli::Cli,
    config::{load_configuration, render_configuration},
    Daemon,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_configuration(cli.config.as_deref())?;
    if cli.print_config {
        println!("{}", render_configuration(&config)?);
        return Ok(());
    }

    let daemon = Daemon::bind(config, cli.bridge_mac, cli.listen, cli.broker).await?;
    daemon
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("controller exited");
    Ok(())
}

/// `RUST_LOG` wins over the verbosity flag
fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
