use anyhow::Result;
use bastion_core::{Services, Sweepers};
use tracing::*;

use crate::config::load_config;

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    info!(%version, "Bastion");

    let config = load_config(&cli.config, true)?;
    let services = Services::new(config).await?;
    let sweepers = Sweepers::spawn(&services);

    if console::user_attended() {
        let store = &services.config.store;
        info!("--------------------------------------------");
        info!("Bastion is now running.");
        info!("Lockout sweep every   {:?}", store.lockout.sweep_interval);
        info!("Session sweep every   {:?}", store.sessions.sweep_interval);
        info!("Token sweep every     {:?}", store.tokens.sweep_interval);
        info!("Event sweep every     {:?}", store.events.sweep_interval);
        info!("--------------------------------------------");
    }

    tokio::signal::ctrl_c().await?;

    for sweeper in sweepers {
        sweeper.abort();
    }
    info!("Exiting");
    Ok(())
}
