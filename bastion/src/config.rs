use std::path::Path;

use anyhow::{Context, Result};
use bastion_common::helpers::fs::secure_file;
use bastion_common::{BastionConfig, BastionConfigStore};
use config::{Config, Environment, File};
use tracing::*;

/// YAML file first, then `BASTION_*` variables (`BASTION_LOCKOUT__THRESHOLD=3`).
pub fn load_config(path: &Path, secure: bool) -> Result<BastionConfig> {
    if secure {
        secure_file(path).context("Could not secure config")?;
    }

    let store: BastionConfigStore = Config::builder()
        .add_source(File::from(path))
        .add_source(Environment::with_prefix("BASTION").separator("__"))
        .build()
        .context("Could not load config")?
        .try_deserialize()
        .context("Could not parse config")?;

    store.validate().context("Invalid config")?;

    let config = BastionConfig {
        store,
        paths_relative_to: path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };

    info!(
        "Using config: {path:?} (lockout threshold: {}, session ttl: {:?})",
        config.store.lockout.threshold, config.store.sessions.ttl,
    );
    Ok(config)
}
