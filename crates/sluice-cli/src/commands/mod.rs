//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod inspect;
pub mod migrate;
pub mod simulate;

use std::path::Path;

use sluice_coordination::{CoordinatorConfig, DbConfig, PgPartitionStore};

use crate::error::Result;

/// Connect to PostgreSQL from an explicit URL or the `DATABASE_URL`/`DB_*` environment
pub(crate) async fn connect_postgres(database_url: Option<&str>) -> Result<PgPartitionStore> {
    let config = match database_url {
        Some(url) => DbConfig::with_url(url),
        None => DbConfig::from_env()?,
    };
    config.validate()?;
    Ok(PgPartitionStore::connect(&config).await?)
}

/// Coordinator config from `--config`, or defaults for `source`
pub(crate) fn coordinator_config(
    config_path: Option<&Path>,
    source: Option<&str>,
) -> Result<CoordinatorConfig> {
    let mut config = match config_path {
        Some(path) => CoordinatorConfig::load(Some(path))?,
        None => CoordinatorConfig::default(),
    };
    if let Some(source) = source {
        config.source_identifier = source.to_string();
    }
    Ok(config)
}
