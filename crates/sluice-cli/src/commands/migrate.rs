//! `sluice migrate` command implementation

use colored::Colorize;
use tracing::info;

use crate::commands::connect_postgres;
use crate::error::Result;

/// Create or upgrade the `source_partitions` table
pub async fn run(database_url: Option<&str>) -> Result<()> {
    let store = connect_postgres(database_url).await?;
    store.health_check().await?;

    info!("Running database migrations");
    store.migrate().await?;

    println!("{}", "Migrations applied.".green().bold());
    Ok(())
}
