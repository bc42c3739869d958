//! Shared helpers for sluice-coordination integration tests
//!
//! [`TestPostgres`] starts a throwaway PostgreSQL container with the
//! `source_partitions` migration applied. Tests using it need Docker and are
//! marked `#[ignore]`.

#![allow(dead_code)]

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

use sluice_coordination::{
    AdmissionMode, CoordinatorConfig, PartitionStore, PgPartitionStore, SourceCoordinator,
};

pub const SOURCE: &str = "orders";
pub const NAMESPACE: &str = "orders|PARTITION";

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        PgPartitionStore::new(pool.clone())
            .migrate()
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn store(&self) -> Arc<PgPartitionStore> {
        Arc::new(PgPartitionStore::new(self.pool.clone()))
    }
}

// ============================================================================
// Coordinator helpers
// ============================================================================

/// Config for a node that takes every eligible partition
pub fn greedy_config(owner: &str) -> CoordinatorConfig {
    CoordinatorConfig::new(SOURCE)
        .with_owner_id(owner)
        .with_admission_mode(AdmissionMode::Disabled)
}

pub fn coordinator(owner: &str, store: Arc<dyn PartitionStore>) -> SourceCoordinator {
    SourceCoordinator::new(greedy_config(owner), store).expect("valid test config")
}
