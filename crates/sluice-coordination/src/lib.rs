//! Sluice Coordination
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Lease-based assignment of source partitions across a fleet of processes
//! that share one partition store.
//!
//! - **Records**: [`PartitionRecord`] with a versioned status lifecycle
//! - **Stores**: [`PartitionStore`] with in-memory and PostgreSQL backends
//! - **Protocol**: [`LeaseProtocol`] decides, per key and pass, whether to
//!   create, acquire, renew or relinquish
//! - **Facade**: [`SourceCoordinator`], the API a data source calls
//! - **Driver**: [`PollLoop`] runs passes on an interval
//!
//! Every process reaches the same conclusions from the store alone; there is
//! no leader and no direct communication between processes.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod lease;
pub mod manager;
pub mod partition;
pub mod poller;
pub mod stats;
pub mod store;

pub use client::{RetryPolicy, StoreClient};
pub use config::{AdmissionConfig, CoordinatorConfig, RetryConfig};
pub use coordinator::{PassSummary, SourceCoordinator};
pub use error::{CoordinationError, Result, StoreError, StoreResult};
pub use gate::{AdmissionGate, AdmissionMode, MAX_SHARE};
pub use lease::{LeaseOutcome, LeaseProtocol, SkipReason};
pub use manager::PartitionManager;
pub use partition::{Eligibility, PartitionRecord, PartitionStatus, SourcePartition};
pub use poller::{PartitionSupplier, PollLoop, StaticSupplier, MIN_POLL_INTERVAL};
pub use stats::{CoordinatorStats, Counter, StatsSnapshot};
pub use store::{DbConfig, InMemoryPartitionStore, PartitionStore, PgPartitionStore};
