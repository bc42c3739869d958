//! Sluice Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging and process identity for the Sluice
//! workspace.
//!
//! - **Error Handling**: [`SluiceError`] and the [`Result`] alias
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`]
//! - **Identity**: hostname lookup and identity validation used to build
//!   coordinator owner ids
//!
//! # Example
//!
//! ```no_run
//! use sluice_common::identity;
//!
//! fn main() -> sluice_common::Result<()> {
//!     let owner = identity::owner_id("orders", &identity::local_hostname())?;
//!     println!("running as {}", owner);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod identity;
pub mod logging;

pub use error::{Result, SluiceError};
