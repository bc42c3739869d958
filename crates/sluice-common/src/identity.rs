//! Process identity helpers
//!
//! Coordinators identify themselves in the partition store with an owner id
//! of the form `{scoped_source}:{hostname}`. Partition records of one source
//! live under the namespace `{scoped_source}|PARTITION`, where the scoped
//! source is `{prefix}|{source_identifier}` when a prefix is configured.

use crate::error::{Result, SluiceError};

/// Separator between prefix, source identifier and record type
pub const NAMESPACE_SEPARATOR: char = '|';

/// Record type suffix of partition namespaces
pub const PARTITION_RECORD_TYPE: &str = "PARTITION";

/// Longest identity accepted by [`validate_identity`]
pub const MAX_IDENTITY_LEN: usize = 256;

/// Hostname of this machine, or `"unknown"` when it cannot be resolved
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .map(|name| name.to_string_lossy().trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Validate an identity string used as an owner id.
///
/// Identities must be non-empty, at most [`MAX_IDENTITY_LEN`] bytes and free of
/// whitespace and control characters.
pub fn validate_identity(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(SluiceError::identity(value, "must not be empty"));
    }
    if value.len() > MAX_IDENTITY_LEN {
        return Err(SluiceError::identity(
            value,
            format!("must be at most {} bytes", MAX_IDENTITY_LEN),
        ));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(SluiceError::identity(
            value,
            "must not contain whitespace or control characters",
        ));
    }
    Ok(())
}

/// Validate one component of a namespace (a prefix or a source identifier).
pub fn validate_component(value: &str) -> Result<()> {
    validate_identity(value)?;
    if value.contains(NAMESPACE_SEPARATOR) {
        return Err(SluiceError::identity(
            value,
            format!("must not contain '{}'", NAMESPACE_SEPARATOR),
        ));
    }
    Ok(())
}

/// Combine an optional prefix with a source identifier.
pub fn scoped_source(prefix: Option<&str>, source_identifier: &str) -> Result<String> {
    validate_component(source_identifier)?;
    match prefix {
        Some(prefix) => {
            validate_component(prefix)?;
            Ok(format!("{}{}{}", prefix, NAMESPACE_SEPARATOR, source_identifier))
        }
        None => Ok(source_identifier.to_string()),
    }
}

/// Namespace under which the partition records of a scoped source are stored
pub fn partition_namespace(scoped_source: &str) -> String {
    format!(
        "{}{}{}",
        scoped_source, NAMESPACE_SEPARATOR, PARTITION_RECORD_TYPE
    )
}

/// Build the default owner id for a scoped source running on `hostname`.
pub fn owner_id(scoped_source: &str, hostname: &str) -> Result<String> {
    let owner = format!("{}:{}", scoped_source, hostname);
    validate_identity(&owner)?;
    Ok(owner)
}
