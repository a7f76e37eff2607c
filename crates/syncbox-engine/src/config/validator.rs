//! Semantic validation for resolved run configurations.

use syncbox_types::{ResourceLimits, Role, RunConfig, RunMode};

use crate::error::{Result, SyncError};

fn validate_limits(limits: &ResourceLimits, role: Role, errors: &mut Vec<String>) {
    if let Some(cpus) = limits.max_cpus {
        if !cpus.is_finite() || cpus <= 0.0 {
            errors.push(format!("{role}: max_cpus must be a positive number, got {cpus}"));
        }
    }
    if limits.max_memory_mb == Some(0) {
        errors.push(format!("{role}: max_memory_mb must be > 0"));
    }
    if limits.max_log_size_bytes == 0 {
        errors.push(format!("{role}: max_log_size must be > 0"));
    }
}

/// Validate a resolved run configuration.
///
/// Every problem is collected so the operator sees them all at once.
///
/// # Errors
///
/// Returns [`SyncError::ConfigInvalid`] listing every violation.
pub fn validate_run_config(config: &RunConfig) -> Result<()> {
    let mut errors = Vec::new();

    for role in config.active_roles() {
        let spec = config.connector(role);
        if spec.image.trim().is_empty() {
            errors.push(format!(
                "{role} image is required (use --{} or the '{}.image' key of the run file)",
                role.short(),
                role.short()
            ));
        }
        if !spec.config.is_object() {
            errors.push(format!("{role} config must be a JSON object"));
        }
        if !spec.catalog_or_empty().is_object() {
            errors.push(format!("{role} catalog must be a JSON object"));
        }
        validate_limits(&spec.resource_limits, role, &mut errors);
    }

    if let RunMode::DestinationOnly { input } = &config.mode {
        if !input.is_file() {
            errors.push(format!(
                "destination-only input file '{}' does not exist",
                input.display()
            ));
        }
    }

    if config.state_file.as_os_str().is_empty() {
        errors.push("state file path must not be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SyncError::ConfigInvalid(format!(
            "run configuration failed validation:\n  - {}",
            errors.join("\n  - ")
        )))
    }
}
