use crate::config::{DeclaredConfig, FleetConfig};
use crate::error::{Error, Result};

/// Longest accepted instance name.
pub const MAX_NAME_LEN: usize = 64;

/// Validates an instance name.
pub fn validate_instance_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::ConfigInvalid("Instance name is empty".to_string()));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(Error::ConfigInvalid(format!(
            "Instance name is longer than {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

/// Validates a version string before it is placed in a catalog URL.
pub fn validate_version(version: &str) -> Result<()> {
    let trimmed = version.trim();
    if trimmed.is_empty() {
        return Err(Error::ConfigInvalid("Version must not be empty".to_string()));
    }
    if trimmed.contains(['/', '\\', '?', '#']) || trimmed.chars().any(char::is_whitespace) {
        return Err(Error::ConfigInvalid(format!(
            "Version '{}' contains invalid characters",
            trimmed
        )));
    }
    Ok(())
}

/// Validates the declared configuration of an instance
pub fn validate_declared_config(config: &DeclaredConfig) -> Result<()> {
    if config.memory_min_mb == 0 || config.memory_max_mb == 0 {
        return Err(Error::ConfigInvalid(
            "Memory bounds must be positive".to_string(),
        ));
    }
    if config.memory_min_mb > config.memory_max_mb {
        return Err(Error::ConfigInvalid(format!(
            "Minimum memory ({} MB) exceeds maximum memory ({} MB)",
            config.memory_min_mb, config.memory_max_mb
        )));
    }
    if config.port == 0 {
        return Err(Error::ConfigInvalid("Port must not be 0".to_string()));
    }
    if config.enable_query && config.query_port == 0 {
        return Err(Error::ConfigInvalid("Query port must not be 0".to_string()));
    }
    if config.max_players == 0 {
        return Err(Error::ConfigInvalid(
            "Max players must be at least 1".to_string(),
        ));
    }
    if config.world_name.trim().is_empty() {
        return Err(Error::ConfigInvalid("World name is empty".to_string()));
    }

    Ok(())
}

/// Full fleet configuration validation
pub fn validate_fleet_config(config: &FleetConfig) -> Result<()> {
    if config.http_timeout_secs == 0 {
        return Err(Error::ConfigInvalid("HTTP timeout must not be 0".to_string()));
    }
    if config.stop_timeout_secs == 0 {
        return Err(Error::ConfigInvalid("Stop timeout must not be 0".to_string()));
    }
    if config.sample_interval_ms == 0 {
        return Err(Error::ConfigInvalid(
            "Sample interval must not be 0".to_string(),
        ));
    }

    Ok(())
}
