use std::path::Path;

use tracing::{debug, info};

use super::AppConfig;
use crate::error::{CaptureError, Result};

/// Load configuration from a TOML file.
///
/// A missing file yields the defaults; anything unreadable or invalid is an
/// error.
pub fn load(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        info!("Config file {} not found, using defaults", path.display());
        return Ok(AppConfig::default());
    }
    let text = std::fs::read_to_string(path)?;
    let config = parse(&text)?;
    debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Parse and validate configuration text
pub fn parse(text: &str) -> Result<AppConfig> {
    let config: AppConfig =
        toml::from_str(text).map_err(|e| CaptureError::Config(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

/// Write configuration as TOML
pub fn save(path: &Path, config: &AppConfig) -> Result<()> {
    validate(config)?;
    let text = toml::to_string_pretty(config).map_err(|e| CaptureError::Config(e.to_string()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    Ok(())
}

pub fn validate(config: &AppConfig) -> Result<()> {
    let capture = &config.capture;
    if capture.buffer_count == 0 {
        return Err(CaptureError::Config(
            "capture.buffer_count must be greater than zero".to_string(),
        ));
    }
    if capture.timeout_ms == 0 {
        return Err(CaptureError::Config(
            "capture.timeout_ms must be greater than zero".to_string(),
        ));
    }
    if capture.frame_limit == Some(0) {
        return Err(CaptureError::Config(
            "capture.frame_limit must be greater than zero when set".to_string(),
        ));
    }

    let sim = &config.simulation;
    if sim.width == 0 || sim.height == 0 {
        return Err(CaptureError::Config(format!(
            "simulation resolution {}x{} is empty",
            sim.width, sim.height
        )));
    }
    if let Some(alignment) = sim.alignment {
        if !alignment.is_power_of_two() {
            return Err(CaptureError::Config(format!(
                "simulation.alignment {} is not a power of two",
                alignment
            )));
        }
    }
    Ok(())
}
