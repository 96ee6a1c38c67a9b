//! Configuration management for crabscan
//!
//! Provides loading, saving and validation of the scanner settings: camera
//! acquisition hints, decoder engine cadences, the result gate cooldown and
//! session supervision.

use crate::engine::snapshot::EnhancePreset;
use crate::errors::ScanError;
use crate::types::{EngineKind, FacingMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    pub camera: CameraConfig,
    pub engines: EngineConfig,
    pub gate: GateConfig,
    pub session: SessionConfig,
}

/// Camera acquisition hints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Facing mode the acquisition tiers aim for
    pub preferred_facing: FacingMode,
    /// Ideal resolution for the facing tiers [width, height]
    pub ideal_resolution: [u32; 2],
    /// Minimum resolution demanded by the exact tier [width, height]
    pub min_resolution: [u32; 2],
    /// Ideal resolution for the any-camera tier [width, height]
    pub fallback_resolution: [u32; 2],
}

/// Decoder engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engines in priority order; kinds left out are not built
    pub order: Vec<EngineKind>,
    /// Polling cadence of the native engine in milliseconds
    pub native_cadence_ms: u64,
    /// Polling cadence of the general-purpose engine in milliseconds
    pub general_cadence_ms: u64,
    /// Polling cadence of the QR-only engine in milliseconds
    pub specialized_cadence_ms: u64,
    /// Longest side of a rendered snapshot in pixels
    pub max_dimension: u32,
    /// An attempt slower than cadence * factor counts as an overrun
    pub overrun_factor: u32,
    /// Overruns in a row before an engine is dropped from the run
    pub max_consecutive_overruns: u32,
    /// Upper bound of the failure backoff in milliseconds
    pub max_backoff_ms: u64,
    /// Snapshot presets tried by the general-purpose engine, in order
    pub presets: Vec<EnhancePreset>,
}

/// Result gate settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Window in which a repeated payload is suppressed
    pub cooldown_ms: u64,
}

/// Scan session supervision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How often the facade checks that the stream is still live
    pub liveness_check_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                preferred_facing: FacingMode::Back,
                ideal_resolution: [1920, 1080],
                min_resolution: [1280, 720],
                fallback_resolution: [1280, 720],
            },
            engines: EngineConfig {
                order: EngineKind::all().to_vec(),
                native_cadence_ms: 16,
                general_cadence_ms: 500,
                specialized_cadence_ms: 250,
                max_dimension: 1280,
                overrun_factor: 4,
                max_consecutive_overruns: 5,
                max_backoff_ms: 2000,
                presets: EnhancePreset::defaults(),
            },
            gate: GateConfig { cooldown_ms: 1000 },
            session: SessionConfig {
                liveness_check_ms: 500,
            },
        }
    }
}

impl EngineConfig {
    pub fn cadence(&self, kind: EngineKind) -> Duration {
        let ms = match kind {
            EngineKind::Native => self.native_cadence_ms,
            EngineKind::GeneralPurpose => self.general_cadence_ms,
            EngineKind::Specialized => self.specialized_cadence_ms,
        };
        Duration::from_millis(ms)
    }
}

impl GateConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl SessionConfig {
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_check_ms)
    }
}

impl ScannerConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScanError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ScanError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ScannerConfig = toml::from_str(&contents)
            .map_err(|e| ScanError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate().map_err(ScanError::Config)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ScanError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ScanError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ScanError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| ScanError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabscan.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        for (name, res) in [
            ("ideal", self.camera.ideal_resolution),
            ("min", self.camera.min_resolution),
            ("fallback", self.camera.fallback_resolution),
        ] {
            if res[0] == 0 || res[1] == 0 {
                return Err(format!("Invalid {} resolution", name));
            }
        }
        if self.camera.min_resolution[0] > self.camera.ideal_resolution[0]
            || self.camera.min_resolution[1] > self.camera.ideal_resolution[1]
        {
            return Err("Minimum resolution exceeds ideal resolution".to_string());
        }

        let engines = &self.engines;
        for kind in &engines.order {
            if engines.order.iter().filter(|k| *k == kind).count() > 1 {
                return Err(format!("Engine {} listed more than once", kind));
            }
            if engines.cadence(*kind).is_zero() {
                return Err(format!("Cadence of engine {} must be positive", kind));
            }
        }
        if engines.max_dimension < 64 {
            return Err("Snapshot max dimension must be at least 64".to_string());
        }
        if engines.overrun_factor == 0 || engines.max_consecutive_overruns == 0 {
            return Err("Overrun factor and limit must be positive".to_string());
        }
        if engines.presets.is_empty() {
            return Err("At least one snapshot preset is required".to_string());
        }
        for preset in &engines.presets {
            if !(0.25..=4.0).contains(&preset.scale) {
                return Err(format!(
                    "Preset {} scale must be between 0.25 and 4.0",
                    preset.name
                ));
            }
        }

        if self.session.liveness_check_ms == 0 {
            return Err("Liveness check interval must be positive".to_string());
        }

        Ok(())
    }
}
