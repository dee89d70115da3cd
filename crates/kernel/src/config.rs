//! World configuration and validation.
//!
//! [`WorldConfig`] is the input for constructing a [`World`](crate::World).
//! Scene files may override the simulation parameters and the GUI options
//! when they are loaded.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

// ── DispatchConfig ─────────────────────────────────────────────────

/// Observation dispatch pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Number of worker threads. Default: 2.
    pub workers: usize,
    /// Capacity of each worker queue. A full queue blocks the producer.
    /// Default: 1024.
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 1024,
        }
    }
}

impl DispatchConfig {
    /// Worker count clamped to a sane range.
    pub fn resolved_workers(&self) -> usize {
        self.workers.clamp(1, 64)
    }
}

// ── GuiOptions ─────────────────────────────────────────────────────

/// Viewer settings, overridable by the `<gui>` block of a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuiOptions {
    /// Render refresh rate in frames per second. Default: 20.
    pub refresh_fps: u32,
    pub win_w: u32,
    pub win_h: u32,
    /// Name of the vehicle the camera follows, if any.
    pub follow_vehicle: Option<String>,
    /// Half-width of the visible area, in meters. Default: 80.
    pub camera_distance: f64,
}

impl Default for GuiOptions {
    fn default() -> Self {
        Self {
            refresh_fps: 20,
            win_w: 800,
            win_h: 600,
            follow_vehicle: None,
            camera_distance: 80.0,
        }
    }
}

// ── WorldConfig ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Fixed integration timestep in seconds. Default: 0.01.
    pub timestep: f64,
    /// Gravity magnitude in m/s^2, used for friction. Default: 9.81.
    pub gravity: f64,
    /// Solver velocity iterations per step. Default: 8.
    pub velocity_iterations: u32,
    /// Solver position iterations per step. Default: 3.
    pub position_iterations: u32,
    pub dispatch: DispatchConfig,
    pub gui: GuiOptions,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            timestep: 0.01,
            gravity: 9.81,
            velocity_iterations: 8,
            position_iterations: 3,
            dispatch: DispatchConfig::default(),
            gui: GuiOptions::default(),
        }
    }
}

impl WorldConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| ConfigError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_timestep(self.timestep)?;
        if !self.gravity.is_finite() || self.gravity < 0.0 {
            return Err(ConfigError::InvalidConfig(format!(
                "gravity must be finite and non-negative, got {}",
                self.gravity
            )));
        }
        if self.velocity_iterations == 0 || self.position_iterations == 0 {
            return Err(ConfigError::InvalidConfig(
                "solver iteration counts must be at least 1".into(),
            ));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "dispatch queue capacity must be at least 1".into(),
            ));
        }
        if self.gui.refresh_fps == 0 {
            return Err(ConfigError::InvalidConfig(
                "gui refresh_fps must be at least 1".into(),
            ));
        }
        if !(self.gui.camera_distance.is_finite() && self.gui.camera_distance > 0.0) {
            return Err(ConfigError::InvalidConfig(format!(
                "gui camera_distance must be positive, got {}",
                self.gui.camera_distance
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_timestep(h: f64) -> Result<(), ConfigError> {
    if h.is_finite() && h > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidConfig(format!(
            "timestep must be finite and positive, got {h}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = WorldConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.timestep, 0.01);
        assert_eq!(cfg.dispatch.workers, 2);
        assert_eq!(cfg.gui.refresh_fps, 20);
    }

    #[test]
    fn bad_timestep_rejected() {
        for h in [0.0, -0.1, f64::NAN, f64::INFINITY] {
            let cfg = WorldConfig {
                timestep: h,
                ..WorldConfig::default()
            };
            match cfg.validate() {
                Err(ConfigError::InvalidConfig(msg)) => assert!(msg.contains("timestep")),
                other => panic!("expected InvalidConfig, got {other:?}"),
            }
        }
    }

    #[test]
    fn zero_queue_rejected() {
        let mut cfg = WorldConfig::default();
        cfg.dispatch.queue_capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn worker_count_is_clamped() {
        let cfg = DispatchConfig {
            workers: 0,
            queue_capacity: 1,
        };
        assert_eq!(cfg.resolved_workers(), 1);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("world.json");
        std::fs::write(&path, r#"{ "timestep": 0.05, "dispatch": { "workers": 4 } }"#).unwrap();
        let cfg = WorldConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.timestep, 0.05);
        assert_eq!(cfg.dispatch.workers, 4);
        assert_eq!(cfg.dispatch.queue_capacity, 1024);
        assert_eq!(cfg.gravity, 9.81);
    }

    #[test]
    fn malformed_json_is_invalid_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("world.json");
        std::fs::write(&path, "{ timestep: ").unwrap();
        assert!(matches!(
            WorldConfig::from_json_file(&path),
            Err(ConfigError::InvalidConfig(_))
        ));
    }
}
