use eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::time::Duration;

use crate::types::{CalibrationRange, ConfigurationError};

/// Arm description loaded from `config/<robot_type>.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmConfig {
    pub name: String,
    pub robot_type: String,
    #[serde(default)]
    pub port: Option<String>,
    /// Declaration order is the action vector order.
    pub actuators: Vec<ActuatorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorConfig {
    pub name: String,
    pub bus_id: u8,
    pub norm_mode: NormMode,
    pub range_min: i32,
    pub range_max: i32,
    /// Raw position reported before any goal is written
    pub initial_position: i32,
}

/// How raw positions map onto normalized values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormMode {
    #[serde(rename = "range_m100_100")]
    RangeM100To100,
    #[serde(rename = "range_0_100")]
    Range0To100,
}

impl NormMode {
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            NormMode::RangeM100To100 => (-100.0, 100.0),
            NormMode::Range0To100 => (0.0, 100.0),
        }
    }

    pub fn normalize(&self, raw: i32, range: &CalibrationRange) -> f64 {
        let (lo, hi) = self.bounds();
        let t = (raw as f64 - range.range_min as f64) / range.span() as f64;
        (lo + t * (hi - lo)).clamp(lo, hi)
    }

    pub fn denormalize(&self, value: f64, range: &CalibrationRange) -> i32 {
        let (lo, hi) = self.bounds();
        let t = (value.clamp(lo, hi) - lo) / (hi - lo);
        let raw = range.range_min as f64 + t * range.span() as f64;
        range.clamp(raw.round() as i64)
    }
}

impl ArmConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ArmConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.actuators.is_empty() {
            return Err(ConfigurationError::InvalidArmConfig(format!(
                "arm '{}' declares no actuators",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for actuator in &self.actuators {
            if !seen.insert(actuator.name.as_str()) {
                return Err(ConfigurationError::InvalidArmConfig(format!(
                    "actuator '{}' declared twice",
                    actuator.name
                )));
            }

            if actuator.range_min >= actuator.range_max {
                return Err(ConfigurationError::InvalidCalibration {
                    name: actuator.name.clone(),
                    range_min: actuator.range_min,
                    range_max: actuator.range_max,
                });
            }

            if !actuator.range().contains(actuator.initial_position) {
                return Err(ConfigurationError::InvalidArmConfig(format!(
                    "initial position {} of '{}' outside {}..={}",
                    actuator.initial_position,
                    actuator.name,
                    actuator.range_min,
                    actuator.range_max
                )));
            }
        }

        Ok(())
    }

    pub fn actuator_names(&self) -> Vec<String> {
        self.actuators.iter().map(|a| a.name.clone()).collect()
    }

    pub fn calibration(&self) -> BTreeMap<String, CalibrationRange> {
        self.actuators
            .iter()
            .map(|a| (a.name.clone(), a.range()))
            .collect()
    }
}

impl ActuatorConfig {
    pub fn range(&self) -> CalibrationRange {
        CalibrationRange::new(self.range_min, self.range_max)
    }
}

/// Settings for the remote inference session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub close_timeout: Duration,
    /// When set, actions of any other width are rejected as malformed.
    pub action_dim: Option<usize>,
    pub robot_type: Option<String>,
    pub device: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(1),
            close_timeout: Duration::from_secs(1),
            action_dim: None,
            robot_type: None,
            device: None,
        }
    }
}

/// Settings for one control loop run.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub fps: u32,
    pub duration_s: u32,
    pub task: Option<String>,
    /// Minimum pause after a failed cycle before the next one starts.
    pub failure_backoff: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            fps: 25,
            duration_s: 30,
            task: None,
            failure_backoff: Duration::ZERO,
        }
    }
}

impl LoopConfig {
    pub fn new(fps: u32, duration_s: u32) -> Self {
        Self {
            fps,
            duration_s,
            ..Default::default()
        }
    }

    pub fn with_task(mut self, task: Option<String>) -> Self {
        self.task = task;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.fps == 0 {
            return Err(ConfigurationError::InvalidFrameRate(self.fps));
        }
        if self.duration_s == 0 {
            return Err(ConfigurationError::InvalidDuration(self.duration_s));
        }
        Ok(())
    }

    pub fn total_steps(&self) -> u64 {
        self.duration_s as u64 * self.fps as u64
    }

    pub fn frame_budget(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

/// Pacing of the homing routine.
#[derive(Debug, Clone)]
pub struct HomingConfig {
    pub steps: u32,
    pub step_delay: Duration,
    pub settle_delay: Duration,
}

impl Default for HomingConfig {
    fn default() -> Self {
        Self {
            steps: 10,
            step_delay: Duration::from_millis(500),
            settle_delay: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARM_TOML: &str = r#"
        name = "test_follower"
        robot_type = "so101_follower"

        [[actuators]]
        name = "shoulder_pan"
        bus_id = 1
        norm_mode = "range_m100_100"
        range_min = 1000
        range_max = 3000
        initial_position = 2000

        [[actuators]]
        name = "gripper"
        bus_id = 6
        norm_mode = "range_0_100"
        range_min = 2000
        range_max = 3000
        initial_position = 2000
    "#;

    #[test]
    fn test_parse_arm_config() {
        let config: ArmConfig = toml::from_str(ARM_TOML).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.actuator_names(), vec!["shoulder_pan", "gripper"]);
        assert_eq!(config.actuators[1].norm_mode, NormMode::Range0To100);
        assert_eq!(config.calibration()["gripper"], CalibrationRange::new(2000, 3000));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty_ranges() {
        let mut config: ArmConfig = toml::from_str(ARM_TOML).unwrap();
        config.actuators[1].name = "shoulder_pan".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidArmConfig(_))
        ));

        let mut config: ArmConfig = toml::from_str(ARM_TOML).unwrap();
        config.actuators[0].range_max = 1000;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidCalibration { .. })
        ));
    }

    #[test]
    fn test_normalization_round_trips_range_edges() {
        let range = CalibrationRange::new(1000, 3000);
        let mode = NormMode::RangeM100To100;
        assert_eq!(mode.normalize(1000, &range), -100.0);
        assert_eq!(mode.normalize(2000, &range), 0.0);
        assert_eq!(mode.denormalize(100.0, &range), 3000);
        assert_eq!(mode.denormalize(250.0, &range), 3000);
        assert_eq!(NormMode::Range0To100.normalize(2500, &range), 75.0);
    }

    #[test]
    fn test_shipped_arm_configs_load() {
        for file in ["so101_follower.toml", "so101_leader.toml"] {
            let path = format!("{}/../config/{}", env!("CARGO_MANIFEST_DIR"), file);
            let config = ArmConfig::load_from_file(&path).unwrap();
            assert_eq!(config.actuators.len(), 6);
            assert_eq!(config.actuators[5].name, "gripper");
            assert_eq!(config.actuators[5].norm_mode, NormMode::Range0To100);
        }
    }

    #[test]
    fn test_loop_config_steps_and_budget() {
        let config = LoopConfig::new(25, 2);
        assert!(config.validate().is_ok());
        assert_eq!(config.total_steps(), 50);
        assert_eq!(config.frame_budget(), Duration::from_millis(40));

        assert_eq!(
            LoopConfig::new(0, 2).validate(),
            Err(ConfigurationError::InvalidFrameRate(0))
        );
    }
}
