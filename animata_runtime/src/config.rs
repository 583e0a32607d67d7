//! Runtime configuration loaded from TOML.
//!
//! One file declares the cycle interval, the run mode, the motor axes, and
//! optional behavior parameters. Missing fields fall back to defaults;
//! `validate()` runs after parsing and before anything touches the bus.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use animata_can::motor::MotorConfig;
use animata_core::behavior::BehaviorParams;
use animata_core::clock::TickPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Run mode selecting the scheduler and the clock tick policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Standalone,
    Served,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Cycle interval [ms].
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default)]
    pub mode: RunMode,

    #[serde(default)]
    pub motors: Vec<MotorConfig>,

    #[serde(default)]
    pub behavior: Option<BehaviorParams>,
}

fn default_interval_ms() -> u64 {
    10
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            mode: RunMode::default(),
            motors: Vec::new(),
            behavior: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid("interval_ms must be positive".into()));
        }
        let mut nodes = std::collections::HashSet::new();
        let mut names = std::collections::HashSet::new();
        for motor in &self.motors {
            if motor.node_id == 0 || motor.node_id > 127 {
                return Err(ConfigError::Invalid(format!(
                    "motor {:?}: node id {} outside 1..=127",
                    motor.name, motor.node_id
                )));
            }
            if !nodes.insert(motor.node_id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate node id {}",
                    motor.node_id
                )));
            }
            if !names.insert(&motor.name) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate motor name {:?}",
                    motor.name
                )));
            }
            if motor.scale == 0.0 || !motor.scale.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "motor {:?}: scale must be finite and nonzero",
                    motor.name
                )));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Tick policy matching the run mode: deterministic nominal steps in
    /// standalone runs, measured wall deltas when serving.
    pub fn tick_policy(&self) -> TickPolicy {
        match self.mode {
            RunMode::Standalone => TickPolicy::Nominal,
            RunMode::Served => TickPolicy::Measured,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
interval_ms = 20
mode = "served"

[[motors]]
node_id = 1
name = "left_arm"
scale = 1000.0

[motors.homing]
method = 35
offset = 0.5
timeout = 2.0

[[motors]]
node_id = 2
name = "right_arm"

[behavior]
attention_span = 12.0
sleeping_motions = ["rest"]
chilled_motions = ["sway"]
excited_motions = ["wave"]
"#;

    #[test]
    fn sample_parses_with_defaults() {
        let config = RuntimeConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.interval_ms, 20);
        assert_eq!(config.mode, RunMode::Served);
        assert_eq!(config.tick_policy(), TickPolicy::Measured);
        assert_eq!(config.motors.len(), 2);
        assert_eq!(config.motors[0].homing.offset, 0.5);
        // Defaults fill what the file leaves out.
        assert_eq!(config.motors[1].scale, 1.0);
        assert_eq!(config.motors[1].homing.method, 35);
        assert_eq!(config.behavior.as_ref().unwrap().attention_span, 12.0);
    }

    #[test]
    fn empty_config_is_valid_standalone() {
        let config = RuntimeConfig::from_toml("").unwrap();
        assert_eq!(config.mode, RunMode::Standalone);
        assert_eq!(config.tick_policy(), TickPolicy::Nominal);
        assert_eq!(config.interval(), Duration::from_millis(10));
    }

    #[test]
    fn duplicate_node_ids_rejected() {
        let toml = r#"
[[motors]]
node_id = 3
name = "a"

[[motors]]
node_id = 3
name = "b"
"#;
        assert!(matches!(
            RuntimeConfig::from_toml(toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn zero_interval_rejected() {
        assert!(matches!(
            RuntimeConfig::from_toml("interval_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("animata.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = RuntimeConfig::load(&path).unwrap();
        assert_eq!(config.motors.len(), 2);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = RuntimeConfig::load(Path::new("/nonexistent/animata.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
