use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::machine::ProtocolSettings;
use crate::session::{AutoSubmit, SessionSettings};
use crate::signals::Digit;
use crate::timer::TimerError;
use crate::validator::TargetCode;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read room config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config json: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
    },
    #[error("parse config json at {path}: {source}")]
    ParseAt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("config_version: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
    #[error("at least one target code must be configured")]
    NoTargetCodes,
    #[error("codes[{index}].name must not be empty")]
    EmptyCodeName { index: usize },
    #[error("input.arity must be at least 1")]
    ZeroArity,
    #[error("code '{name}' has {actual} digits but input.arity is {expected}")]
    CodeArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("codes '{first}' and '{second}' have identical digits")]
    DuplicateCode { first: String, second: String },
    #[error("{field} must be a positive finite number of seconds, got {value}")]
    NonPositiveDuration { field: &'static str, value: f32 },
    #[error("{field} must be a non-negative finite number of seconds, got {value}")]
    NegativeDelay { field: &'static str, value: f32 },
    #[error("protocol.cycles_before_final_act must be at least 1")]
    ZeroCyclesBeforeFinalAct,
    #[error("weight_puzzle.tolerance_kg must be a positive finite number, got {0}")]
    InvalidTolerance(f32),
    #[error(transparent)]
    Timer(#[from] TimerError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetCodeConfig {
    pub name: String,
    pub digits: Vec<Digit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    pub arity: usize,
    pub auto_submit: bool,
    pub auto_submit_delay_seconds: f32,
    pub incorrect_clear_delay_seconds: f32,
    pub next_cycle_delay_seconds: f32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            arity: 4,
            auto_submit: true,
            auto_submit_delay_seconds: 0.3,
            incorrect_clear_delay_seconds: 1.0,
            next_cycle_delay_seconds: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimerConfig {
    pub initial_duration_seconds: f32,
    pub final_act_duration_seconds: f32,
    pub warning_threshold_seconds: f32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            initial_duration_seconds: 120.0,
            final_act_duration_seconds: 60.0,
            warning_threshold_seconds: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolConfig {
    pub cycles_before_final_act: u32,
    pub final_act_enabled: bool,
    pub hatch_unlock_delay_seconds: f32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            cycles_before_final_act: 3,
            final_act_enabled: true,
            hatch_unlock_delay_seconds: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeightPuzzleConfig {
    pub tolerance_kg: f32,
}

impl Default for WeightPuzzleConfig {
    fn default() -> Self {
        Self { tolerance_kg: 0.01 }
    }
}

fn default_config_version() -> u32 {
    CONFIG_VERSION
}

/// Static room setup, loaded once at start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomConfig {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    pub codes: Vec<TargetCodeConfig>,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub weight_puzzle: Option<WeightPuzzleConfig>,
}

impl RoomConfig {
    pub fn with_codes(codes: Vec<TargetCodeConfig>) -> Self {
        Self {
            config_version: CONFIG_VERSION,
            codes,
            input: InputConfig::default(),
            timer: TimerConfig::default(),
            protocol: ProtocolConfig::default(),
            weight_puzzle: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let mut deserializer = serde_json::Deserializer::from_str(raw);
        let config = match serde_path_to_error::deserialize::<_, RoomConfig>(&mut deserializer) {
            Ok(config) => config,
            Err(error) => {
                let path = error.path().to_string();
                let source = error.into_inner();
                return if path.is_empty() || path == "." {
                    Err(ConfigError::Parse { source })
                } else {
                    Err(ConfigError::ParseAt { path, source })
                };
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.config_version != CONFIG_VERSION {
            return Err(ConfigError::VersionMismatch {
                expected: CONFIG_VERSION,
                actual: self.config_version,
            });
        }
        if self.input.arity == 0 {
            return Err(ConfigError::ZeroArity);
        }
        if self.codes.is_empty() {
            return Err(ConfigError::NoTargetCodes);
        }

        let mut seen: HashMap<&[Digit], &str> = HashMap::with_capacity(self.codes.len());
        for (index, code) in self.codes.iter().enumerate() {
            if code.name.trim().is_empty() {
                return Err(ConfigError::EmptyCodeName { index });
            }
            if code.digits.len() != self.input.arity {
                return Err(ConfigError::CodeArityMismatch {
                    name: code.name.clone(),
                    expected: self.input.arity,
                    actual: code.digits.len(),
                });
            }
            if let Some(first) = seen.insert(code.digits.as_slice(), code.name.as_str()) {
                return Err(ConfigError::DuplicateCode {
                    first: first.to_string(),
                    second: code.name.clone(),
                });
            }
        }

        require_positive(
            "timer.initial_duration_seconds",
            self.timer.initial_duration_seconds,
        )?;
        require_positive(
            "timer.final_act_duration_seconds",
            self.timer.final_act_duration_seconds,
        )?;
        require_non_negative(
            "timer.warning_threshold_seconds",
            self.timer.warning_threshold_seconds,
        )?;
        require_non_negative(
            "input.auto_submit_delay_seconds",
            self.input.auto_submit_delay_seconds,
        )?;
        require_non_negative(
            "input.incorrect_clear_delay_seconds",
            self.input.incorrect_clear_delay_seconds,
        )?;
        require_non_negative(
            "input.next_cycle_delay_seconds",
            self.input.next_cycle_delay_seconds,
        )?;
        require_non_negative(
            "protocol.hatch_unlock_delay_seconds",
            self.protocol.hatch_unlock_delay_seconds,
        )?;
        if self.protocol.cycles_before_final_act == 0 {
            return Err(ConfigError::ZeroCyclesBeforeFinalAct);
        }
        if let Some(weights) = &self.weight_puzzle {
            if !weights.tolerance_kg.is_finite() || weights.tolerance_kg <= 0.0 {
                return Err(ConfigError::InvalidTolerance(weights.tolerance_kg));
            }
        }
        Ok(())
    }

    pub fn target_codes(&self) -> Vec<TargetCode> {
        self.codes
            .iter()
            .map(|code| TargetCode::new(code.name.clone(), code.digits.clone()))
            .collect()
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            arity: self.input.arity,
            auto_submit: AutoSubmit::from_settings(
                self.input.auto_submit,
                self.input.auto_submit_delay_seconds,
            ),
            incorrect_clear_delay_seconds: self.input.incorrect_clear_delay_seconds,
        }
    }

    pub fn protocol_settings(&self) -> ProtocolSettings {
        ProtocolSettings {
            initial_duration_seconds: self.timer.initial_duration_seconds,
            final_act_duration_seconds: self.timer.final_act_duration_seconds,
            cycles_before_final_act: self.protocol.cycles_before_final_act,
            final_act_enabled: self.protocol.final_act_enabled,
            hatch_unlock_delay_seconds: self.protocol.hatch_unlock_delay_seconds,
        }
    }
}

fn require_positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositiveDuration { field, value })
    }
}

fn require_non_negative(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NegativeDelay { field, value })
    }
}
