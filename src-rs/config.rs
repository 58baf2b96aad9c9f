use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PilotError, PilotResult};
use crate::scaling::Resolution;

/// Inclusive resolution window the planner is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleBounds {
    pub min: Resolution,
    pub max: Resolution,
}

impl Default for ScaleBounds {
    fn default() -> Self {
        Self {
            min: Resolution::new(800, 600),
            max: Resolution::new(1920, 1080),
        }
    }
}

impl ScaleBounds {
    pub fn validate(&self) -> PilotResult<()> {
        if self.min.width == 0 || self.min.height == 0 || self.max.width == 0 || self.max.height == 0
        {
            return Err(PilotError::Configuration(format!(
                "scale bounds must be non-zero (min {}, max {})",
                self.min, self.max
            )));
        }
        if self.min.width > self.max.width || self.min.height > self.max.height {
            return Err(PilotError::Configuration(format!(
                "minimum bound {} exceeds maximum bound {}",
                self.min, self.max
            )));
        }
        Ok(())
    }

    pub fn contains(&self, res: Resolution) -> bool {
        (self.min.width..=self.max.width).contains(&res.width)
            && (self.min.height..=self.max.height).contains(&res.height)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Value of the computer tool's `environment` field.
    pub environment: String,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub instructions: Option<String>,
    pub acknowledge_safety_checks: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "computer-use-preview".to_string(),
            api_key: None,
            environment: "linux".to_string(),
            request_timeout_secs: 120,
            poll_interval_ms: 100,
            instructions: None,
            acknowledge_safety_checks: true,
        }
    }
}

impl PlannerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.clamp(10, 1000))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DesktopConfig {
    /// argv prefix placed in front of every desktop command, e.g. `["docker", "exec", "sandbox"]`.
    pub launcher: Vec<String>,
    pub display: String,
    pub command_timeout_secs: u64,
    pub type_delay_ms: u32,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            launcher: Vec::new(),
            display: ":0".to_string(),
            command_timeout_secs: 30,
            type_delay_ms: 12,
        }
    }
}

impl DesktopConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub bounds: ScaleBounds,
    pub loop_timeout_secs: u64,
    pub planner: PlannerConfig,
    pub desktop: DesktopConfig,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            bounds: ScaleBounds::default(),
            loop_timeout_secs: 300,
            planner: PlannerConfig::default(),
            desktop: DesktopConfig::default(),
        }
    }
}

impl PilotConfig {
    pub fn load(path: &Path) -> PilotResult<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            PilotError::Configuration(format!("failed to read {}: {err}", path.display()))
        })?;
        let config: PilotConfig = serde_json::from_str(&raw).map_err(|err| {
            PilotError::Configuration(format!("invalid config JSON {}: {err}", path.display()))
        })?;
        config.bounds.validate()?;
        Ok(config)
    }

    pub fn loop_timeout(&self) -> Duration {
        Duration::from_secs(self.loop_timeout_secs)
    }
}
