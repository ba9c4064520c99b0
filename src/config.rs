use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{ChartPilotError, ChartPilotResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub settle: SettleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Full URL of the responses endpoint.
    #[serde(default)]
    pub api_base: String,
    /// Optional key stored in config.toml (falls back to env var CHARTPILOT_API_KEY).
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// One of "windows", "mac", "linux", "browser".
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub auth_style: AuthStyle,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_truncation")]
    pub truncation: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStyle {
    #[default]
    Bearer,
    /// Azure-style `api-key` header.
    ApiKeyHeader,
}

fn default_model() -> String {
    "computer-use-preview".into()
}

fn default_environment() -> String {
    "windows".into()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_truncation() -> String {
    "auto".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_display_id")]
    pub id: String,
    /// Physical pixels. Left unset, the size is read from the monitor at startup.
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl DisplayConfig {
    /// The configured size, when both dimensions are given.
    pub fn explicit_size(&self) -> Option<(u32, u32)> {
        self.width.zip(self.height)
    }
}

fn default_display_id() -> String {
    "primary".into()
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            id: default_display_id(),
            width: None,
            height: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Task description handed to the decision service on the first turn.
    #[serde(default)]
    pub task: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
}

fn default_max_iterations() -> u32 {
    10
}

/// Upper bound for `run.confirmation_timeout_secs` (one day).
pub const MAX_CONFIRMATION_TIMEOUT_SECS: u64 = 24 * 60 * 60;

fn default_confirmation_timeout() -> u64 {
    120
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            task: String::new(),
            max_iterations: default_max_iterations(),
            confirmation_timeout_secs: default_confirmation_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Safety check codes that may be acknowledged without asking the operator.
    #[serde(default)]
    pub auto_approve_codes: Vec<String>,
    /// Safety check codes that end the run without asking the operator.
    #[serde(default)]
    pub always_reject_codes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleConfig {
    /// 0 disables settle detection: a single capture is taken.
    #[serde(default = "default_settle_wait")]
    pub max_wait_ms: u64,
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,
    #[serde(default = "default_stable_frames")]
    pub min_stable_frames: usize,
}

fn default_settle_wait() -> u64 {
    3000
}

fn default_check_interval() -> u64 {
    250
}

fn default_stable_frames() -> usize {
    2
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: default_settle_wait(),
            check_interval_ms: default_check_interval(),
            min_stable_frames: default_stable_frames(),
        }
    }
}

fn resolve_config_path() -> ChartPilotResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("chartpilot").join("config.toml");
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in user config dir");
            return Ok(candidate);
        }
    }

    Err(ChartPilotError::Config(
        "config.toml not found next to executable, in working directory or user config dir".into(),
    ))
}

pub fn load_config() -> ChartPilotResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> ChartPilotResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let mut config: AppConfig = toml::from_str(&content)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    tracing::info!(
        path = %path.display(),
        model = %config.service.model,
        max_iterations = config.run.max_iterations,
        "config loaded"
    );
    Ok(config)
}

/// Environment values win over the file. `lookup` is injected so tests stay hermetic.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("CHARTPILOT_API_KEY").filter(|v| !v.is_empty()) {
        config.service.api_key = v;
    }
    if let Some(v) = lookup("CHARTPILOT_API_BASE").filter(|v| !v.is_empty()) {
        config.service.api_base = v;
    }
    if let Some(v) = lookup("CHARTPILOT_MODEL").filter(|v| !v.is_empty()) {
        config.service.model = v;
    }
}

impl AppConfig {
    pub fn validate(&self) -> ChartPilotResult<()> {
        match (self.display.width, self.display.height) {
            (Some(0), _) | (_, Some(0)) => {
                return Err(ChartPilotError::Config("display width and height must be non-zero".into()));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(ChartPilotError::Config(
                    "set both display.width and display.height, or neither".into(),
                ));
            }
            _ => {}
        }
        if self.run.max_iterations == 0 {
            return Err(ChartPilotError::Config("run.max_iterations must be at least 1".into()));
        }
        if self.run.confirmation_timeout_secs > MAX_CONFIRMATION_TIMEOUT_SECS {
            return Err(ChartPilotError::Config(format!(
                "run.confirmation_timeout_secs must be at most {MAX_CONFIRMATION_TIMEOUT_SECS}"
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ChartPilotError::Config("retry.max_attempts must be at least 1".into()));
        }
        if let Some(code) = self
            .safety
            .auto_approve_codes
            .iter()
            .find(|c| self.safety.always_reject_codes.contains(c))
        {
            return Err(ChartPilotError::Config(format!(
                "safety code '{code}' is both auto-approved and always rejected"
            )));
        }
        Ok(())
    }
}
