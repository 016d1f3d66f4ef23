//! Configuration file for conductor.
//!
//! Settings are read from `.conductor/conductor.toml`, then overlaid with
//! `CONDUCTOR_*` environment variables. CLI flags are applied last by the
//! command layer.
//!
//! # Configuration File Format
//!
//! ```toml
//! [orchestrator]
//! max_parallel = 4
//! max_steps = 100
//! issues_policy = "accept"
//!
//! [review]
//! max_fix_attempts = 2
//!
//! [lock]
//! retries = 50
//! backoff_ms = 100
//!
//! [paths]
//! plans_dir = "plans"
//!
//! [worker]
//! implement_cmd = "./scripts/implement.sh"
//! verify_cmd = "cargo test"
//! review_cmd = "./scripts/review.sh"
//! timeout_secs = 1800
//! ```

use crate::orchestrator::{DEFAULT_MAX_PARALLEL, DEFAULT_MAX_STEPS, OrchestratorConfig};
use crate::progress::IssuesPolicy;
use crate::progress::lock::{DEFAULT_LOCK_BACKOFF, DEFAULT_LOCK_RETRIES, LockSettings};
use crate::review::DEFAULT_MAX_FIX_ATTEMPTS;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Name of the configuration file inside `.conductor/`.
pub const CONFIG_FILE: &str = "conductor.toml";

/// Orchestration loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSection {
    /// Worker pool size
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Batches dispatched per run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Whether CompletedWithIssues settles plans and phases
    #[serde(default)]
    pub issues_policy: IssuesPolicy,
}

fn default_max_parallel() -> usize {
    DEFAULT_MAX_PARALLEL
}

fn default_max_steps() -> u32 {
    DEFAULT_MAX_STEPS
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            max_steps: default_max_steps(),
            issues_policy: IssuesPolicy::default(),
        }
    }
}

/// Review cycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSection {
    /// Implement/verify retries per stage
    #[serde(default = "default_max_fix_attempts")]
    pub max_fix_attempts: u32,
}

fn default_max_fix_attempts() -> u32 {
    DEFAULT_MAX_FIX_ATTEMPTS
}

impl Default for ReviewSection {
    fn default() -> Self {
        Self {
            max_fix_attempts: default_max_fix_attempts(),
        }
    }
}

/// Progress index lock settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockSection {
    #[serde(default = "default_lock_retries")]
    pub retries: u32,
    #[serde(default = "default_lock_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_lock_retries() -> u32 {
    DEFAULT_LOCK_RETRIES
}

fn default_lock_backoff_ms() -> u64 {
    DEFAULT_LOCK_BACKOFF.as_millis() as u64
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            retries: default_lock_retries(),
            backoff_ms: default_lock_backoff_ms(),
        }
    }
}

impl LockSection {
    pub fn to_settings(&self) -> LockSettings {
        LockSettings {
            retries: self.retries,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

/// Filesystem locations, relative to the project directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsSection {
    #[serde(default = "default_plans_dir")]
    pub plans_dir: String,
}

fn default_plans_dir() -> String {
    "plans".to_string()
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            plans_dir: default_plans_dir(),
        }
    }
}

/// Shell commands backing the three worker roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSection {
    #[serde(default)]
    pub implement_cmd: Option<String>,
    #[serde(default)]
    pub verify_cmd: Option<String>,
    #[serde(default)]
    pub review_cmd: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    1800
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            implement_cmd: None,
            verify_cmd: None,
            review_cmd: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl WorkerSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Root of `conductor.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConductorToml {
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub review: ReviewSection,
    #[serde(default)]
    pub lock: LockSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub worker: WorkerSection,
}

impl ConductorToml {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse conductor.toml")
    }

    /// Load `conductor.toml` from the given directory, or use defaults if absent.
    pub fn load_or_default(conductor_dir: &Path) -> Result<Self> {
        let config_path = conductor_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize conductor.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Overlay the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Overlay values from `lookup`, which maps variable names to values.
    ///
    /// Unparsable values are ignored with a warning.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("CONDUCTOR_MAX_PARALLEL") {
            match raw.trim().parse::<usize>() {
                Ok(value) => self.orchestrator.max_parallel = value,
                Err(_) => warn!(value = %raw, "ignoring invalid CONDUCTOR_MAX_PARALLEL"),
            }
        }
        if let Some(dir) = lookup("CONDUCTOR_PLANS_DIR").filter(|v| !v.trim().is_empty()) {
            self.paths.plans_dir = dir;
        }
        if let Some(cmd) = lookup("CONDUCTOR_IMPLEMENT_CMD") {
            self.worker.implement_cmd = Some(cmd);
        }
        if let Some(cmd) = lookup("CONDUCTOR_VERIFY_CMD") {
            self.worker.verify_cmd = Some(cmd);
        }
        if let Some(cmd) = lookup("CONDUCTOR_REVIEW_CMD") {
            self.worker.review_cmd = Some(cmd);
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_max_parallel(self.orchestrator.max_parallel)
            .with_max_steps(self.orchestrator.max_steps)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.orchestrator.max_parallel == 0 {
            warnings.push("max_parallel is 0; one task will run at a time".to_string());
        }
        if self.orchestrator.max_steps == 0 {
            warnings.push("max_steps is 0; runs will dispatch nothing".to_string());
        }
        if self.lock.retries == 0 {
            warnings.push("lock retries is 0; every locked update will time out".to_string());
        }
        if self.worker.timeout_secs == 0 {
            warnings.push("worker timeout_secs is 0; every worker call will time out".to_string());
        }

        let commands = [
            ("implement_cmd", &self.worker.implement_cmd),
            ("verify_cmd", &self.worker.verify_cmd),
            ("review_cmd", &self.worker.review_cmd),
        ];
        for (name, command) in commands {
            if command.as_deref().is_none_or(|c| c.trim().is_empty()) {
                warnings.push(format!("worker.{} is not configured", name));
            }
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ConductorToml::parse("").unwrap();
        assert_eq!(config, ConductorToml::default());
        assert_eq!(config.orchestrator.max_parallel, 4);
        assert_eq!(config.orchestrator.max_steps, 100);
        assert_eq!(config.review.max_fix_attempts, 2);
        assert_eq!(config.lock.retries, 50);
        assert_eq!(config.lock.backoff_ms, 100);
        assert_eq!(config.paths.plans_dir, "plans");
        assert_eq!(config.worker.timeout_secs, 1800);
    }

    #[test]
    fn test_parse_partial_sections() {
        let config = ConductorToml::parse(
            r#"
[orchestrator]
max_parallel = 8
issues_policy = "block"

[worker]
verify_cmd = "cargo test"
"#,
        )
        .unwrap();

        assert_eq!(config.orchestrator.max_parallel, 8);
        assert_eq!(config.orchestrator.max_steps, 100);
        assert_eq!(config.orchestrator.issues_policy, IssuesPolicy::Block);
        assert_eq!(config.worker.verify_cmd.as_deref(), Some("cargo test"));
        assert!(config.worker.implement_cmd.is_none());
    }

    #[test]
    fn test_invalid_policy_is_an_error() {
        let result = ConductorToml::parse("[orchestrator]\nissues_policy = \"maybe\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [
            ("CONDUCTOR_MAX_PARALLEL", "2"),
            ("CONDUCTOR_PLANS_DIR", "docs/plans"),
            ("CONDUCTOR_REVIEW_CMD", "./review.sh"),
        ]
        .into_iter()
        .collect();

        let mut config = ConductorToml::default();
        config.worker.review_cmd = Some("old".to_string());
        config.apply_env_from(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.orchestrator.max_parallel, 2);
        assert_eq!(config.paths.plans_dir, "docs/plans");
        assert_eq!(config.worker.review_cmd.as_deref(), Some("./review.sh"));
        assert!(config.worker.implement_cmd.is_none());
    }

    #[test]
    fn test_env_overlay_ignores_garbage() {
        let mut config = ConductorToml::default();
        config.apply_env_from(|name| {
            (name == "CONDUCTOR_MAX_PARALLEL").then(|| "lots".to_string())
        });
        assert_eq!(config.orchestrator.max_parallel, 4);
    }

    #[test]
    fn test_validate_reports_missing_commands() {
        let warnings = ConductorToml::default().validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().any(|w| w.contains("implement_cmd")));

        let mut config = ConductorToml::default();
        config.orchestrator.max_parallel = 0;
        config.worker.implement_cmd = Some("a".to_string());
        config.worker.verify_cmd = Some("b".to_string());
        config.worker.review_cmd = Some("c".to_string());
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("max_parallel"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let mut config = ConductorToml::default();
        config.orchestrator.max_steps = 7;
        config.worker.implement_cmd = Some("./impl.sh".to_string());
        config.save(&dir.path().join(CONFIG_FILE)).unwrap();

        let loaded = ConductorToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_lock_section_settings() {
        let settings = LockSection {
            retries: 3,
            backoff_ms: 25,
        }
        .to_settings();
        assert_eq!(settings.retries, 3);
        assert_eq!(settings.backoff, Duration::from_millis(25));
    }
}
