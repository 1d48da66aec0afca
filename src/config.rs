//! Application configuration loaded from YAML.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use agent_core::{DecisionConfig, Intent, WorkflowConfig};
use anyhow::{Context, Result};
use formpilot_scheduler::SchedulerConfig;
use perceiver_structural::SnapshotConfig;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub workflow: WorkflowConfig,
    pub snapshot: SnapshotConfig,
    /// Label substring -> intent, checked before the built-in rules
    pub intents: BTreeMap<String, Intent>,
    pub decision: DecisionConfig,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        self.workflow
            .validate()
            .context("invalid workflow section")?;
        self.scheduler
            .validate()
            .context("invalid scheduler section")?;
        if self.decision.models.is_empty() {
            anyhow::bail!("decision.models must name at least one model");
        }
        Ok(())
    }
}

pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir().context("Failed to get config directory")?;
    path.push("formpilot");
    path.push("config.yaml");
    Ok(path)
}

/// Reads the config file, falling back to defaults when it does not exist.
pub async fn load_config(config_path: Option<&Path>) -> Result<LoadedConfig> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    if !config_path.exists() {
        warn!(
            "Config file not found, using defaults: {}",
            config_path.display()
        );
        return Ok(LoadedConfig {
            config: AppConfig::default(),
            path: config_path,
        });
    }

    let content = fs::read_to_string(&config_path)
        .await
        .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
    let config = parse_config(&content)
        .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;
    info!("Loaded configuration from: {}", config_path.display());
    Ok(LoadedConfig {
        config,
        path: config_path,
    })
}

pub fn parse_config(content: &str) -> Result<AppConfig> {
    // An empty file is a valid, all-defaults config.
    if content.trim().is_empty() {
        return Ok(AppConfig::default());
    }
    let config: AppConfig = serde_yaml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_elsewhere() {
        let config = parse_config(
            "workflow:\n  max_steps: 12\nscheduler:\n  worker_slots: 4\nintents:\n  \"right to work\": work_authorization\n",
        )
        .unwrap();
        assert_eq!(config.workflow.max_steps, 12);
        assert_eq!(config.workflow.max_submit_attempts, 3);
        assert_eq!(config.scheduler.worker_slots, 4);
        assert_eq!(
            config.intents.get("right to work"),
            Some(&Intent::WorkAuthorization)
        );
        assert_eq!(config.snapshot.max_elements, 160);
    }

    #[test]
    fn invalid_limits_are_rejected() {
        assert!(parse_config("workflow:\n  max_submit_attempts: 0\n").is_err());
        assert!(parse_config("scheduler:\n  worker_slots: 0\n").is_err());
        assert!(parse_config("").is_ok());
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_config(Some(&dir.path().join("absent.yaml")))
            .await
            .unwrap();
        assert_eq!(loaded.config.workflow.visual_fallback_budget, 8);
    }
}
