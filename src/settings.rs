use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReckonError, Result};
use crate::linker::BatchOptions;
use crate::matcher::MatchConfig;
use crate::vat::VatPolicy;

/// Overrides the config directory (settings.json lives directly inside it).
pub const HOME_ENV: &str = "RECKON_HOME";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_auto_match_threshold")]
    pub auto_match_threshold: f64,
    #[serde(default = "default_candidate_window_days")]
    pub candidate_window_days: i64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default)]
    pub vat_policy_path: Option<String>,
}

fn default_user_id() -> String {
    "local".to_string()
}

fn default_auto_match_threshold() -> f64 {
    0.95
}

fn default_candidate_window_days() -> i64 {
    2
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_delay_ms() -> u64 {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            user_id: default_user_id(),
            auto_match_threshold: default_auto_match_threshold(),
            candidate_window_days: default_candidate_window_days(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            vat_policy_path: None,
        }
    }
}

impl Settings {
    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            auto_match_threshold: self.auto_match_threshold,
            candidate_window_days: self.candidate_window_days,
        }
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            batch_size: self.batch_size.max(1),
            delay: Duration::from_millis(self.batch_delay_ms),
        }
    }

    pub fn vat_policy(&self) -> Result<VatPolicy> {
        match &self.vat_policy_path {
            Some(path) => VatPolicy::load(&PathBuf::from(shellexpand_path(path))),
            None => Ok(VatPolicy::default()),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("reckon.db")
    }
}

fn config_dir() -> PathBuf {
    if let Ok(home) = std::env::var(HOME_ENV) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("reckon")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    if std::env::var_os(HOME_ENV).is_some() {
        return config_dir().join("data");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("reckon")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| ReckonError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}
