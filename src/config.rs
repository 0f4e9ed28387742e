//! Budget configuration.
//!
//! Loaded from `~/.agentbudget/config.json` when present, then overridden by
//! `AGENTBUDGET_*` environment variables. Every field has a default, so a
//! missing or partial file is fine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::budget::{parse_budget, BudgetValue};
use crate::circuit_breaker::{
    validate_soft_limit_fraction, DEFAULT_LOOP_WINDOW_SECONDS, DEFAULT_MAX_REPEATED_CALLS,
    DEFAULT_SOFT_LIMIT_FRACTION,
};
use crate::error::{BudgetError, Result};
use crate::pricing::ModelPricing;
use crate::webhook::DEFAULT_WEBHOOK_TIMEOUT_SECS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Dollar cap per session, e.g. `"$5.00"` or `5.0`.
    pub max_spend: BudgetValue,
    /// Fraction of the budget at which the soft-limit callback fires.
    pub soft_limit: f64,
    pub max_repeated_calls: usize,
    pub loop_window_seconds: f64,
    pub webhook_url: Option<String>,
    pub webhook_timeout_seconds: f64,
    /// Extra model prices in USD per million tokens.
    pub pricing: HashMap<String, ModelPricing>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_spend: BudgetValue::Text("$5.00".to_string()),
            soft_limit: DEFAULT_SOFT_LIMIT_FRACTION,
            max_repeated_calls: DEFAULT_MAX_REPEATED_CALLS,
            loop_window_seconds: DEFAULT_LOOP_WINDOW_SECONDS,
            webhook_url: None,
            webhook_timeout_seconds: DEFAULT_WEBHOOK_TIMEOUT_SECS,
            pricing: HashMap::new(),
        }
    }
}

impl BudgetConfig {
    /// `~/.agentbudget`
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agentbudget")
    }

    /// `~/.agentbudget/config.json`
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Loads the default config file with environment overrides applied.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::path())?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Loads a config file. A missing or empty file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            BudgetError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(&content).map_err(|e| {
            BudgetError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Writes the config as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Applies `AGENTBUDGET_*` environment variables on top of the loaded values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("AGENTBUDGET_MAX_SPEND") {
            self.max_spend = BudgetValue::Text(val);
        }
        if let Ok(val) = std::env::var("AGENTBUDGET_SOFT_LIMIT") {
            self.soft_limit = parse_env("AGENTBUDGET_SOFT_LIMIT", &val)?;
        }
        if let Ok(val) = std::env::var("AGENTBUDGET_MAX_REPEATED_CALLS") {
            self.max_repeated_calls = parse_env("AGENTBUDGET_MAX_REPEATED_CALLS", &val)?;
        }
        if let Ok(val) = std::env::var("AGENTBUDGET_LOOP_WINDOW_SECONDS") {
            self.loop_window_seconds = parse_env("AGENTBUDGET_LOOP_WINDOW_SECONDS", &val)?;
        }
        if let Ok(val) = std::env::var("AGENTBUDGET_WEBHOOK_URL") {
            let val = val.trim();
            self.webhook_url = (!val.is_empty()).then(|| val.to_string());
        }
        Ok(())
    }

    /// Checks that the values describe a usable budget.
    pub fn validate(&self) -> Result<()> {
        parse_budget(self.max_spend.clone())?;
        validate_soft_limit_fraction(self.soft_limit)?;
        if self.max_repeated_calls == 0 {
            return Err(BudgetError::Config(
                "max_repeated_calls must be at least 1".to_string(),
            ));
        }
        if !(self.loop_window_seconds.is_finite() && self.loop_window_seconds > 0.0) {
            return Err(BudgetError::Config(format!(
                "loop_window_seconds must be positive, got {}",
                self.loop_window_seconds
            )));
        }
        if !(self.webhook_timeout_seconds.is_finite() && self.webhook_timeout_seconds > 0.0) {
            return Err(BudgetError::Config(format!(
                "webhook_timeout_seconds must be positive, got {}",
                self.webhook_timeout_seconds
            )));
        }
        Ok(())
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.webhook_timeout_seconds)
            .unwrap_or(Duration::from_secs(5))
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BudgetError::Config(format!("Invalid value for {}: {:?}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // env vars are process-global
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_VARS: &[&str] = &[
        "AGENTBUDGET_MAX_SPEND",
        "AGENTBUDGET_SOFT_LIMIT",
        "AGENTBUDGET_MAX_REPEATED_CALLS",
        "AGENTBUDGET_LOOP_WINDOW_SECONDS",
        "AGENTBUDGET_WEBHOOK_URL",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let config = BudgetConfig::default();
        assert_eq!(config.max_spend, BudgetValue::Text("$5.00".into()));
        assert_eq!(config.soft_limit, 0.9);
        assert_eq!(config.max_repeated_calls, 10);
        assert_eq!(config.loop_window_seconds, 60.0);
        assert!(config.webhook_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_path_under_home() {
        assert!(BudgetConfig::path().ends_with(".agentbudget/config.json"));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = BudgetConfig::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, BudgetConfig::default());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "max_spend": 2.5,
                "max_repeated_calls": 3,
                "pricing": {
                    "acme-large": {"input_cost_per_million": 1.0, "output_cost_per_million": 4.0}
                }
            }"#,
        )
        .unwrap();

        let config = BudgetConfig::load_from(&path).unwrap();
        assert_eq!(config.max_spend, BudgetValue::Amount(2.5));
        assert_eq!(config.max_repeated_calls, 3);
        assert_eq!(config.soft_limit, 0.9);
        assert_eq!(
            config.pricing["acme-large"],
            ModelPricing::per_million(1.0, 4.0)
        );
    }

    #[test]
    fn test_load_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            BudgetConfig::load_from(&path),
            Err(BudgetError::Config(_))
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = BudgetConfig {
            max_spend: BudgetValue::Text("$1.25".into()),
            webhook_url: Some("http://localhost:9/hook".into()),
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(BudgetConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("AGENTBUDGET_MAX_SPEND", "$0.75");
        std::env::set_var("AGENTBUDGET_SOFT_LIMIT", "0.5");
        std::env::set_var("AGENTBUDGET_MAX_REPEATED_CALLS", "4");
        std::env::set_var("AGENTBUDGET_WEBHOOK_URL", "https://example.com/hook");

        let mut config = BudgetConfig::default();
        config.apply_env_overrides().unwrap();
        clear_env();

        assert_eq!(config.max_spend, BudgetValue::Text("$0.75".into()));
        assert_eq!(config.soft_limit, 0.5);
        assert_eq!(config.max_repeated_calls, 4);
        assert_eq!(config.loop_window_seconds, 60.0);
        assert_eq!(
            config.webhook_url.as_deref(),
            Some("https://example.com/hook")
        );
    }

    #[test]
    fn test_env_override_unparsable() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("AGENTBUDGET_MAX_REPEATED_CALLS", "lots");
        let result = BudgetConfig::default().apply_env_overrides();
        clear_env();
        assert!(matches!(result, Err(BudgetError::Config(_))));
    }

    #[test]
    fn test_validate_rejects() {
        let bad_budget = BudgetConfig {
            max_spend: BudgetValue::Amount(0.0),
            ..Default::default()
        };
        assert!(matches!(
            bad_budget.validate(),
            Err(BudgetError::InvalidBudget(_))
        ));

        for soft_limit in [0.0, 1.5, f64::NAN] {
            let config = BudgetConfig {
                soft_limit,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(BudgetError::Config(_))));
        }

        let zero_calls = BudgetConfig {
            max_repeated_calls: 0,
            ..Default::default()
        };
        assert!(zero_calls.validate().is_err());

        let zero_window = BudgetConfig {
            loop_window_seconds: 0.0,
            ..Default::default()
        };
        assert!(zero_window.validate().is_err());
    }
}
