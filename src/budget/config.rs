use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Main budget configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BudgetConfig {
    /// Daily allotment in minutes per OS username.
    ///
    /// Kept as raw YAML values so one malformed entry does not reject the
    /// whole file; see [`BudgetConfig::allotments`].
    #[serde(default)]
    pub users: BTreeMap<String, serde_yaml::Value>,

    /// Enforcement settings
    #[serde(default)]
    pub enforcement: EnforcementConfig,

    /// Session watcher settings
    #[serde(default)]
    pub watcher: WatcherConfig,
}

/// Enforcement configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EnforcementConfig {
    /// How a session is ended once its budget runs out
    #[serde(default)]
    pub strategy: TerminationStrategy,
}

/// Action taken against a session whose budget is exhausted
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminationStrategy {
    /// Lock the session back to the logon screen
    Lock,
    /// Log the session off
    #[default]
    Logoff,
    /// Try to lock, log off if locking fails
    LockThenLogoff,
}

/// Session watcher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherConfig {
    /// Seconds between session list polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    5
}

impl BudgetConfig {
    /// Parse config from a YAML string and validate it
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: BudgetConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML")?;

        validate_config(&config)?;

        Ok(config)
    }

    /// Valid `username -> minutes` pairs.
    ///
    /// Entries whose value is not a non-negative integer (or a string holding
    /// one) are skipped with a warning.
    pub fn allotments(&self) -> Vec<(String, u32)> {
        self.users
            .iter()
            .filter_map(|(user, value)| match parse_minutes(value) {
                Some(minutes) => Some((user.clone(), minutes)),
                None => {
                    warn!("Skipping user '{}': invalid daily minutes {:?}", user, value);
                    None
                }
            })
            .collect()
    }

    fn has_valid_user(&self) -> bool {
        self.users.values().any(|value| parse_minutes(value).is_some())
    }
}

fn parse_minutes(value: &serde_yaml::Value) -> Option<u32> {
    match value {
        serde_yaml::Value::Number(n) => n.as_u64().and_then(|m| u32::try_from(m).ok()),
        serde_yaml::Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

/// Get the platform-specific config file path
pub fn get_config_path() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/etc/session-budget/budget.yaml"))
    }

    #[cfg(target_os = "macos")]
    {
        Ok(PathBuf::from(
            "/Library/Application Support/session-budget/budget.yaml",
        ))
    }

    #[cfg(target_os = "windows")]
    {
        let mut path = PathBuf::from(
            std::env::var("ProgramData")
                .unwrap_or_else(|_| "C:\\ProgramData".to_string()),
        );
        path.push("session-budget");
        path.push("budget.yaml");
        Ok(path)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        anyhow::bail!("Unsupported operating system");
    }
}

/// Load configuration from YAML file
pub fn load_config(path: &Path) -> Result<BudgetConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    BudgetConfig::from_yaml_str(&content)
        .with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Validate configuration
pub fn validate_config(config: &BudgetConfig) -> Result<()> {
    if !config.has_valid_user() {
        anyhow::bail!("Configuration must specify at least one user with a valid daily allotment");
    }

    if config.watcher.poll_interval == 0 {
        anyhow::bail!("watcher.poll_interval must be at least 1 second");
    }

    Ok(())
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# Daily screen-time budgets, in minutes, per OS account.
# Budgets reset at the first logon or unlock of each calendar day.
users:
  alice: 60
  bob: 90

enforcement:
  # lock | logoff | lock_then_logoff
  strategy: logoff

watcher:
  # Seconds between session list polls
  poll_interval: 5
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    #[test]
    fn test_example_config_is_valid() {
        let config = BudgetConfig::from_yaml_str(EXAMPLE_CONFIG).unwrap();
        assert_eq!(
            config.allotments(),
            vec![("alice".to_string(), 60), ("bob".to_string(), 90)]
        );
        assert_eq!(config.enforcement.strategy, TerminationStrategy::Logoff);
        assert_eq!(config.watcher.poll_interval, 5);
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let yaml = r#"
users:
  alice: 30
  bob: "45"
  carol: lots
  dave: -5
  erin: 1.5
"#;
        let config = BudgetConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(
            config.allotments(),
            vec![("alice".to_string(), 30), ("bob".to_string(), 45)]
        );
    }

    #[test]
    fn test_zero_minutes_is_a_valid_allotment() {
        let config = BudgetConfig::from_yaml_str("users:\n  alice: 0\n").unwrap();
        assert_eq!(config.allotments(), vec![("alice".to_string(), 0)]);
    }

    #[test]
    fn test_validate_config_requires_users() {
        assert!(BudgetConfig::from_yaml_str("users: {}\n").is_err());
        assert!(BudgetConfig::from_yaml_str("users:\n  alice: nope\n").is_err());
    }

    #[test]
    fn test_validate_config_rejects_zero_poll_interval() {
        let yaml = "users:\n  alice: 10\nwatcher:\n  poll_interval: 0\n";
        assert!(BudgetConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_strategy_parsing() {
        let yaml = "users:\n  alice: 10\nenforcement:\n  strategy: lock_then_logoff\n";
        let config = BudgetConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.enforcement.strategy, TerminationStrategy::LockThenLogoff);

        let yaml = "users:\n  alice: 10\nenforcement:\n  strategy: shutdown\n";
        assert!(BudgetConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("budget.yaml");
        file.write_str("users:\n  alice: 30\n").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.allotments(), vec![("alice".to_string(), 30)]);
    }

    #[test]
    fn test_load_config_missing_file_is_fatal() {
        let temp = assert_fs::TempDir::new().unwrap();
        let missing = temp.child("nope.yaml");

        let err = load_config(missing.path()).unwrap_err();
        let message = format!("{:#}", err);
        assert!(predicate::str::contains("Failed to read config file").eval(&message));
    }
}
