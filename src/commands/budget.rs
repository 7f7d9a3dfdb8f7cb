use anyhow::{Context, Result};
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::budget::config::{get_config_path, load_config, BudgetConfig, EXAMPLE_CONFIG};
use crate::budget::{
    CountdownScheduler, NativeSessions, SessionBudgetEngine, SessionWatcher, UserBudgetStore,
};
use crate::platform::common::{atomic_write, ensure_admin_privileges};

/// Resolve `--config`, falling back to the platform default
pub fn resolve_config_path(config: Option<PathBuf>) -> Result<PathBuf> {
    match config {
        Some(path) => Ok(path),
        None => get_config_path(),
    }
}

/// Write the example configuration file
pub fn init(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {}\nUse --force to overwrite",
            output.display()
        );
    }

    atomic_write(&output, EXAMPLE_CONFIG.as_bytes())
        .with_context(|| format!("Failed to write config file: {}", output.display()))?;

    println!("✓ Created budget configuration file: {}", output.display());
    println!("\nEdit this file to set the daily minutes for each account,");
    println!("then start enforcement: sudo session-budget run");

    Ok(())
}

/// Load and validate the configuration, then print what would be enforced
pub fn check_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    print_summary(path, &config);
    Ok(())
}

fn print_summary(path: &Path, config: &BudgetConfig) {
    println!("Budget Configuration");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("File:          {}", path.display());
    println!("Strategy:      {:?}", config.enforcement.strategy);
    println!("Poll interval: {} seconds", config.watcher.poll_interval);
    println!();

    let allotments = config.allotments();
    println!("Managed users ({}):", allotments.len());
    for (user, minutes) in &allotments {
        println!("  {:<20} {} minutes/day", user, minutes);
    }

    let skipped = config.users.len() - allotments.len();
    if skipped > 0 {
        println!();
        println!("⚠ {} entr{} skipped (see warnings above)", skipped, if skipped == 1 { "y" } else { "ies" });
    }
}

/// Enforce budgets until interrupted
pub fn run(path: &Path) -> Result<()> {
    ensure_admin_privileges()?;

    let config = load_config(path).context("Failed to load budget configuration")?;
    let store = UserBudgetStore::from_allotments(config.allotments(), Local::now().date_naive());

    tracing::info!(
        "Enforcing daily budgets for {} user(s) using {:?}",
        store.len(),
        config.enforcement.strategy
    );
    for user in store.usernames() {
        tracing::debug!("Managed user: {}", user);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let host = Arc::new(NativeSessions);
        let engine = SessionBudgetEngine::new(
            store,
            host.clone(),
            Arc::new(CountdownScheduler::new()),
            config.enforcement.strategy,
        );
        let watcher = SessionWatcher::new(
            host,
            engine.clone(),
            Duration::from_secs(config.watcher.poll_interval),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher_task = tokio::spawn(async move { watcher.run(shutdown_rx).await });

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        tracing::info!("Shutting down");

        let _ = shutdown_tx.send(true);
        watcher_task.await.context("Session watcher panicked")?;

        for active in engine.active_sessions().await {
            tracing::info!(
                "Session {} of '{}' was still counting down",
                active.session_id,
                active.username
            );
        }

        for (user, budget) in engine.budgets().await {
            tracing::info!(
                "{}: {}/{} minutes left for {}",
                user,
                budget.remaining_minutes,
                budget.default_minutes,
                budget.day
            );
        }

        Ok::<(), anyhow::Error>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_writes_loadable_config() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("budget.yaml");

        init(path.clone(), false).unwrap();
        assert!(check_config(&path).is_ok());
    }

    #[test]
    fn test_init_refuses_to_overwrite_without_force() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("budget.yaml");
        std::fs::write(&path, "users:\n  alice: 5\n").unwrap();

        assert!(init(path.clone(), false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "users:\n  alice: 5\n");

        init(path.clone(), true).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), EXAMPLE_CONFIG);
    }

    #[test]
    fn test_check_config_missing_file_fails() {
        let temp_dir = tempdir().unwrap();
        assert!(check_config(&temp_dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let path = PathBuf::from("custom.yaml");
        assert_eq!(resolve_config_path(Some(path.clone())).unwrap(), path);
    }
}
