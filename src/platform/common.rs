use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[cfg(windows)]
use std::fs::OpenOptions;

/// Atomically write content to a file
///
/// Writes to a temporary file in the same directory, syncs it, then renames
/// it over the target path.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory_exists(parent)?;
    }

    let temp_path = path.with_extension("tmp");

    {
        let mut file = File::create(&temp_path).with_context(|| {
            format!("Failed to create temporary file: {}", temp_path.display())
        })?;

        file.write_all(content)
            .context("Failed to write to temporary file")?;

        file.sync_all().context("Failed to sync file to disk")?;
    }

    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}

/// Ensure a directory exists, creating it and all parents if needed
pub fn ensure_directory_exists(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }

    Ok(())
}

/// Check if running with administrator/root privileges
///
/// Ending other users' sessions needs them.
pub fn ensure_admin_privileges() -> Result<()> {
    #[cfg(unix)]
    {
        let euid = unsafe { libc::geteuid() };
        if euid != 0 {
            anyhow::bail!(
                "This program must be run as root or with sudo. Current EUID: {}",
                euid
            );
        }
    }

    #[cfg(windows)]
    {
        // Only Administrators (and SYSTEM) can write to the system temp directory
        let test_path = std::path::PathBuf::from(r"C:\Windows\Temp\session-budget-test.tmp");
        match OpenOptions::new().write(true).create(true).open(&test_path) {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
            }
            Err(_) => {
                anyhow::bail!(
                    "This program must be run as Administrator or as the LocalSystem service account."
                );
            }
        }
    }

    Ok(())
}
