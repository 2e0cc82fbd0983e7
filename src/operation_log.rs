use anyhow::Result;
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Log file name
const OPERATION_LOG_FILE: &str = "operation_log.txt";

/// Get the directory where app data is stored (same as settings)
pub fn app_data_dir() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        let app_dir = config_dir.join("token-migrator");
        if !app_dir.exists() {
            let _ = fs::create_dir_all(&app_dir);
        }
        app_dir
    } else {
        // Fall back to current directory
        PathBuf::from(".")
    }
}

/// Append-only, human-readable record of confirmed migration operations.
#[derive(Debug, Clone)]
pub struct OperationLog {
    path: PathBuf,
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::at(app_data_dir().join(OPERATION_LOG_FILE))
    }
}

impl OperationLog {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a structured log entry describing a user-requested operation.
    pub fn append(&self, operation: &str, chain_id: u64, details: impl AsRef<str>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let timestamp = Utc::now().to_rfc3339();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(
            file,
            "[{}] chain_id={} operation={}",
            timestamp, chain_id, operation
        )?;

        let body = details.as_ref();
        if body.trim().is_empty() {
            writeln!(file, "  (no additional details)")?;
        } else {
            for line in body.lines() {
                if line.trim().is_empty() {
                    writeln!(file)?;
                } else {
                    writeln!(file, "  {}", line)?;
                }
            }
        }

        writeln!(file)?;
        Ok(())
    }

    /// Read the entire log file content
    pub fn read(&self) -> Result<String> {
        if self.path.exists() {
            Ok(fs::read_to_string(&self.path)?)
        } else {
            Ok(String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_log(name: &str) -> OperationLog {
        let dir = std::env::temp_dir().join(format!(
            "token-migrator-test-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        OperationLog::at(dir.join(OPERATION_LOG_FILE))
    }

    #[test]
    fn test_read_missing_log_is_empty() {
        let log = scratch_log("missing");
        assert_eq!(log.read().unwrap(), "");
    }

    #[test]
    fn test_append_writes_header_and_indented_body() {
        let log = scratch_log("append");
        log.append("Transfer", 1, "token: DAI\n\ntx: 0xabc").unwrap();
        log.append("Send", 10, "").unwrap();

        let content = log.read().unwrap();
        assert!(content.contains("chain_id=1 operation=Transfer"));
        assert!(content.contains("  token: DAI\n\n  tx: 0xabc"));
        assert!(content.contains("chain_id=10 operation=Send"));
        assert!(content.contains("(no additional details)"));

        if let Some(parent) = log.path().parent() {
            let _ = fs::remove_dir_all(parent);
        }
    }
}
