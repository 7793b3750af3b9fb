//! HAProxy configurer.
//!
//! Applying a routing table:
//! 1. Back up the current config to `<config>.bak`
//! 2. Write base config + generated stanzas to `<config>.tmp`
//! 3. Rename the temp file over the config (atomic on the same filesystem)
//! 4. Run the reload script, if one is configured

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::config::HaproxyConfig;
use super::marshal::marshal;
use crate::configurer::Configurer;
use crate::routing_table::RoutingTable;

/// Runs the script that makes HAProxy pick up a new config.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    script_path: PathBuf,
}

impl ScriptRunner {
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        Self {
            script_path: script_path.into(),
        }
    }

    /// Run the script, failing if it exits non-zero.
    pub async fn run(&self) -> Result<()> {
        let output = Command::new(&self.script_path)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.script_path.display()))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        info!(
            script = %self.script_path.display(),
            output = %combined,
            "ran reload script"
        );

        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}",
                self.script_path.display(),
                output.status
            );
        }

        Ok(())
    }
}

/// Writes HAProxy config files and triggers reloads.
pub struct HaproxyConfigurer {
    base_config_path: PathBuf,
    config_path: PathBuf,
    script_runner: Option<ScriptRunner>,
    /// Serializes file writes.
    file_lock: Mutex<()>,
}

impl HaproxyConfigurer {
    /// Create a configurer. Both files must already exist.
    pub fn new(
        base_config_path: impl Into<PathBuf>,
        config_path: impl Into<PathBuf>,
        script_runner: Option<ScriptRunner>,
    ) -> Result<Self> {
        let base_config_path = base_config_path.into();
        let config_path = config_path.into();

        for path in [&base_config_path, &config_path] {
            if !path.exists() {
                anyhow::bail!("Configuration file not found: [{}]", path.display());
            }
        }

        Ok(Self {
            base_config_path,
            config_path,
            script_runner,
            file_lock: Mutex::new(()),
        })
    }

    async fn create_config_backup(&self) -> Result<()> {
        debug!(config_file = %self.config_path.display(), "reading config file");
        let content = fs::read(&self.config_path)
            .await
            .with_context(|| format!("Failed to read {}", self.config_path.display()))?;

        let backup_path = with_suffix(&self.config_path, "bak");
        fs::write(&backup_path, content)
            .await
            .with_context(|| format!("Failed to back up config to {}", backup_path.display()))?;

        Ok(())
    }

    async fn write_config(&self, content: &[u8]) -> Result<()> {
        let tmp_path = with_suffix(&self.config_path, "tmp");
        fs::write(&tmp_path, content)
            .await
            .with_context(|| format!("Failed to write temp file: {}", tmp_path.display()))?;

        fs::rename(&tmp_path, &self.config_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to rename {} -> {}",
                    tmp_path.display(),
                    self.config_path.display()
                )
            })?;

        Ok(())
    }
}

#[async_trait]
impl Configurer for HaproxyConfigurer {
    async fn configure(&self, table: &RoutingTable) -> Result<()> {
        let _guard = self.file_lock.lock().await;

        self.create_config_backup().await?;

        let mut content = fs::read(&self.base_config_path).await.with_context(|| {
            format!(
                "Failed to read base config file: {}",
                self.base_config_path.display()
            )
        })?;

        let haproxy_config = HaproxyConfig::from_routing_table(table);
        content.extend_from_slice(marshal(&haproxy_config).as_bytes());

        info!(num_bytes = content.len(), "writing config");
        self.write_config(&content).await?;

        if let Some(runner) = &self.script_runner {
            info!("running reload script");
            if let Err(e) = runner.run().await {
                error!(error = %e, "failed to run reload script");
                return Err(e);
            }
        }

        Ok(())
    }
}

/// `haproxy.cfg` -> `haproxy.cfg.<suffix>`
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
