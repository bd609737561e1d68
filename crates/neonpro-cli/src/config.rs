//! `neonpro.toml` configuration.

use neonpro_audit::{AuditStore, JsonlAuditStore, MemoryAuditStore, SqliteAuditStore};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct NeonproConfig {
    /// Root directory for the audit log and saved reports.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub reports: ReportsConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SecurityConfig {
    /// Keys accepted by the gateway. Empty disables auth.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditBackend {
    /// Lost on exit; for local experiments only.
    Memory,
    #[default]
    Jsonl,
    Sqlite,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub backend: AuditBackend,
}

#[derive(Debug, Deserialize)]
pub struct ReportsConfig {
    /// Save every generated report under `<data_dir>/reports`.
    #[serde(default = "default_true")]
    pub persist: bool,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self { persist: true }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_true() -> bool {
    true
}

impl NeonproConfig {
    /// Parse a config file.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let config_str = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        let mut config: NeonproConfig = toml::from_str(&config_str)?;
        config.apply_env();
        Ok(config)
    }

    /// `NEONPRO_API_KEYS` (comma separated) adds to the configured keys.
    fn apply_env(&mut self) {
        if let Ok(keys) = std::env::var("NEONPRO_API_KEYS") {
            self.security.api_keys.extend(
                keys.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string),
            );
        }
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }

    /// Open the configured audit store.
    pub async fn open_audit_store(&self) -> anyhow::Result<Arc<dyn AuditStore>> {
        let dir = self.data_dir.join("audit");
        let store: Arc<dyn AuditStore> = match self.audit.backend {
            AuditBackend::Memory => Arc::new(MemoryAuditStore::new()),
            AuditBackend::Jsonl => Arc::new(JsonlAuditStore::new(dir.join("audit.jsonl")).await?),
            AuditBackend::Sqlite => Arc::new(SqliteAuditStore::open(dir.join("audit.db"))?),
        };
        Ok(store)
    }
}
