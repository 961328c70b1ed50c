//! Application configuration for Armory.
//!
//! User config lives at `~/.armory/armory.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ArmoryError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "armory.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".armory";

// ---------------------------------------------------------------------------
// Config structs (matching armory.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP listener.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database location.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Source site fetching.
    #[serde(default)]
    pub scrape: ScrapeConfig,

    /// Sketchfab model lookup.
    #[serde(default)]
    pub sketchfab: SketchfabConfig,

    /// Task scheduling and timeouts.
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
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

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    5000
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the libSQL database file. `~` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.armory/armory.db".into()
}

impl DatabaseConfig {
    /// Resolve the configured path, expanding a leading `~`.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        expand_home(&self.path)
    }
}

/// `[scrape]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Site root per country; `{country}` is substituted.
    #[serde(default = "default_base_url_template")]
    pub base_url_template: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            base_url_template: default_base_url_template(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_base_url_template() -> String {
    "https://www.warpower{country}.com".into()
}
fn default_user_agent() -> String {
    format!("armory/{}", env!("CARGO_PKG_VERSION"))
}
fn default_request_timeout() -> u64 {
    20
}

/// `[sketchfab]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SketchfabConfig {
    #[serde(default = "default_sketchfab_api")]
    pub api_base: String,

    /// Name of the env var holding the API token (never store the token itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Minimum spacing between lookups, shared by all running tasks.
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,

    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_secs: u64,
}

impl Default for SketchfabConfig {
    fn default() -> Self {
        Self {
            api_base: default_sketchfab_api(),
            api_key_env: default_api_key_env(),
            min_interval_ms: default_min_interval(),
            lookup_timeout_secs: default_lookup_timeout(),
        }
    }
}

fn default_sketchfab_api() -> String {
    "https://api.sketchfab.com".into()
}
fn default_api_key_env() -> String {
    "SKETCHFAB_API_KEY".into()
}
fn default_min_interval() -> u64 {
    500
}
fn default_lookup_timeout() -> u64 {
    10
}

impl SketchfabConfig {
    /// Token from the configured env var, if set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Tasks allowed to run at the same time.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Accepted tasks waiting for a slot before submissions are refused.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_extract_timeout")]
    pub extract_timeout_secs: u64,

    #[serde(default = "default_persist_timeout")]
    pub persist_timeout_secs: u64,

    /// How long finished tasks stay queryable.
    #[serde(default = "default_task_ttl")]
    pub task_ttl_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
            extract_timeout_secs: default_extract_timeout(),
            persist_timeout_secs: default_persist_timeout(),
            task_ttl_secs: default_task_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_max_concurrent() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    32
}
fn default_extract_timeout() -> u64 {
    60
}
fn default_persist_timeout() -> u64 {
    30
}
fn default_task_ttl() -> u64 {
    3600
}
fn default_sweep_interval() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration with durations resolved.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_concurrent: usize,
    pub queue_capacity: usize,
    pub extract_timeout: Duration,
    pub enrich_timeout: Duration,
    pub persist_timeout: Duration,
    pub task_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        let p = &config.pipeline;
        Self {
            max_concurrent: p.max_concurrent.max(1),
            queue_capacity: p.queue_capacity.max(1),
            extract_timeout: Duration::from_secs(p.extract_timeout_secs),
            enrich_timeout: Duration::from_secs(config.sketchfab.lookup_timeout_secs),
            persist_timeout: Duration::from_secs(p.persist_timeout_secs),
            task_ttl: Duration::from_secs(p.task_ttl_secs),
            sweep_interval: Duration::from_secs(p.sweep_interval_secs.max(1)),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.armory/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| ArmoryError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.armory/armory.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ArmoryError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ArmoryError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ArmoryError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| ArmoryError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ArmoryError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~` or `~/` to the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            let home = dirs::home_dir()
                .ok_or_else(|| ArmoryError::config("could not determine home directory"))?;
            Ok(home.join(rest.trim_start_matches('/')))
        }
        _ => Ok(PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let toml_str = toml::to_string_pretty(&AppConfig::default()).expect("serialize default");
        assert!(toml_str.contains("[pipeline]"));
        assert!(toml_str.contains("SKETCHFAB_API_KEY"));
        assert!(toml_str.contains("warpower{country}"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let toml_str = r#"
[server]
port = 8080

[pipeline]
max_concurrent = 2
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.pipeline.max_concurrent, 2);
        assert_eq!(config.pipeline.task_ttl_secs, 3600);
        assert_eq!(config.sketchfab.min_interval_ms, 500);
    }

    #[test]
    fn pipeline_config_resolves_durations() {
        let mut app = AppConfig::default();
        app.pipeline.max_concurrent = 0;
        app.sketchfab.lookup_timeout_secs = 3;
        let runtime = PipelineConfig::from(&app);
        assert_eq!(runtime.max_concurrent, 1);
        assert_eq!(runtime.enrich_timeout, Duration::from_secs(3));
        assert_eq!(runtime.task_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn missing_api_key_env_yields_none() {
        let config = SketchfabConfig {
            api_key_env: "ARMORY_TEST_NONEXISTENT_KEY_12345".into(),
            ..SketchfabConfig::default()
        };
        assert!(config.api_key().is_none());
    }

    #[test]
    fn expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/tmp/a.db").unwrap(), PathBuf::from("/tmp/a.db"));
        assert_eq!(expand_home("~user/a.db").unwrap(), PathBuf::from("~user/a.db"));
    }

    #[test]
    fn invalid_file_reports_path() {
        let path = std::env::temp_dir().join(format!("armory_cfg_{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[server]\nport = \"nope\"\n").expect("write");
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
        let _ = std::fs::remove_file(&path);
    }
}
