use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::snapshot::DEFAULT_ACTIVITY_LIMIT;
use crate::store::DEFAULT_COMMIT_ATTEMPTS;

/// Env var overriding where `config.toml` is read from.
pub const CONFIG_PATH_ENV: &str = "OPSDASH_CONFIG";

const DEV_PROJECT_ID: &str = "opsdash-dev";
const DEV_CLIENT_EMAIL: &str = "dashboard@opsdash-dev.local";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    #[default]
    Development,
    Production,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token required on `/api/*`. Unset leaves the API open.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            token: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Attempts a conditional read-modify-write makes before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_project_id")]
    pub project_id: String,
    #[serde(default = "default_client_email")]
    pub client_email: String,
    #[serde(default)]
    pub private_key: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            db_path: default_db_path(),
            max_attempts: default_max_attempts(),
            project_id: default_project_id(),
            client_email: default_client_email(),
            private_key: String::new(),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = if self.private_key.is_empty() {
            "<empty>"
        } else {
            "<redacted>"
        };
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("db_path", &self.db_path)
            .field("max_attempts", &self.max_attempts)
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key", &key)
            .finish()
    }
}

fn default_db_path() -> String {
    "opsdash.db".to_string()
}
fn default_max_attempts() -> u32 {
    DEFAULT_COMMIT_ATTEMPTS
}
fn default_project_id() -> String {
    DEV_PROJECT_ID.to_string()
}
fn default_client_email() -> String {
    DEV_CLIENT_EMAIL.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    /// Most recent activity entries included in a snapshot.
    #[serde(default = "default_activity_limit")]
    pub activity_limit: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            activity_limit: default_activity_limit(),
        }
    }
}

fn default_activity_limit() -> usize {
    DEFAULT_ACTIVITY_LIMIT
}

/// `$OPSDASH_CONFIG`, or `config.toml` in the working directory.
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

impl AppConfig {
    /// Read `path` (all defaults when it doesn't exist), apply environment
    /// overrides and validate.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<AppConfig>(&content)?
        } else {
            info!("No config at {}, using defaults", path.display());
            AppConfig::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from the environment. `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(db_path) = lookup("OPSDASH_DB_PATH").filter(|v| !v.is_empty()) {
            self.store.db_path = db_path;
        }
        if let Some(project_id) = lookup("STORE_PROJECT_ID").filter(|v| !v.is_empty()) {
            self.store.project_id = project_id;
        }
        if let Some(email) = lookup("STORE_CLIENT_EMAIL").filter(|v| !v.is_empty()) {
            self.store.client_email = email;
        }
        if let Some(key) = lookup("STORE_PRIVATE_KEY") {
            // Keys pasted into env files carry escaped newlines.
            self.store.private_key = key.replace("\\n", "\n");
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.store.max_attempts == 0 {
            anyhow::bail!("store.max_attempts must be at least 1");
        }
        if self.dashboard.activity_limit == 0 {
            anyhow::bail!("dashboard.activity_limit must be at least 1");
        }
        if self.profile == Profile::Production {
            if self.store.project_id == DEV_PROJECT_ID {
                anyhow::bail!("production profile requires store.project_id (or STORE_PROJECT_ID)");
            }
            if self.store.client_email == DEV_CLIENT_EMAIL {
                anyhow::bail!(
                    "production profile requires store.client_email (or STORE_CLIENT_EMAIL)"
                );
            }
            if self.store.private_key.trim().is_empty() {
                anyhow::bail!("production profile requires store.private_key (or STORE_PRIVATE_KEY)");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.profile, Profile::Development);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store.db_path, "opsdash.db");
        assert_eq!(config.store.max_attempts, 5);
        assert_eq!(config.dashboard.activity_limit, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sections_override_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 8080
            token = "abc"

            [store]
            backend = "memory"
            max_attempts = 9

            [dashboard]
            activity_limit = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.token.as_deref(), Some("abc"));
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.max_attempts, 9);
        assert_eq!(config.dashboard.activity_limit, 50);
        assert_eq!(config.server.bind, "127.0.0.1");
    }

    #[test]
    fn env_overrides_and_unescapes_key() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[
            ("OPSDASH_DB_PATH", "/tmp/dash.db"),
            ("STORE_PROJECT_ID", "acme-prod"),
            ("STORE_PRIVATE_KEY", "-----BEGIN-----\\nabc\\n-----END-----"),
        ]));
        assert_eq!(config.store.db_path, "/tmp/dash.db");
        assert_eq!(config.store.project_id, "acme-prod");
        assert_eq!(config.store.client_email, DEV_CLIENT_EMAIL);
        assert_eq!(config.store.private_key, "-----BEGIN-----\nabc\n-----END-----");
    }

    #[test]
    fn production_rejects_development_credentials() {
        let mut config: AppConfig = toml::from_str(r#"profile = "production""#).unwrap();
        assert!(config.validate().is_err());

        config.apply_env(env(&[
            ("STORE_PROJECT_ID", "acme-prod"),
            ("STORE_CLIENT_EMAIL", "svc@acme.example"),
        ]));
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("private_key"), "{err}");

        config.apply_env(env(&[("STORE_PRIVATE_KEY", "secret")]));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let config: AppConfig = toml::from_str("[store]\nmax_attempts = 0").unwrap();
        assert!(config.validate().is_err());
        let config: AppConfig = toml::from_str("[dashboard]\nactivity_limit = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_output_hides_private_key() {
        let mut config = AppConfig::default();
        config.store.private_key = "super-secret-key".to_string();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret-key"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(AppConfig::load(&path).is_err());
    }
}
