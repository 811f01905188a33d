use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use orgdir_core::ids::MAX_NODE_ID;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub request: RequestConfig,
    pub ids: IdsConfig,
    pub bootstrap: BootstrapConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdsConfig {
    pub node_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub enabled: bool,
    pub root_tenant_name: String,
    pub root_owner_id: i64,
    pub root_department_name: String,
    pub admin_username: String,
    pub admin_full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost:5432/orgdir".to_string(),
            max_connections: 10,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

impl Default for IdsConfig {
    fn default() -> Self {
        Self { node_id: 1 }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root_tenant_name: "platform".to_string(),
            root_owner_id: 1,
            root_department_name: "headquarters".to_string(),
            admin_username: "admin".to_string(),
            admin_full_name: "Platform Administrator".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e.to_string()))?;
            toml::from_str::<AppConfig>(&contents)
                .map_err(|e| ConfigError::ParseToml(e.to_string()))?
        } else {
            AppConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ORGDIR_HTTP_HOST") {
            self.http.host = v;
        }
        if let Ok(v) = std::env::var("ORGDIR_HTTP_PORT")
            && let Ok(port) = v.parse()
        {
            self.http.port = port;
        }
        if let Ok(v) = std::env::var("ORGDIR_STORAGE_BACKEND") {
            match v.as_str() {
                "memory" => self.storage.backend = StorageBackend::Memory,
                "postgres" => self.storage.backend = StorageBackend::Postgres,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("ORGDIR_DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("ORGDIR_DATABASE_MAX_CONNECTIONS")
            && let Ok(n) = v.parse()
        {
            self.database.max_connections = n;
        }
        if let Ok(v) = std::env::var("ORGDIR_REQUEST_TIMEOUT_MS")
            && let Ok(n) = v.parse()
        {
            self.request.timeout_ms = n;
        }
        if let Ok(v) = std::env::var("ORGDIR_IDS_NODE_ID")
            && let Ok(n) = v.parse()
        {
            self.ids.node_id = n;
        }
        if let Ok(v) = std::env::var("ORGDIR_BOOTSTRAP_ENABLED")
            && let Ok(enabled) = v.parse()
        {
            self.bootstrap.enabled = enabled;
        }
        if let Ok(v) = std::env::var("ORGDIR_BOOTSTRAP_ADMIN_USERNAME") {
            self.bootstrap.admin_username = v;
        }
        if let Ok(v) = std::env::var("ORGDIR_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Ok(v) = std::env::var("ORGDIR_LOG_FORMAT") {
            match v.as_str() {
                "json" => self.log.format = LogFormat::Json,
                "pretty" => self.log.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.http.port == 0 {
            return Err(ConfigError::Validation(
                "http.port must be non-zero".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be non-zero".to_string(),
            ));
        }
        if self.request.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "request.timeout_ms must be non-zero".to_string(),
            ));
        }
        if !(0..=MAX_NODE_ID).contains(&self.ids.node_id) {
            return Err(ConfigError::Validation(format!(
                "ids.node_id must be between 0 and {MAX_NODE_ID}"
            )));
        }
        let names = [
            ("bootstrap.root_tenant_name", &self.bootstrap.root_tenant_name),
            (
                "bootstrap.root_department_name",
                &self.bootstrap.root_department_name,
            ),
            ("bootstrap.admin_username", &self.bootstrap.admin_username),
        ];
        if let Some((field, _)) = names.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(ConfigError::Validation(format!("{field} must not be empty")));
        }
        Ok(())
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request.timeout_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    ReadFile(String, String),

    #[error("failed to parse TOML config: {0}")]
    ParseToml(String),

    #[error("config validation failed: {0}")]
    Validation(String),
}
