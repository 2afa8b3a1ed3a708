/// Service configuration loader - parses nldi.toml
///
/// Keeps deployment settings (listen address, pool sizing, search radius,
/// distance limits, log filter) out of the code so they can be tuned
/// without recompiling. Every section is optional and falls back to the
/// defaults below; the connection string itself comes from the environment
/// (`database.url_env`, `DATABASE_URL` by default).

use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Root configuration structure for TOML parsing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NldiConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub navigation: NavigationConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener and response URL settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public root the response links are built from, e.g.
    /// `https://labs.waterdata.usgs.gov/api/nldi`.
    pub base_url: String,
    /// Request worker threads.
    pub workers: usize,
    /// Exposes the `/admin/sources` routes.
    pub enable_admin: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            base_url: "http://localhost:8080/api/nldi".to_string(),
            workers: 8,
            enable_admin: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Name of the environment variable holding the connection string.
    pub url_env: String,
    pub pool_size: u32,
    pub connection_timeout_secs: u64,
    /// Schemas checked at startup.
    pub schemas: Vec<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            url_env: "DATABASE_URL".to_string(),
            pool_size: 8,
            connection_timeout_secs: 5,
            schemas: vec!["nldi_data".to_string(), "nhdplus".to_string()],
        }
    }
}

/// Navigation, indexing and basin tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Used when a navigation request carries no `distance`.
    pub default_distance_km: f64,
    /// Requested distances above this are capped.
    pub max_distance_km: f64,
    /// Search radius (degrees) for hydrolocation and by-position lookups.
    pub search_radius_deg: f64,
    /// Per-request deadline enforced inside traversals.
    pub request_timeout_secs: u64,
    /// Ramer-Douglas-Peucker tolerance (degrees) for simplified basins.
    pub basin_simplify_tolerance: f64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        NavigationConfig {
            default_distance_km: 9999.0,
            max_distance_km: 9999.0,
            search_radius_deg: 0.1,
            request_timeout_secs: 30,
            basin_simplify_tolerance: 0.0005,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
    /// One JSON object per line instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Configuration loading error
#[derive(Debug)]
pub enum ConfigError {
    /// File could not be read
    ReadFailed { path: String, source: std::io::Error },
    /// File is not valid TOML or has wrongly-typed keys
    ParseFailed { path: String, message: String },
    /// Values parse but make no sense together
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadFailed { path, source } => {
                write!(f, "Failed to read {}: {}\n\n", path, source)?;
                write!(f, "  Pass a config file with --config PATH, or run from the\n")?;
                write!(f, "  directory containing nldi.toml")
            }
            ConfigError::ParseFailed { path, message } => {
                write!(f, "Failed to parse {}: {}\n\n", path, message)?;
                write!(f, "  Known sections: [server], [database], [navigation], [logging]")
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl NldiConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: NldiConfig = toml::from_str(contents).map_err(|e| ConfigError::ParseFailed {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nav = &self.navigation;
        if self.server.workers == 0 {
            return Err(ConfigError::Invalid("server.workers must be at least 1".into()));
        }
        if self.database.pool_size == 0 {
            return Err(ConfigError::Invalid("database.pool_size must be at least 1".into()));
        }
        if !(nav.search_radius_deg > 0.0) {
            return Err(ConfigError::Invalid("navigation.search_radius_deg must be positive".into()));
        }
        if !(nav.max_distance_km > 0.0) || !(nav.default_distance_km > 0.0) {
            return Err(ConfigError::Invalid("navigation distances must be positive".into()));
        }
        if nav.default_distance_km > nav.max_distance_km {
            return Err(ConfigError::Invalid(format!(
                "navigation.default_distance_km ({}) exceeds max_distance_km ({})",
                nav.default_distance_km, nav.max_distance_km
            )));
        }
        if nav.basin_simplify_tolerance < 0.0 {
            return Err(ConfigError::Invalid("navigation.basin_simplify_tolerance must not be negative".into()));
        }
        Ok(())
    }
}

/// Loads configuration from a TOML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<NldiConfig, ConfigError> {
    let path = path.as_ref();
    let display = path.display().to_string();

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
        path: display.clone(),
        source,
    })?;

    let config: NldiConfig = toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed {
        path: display,
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}
