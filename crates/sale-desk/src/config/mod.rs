use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub sales: SaleDeskConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            sales: SaleDeskConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

const DEFAULT_AUTOSAVE_INTERVAL_SECS: u64 = 30;
const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_REQUIRED_FIELDS: &str = "/property/address,/parties/seller/name";
const DEFAULT_REDUCED_MANAGEMENT_CAP: f64 = 4.0;
const DEFAULT_MANAGEMENT_CAP: f64 = 5.0;

/// Product-tuned thresholds for the sale record workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleDeskConfig {
    /// How often a saved draft is checked for unsaved changes.
    pub autosave_interval: Duration,
    /// Upper bound applied to every write against the persistence service.
    pub write_timeout: Duration,
    /// JSON pointers into a serialized record that must be non-empty before a write.
    pub required_fields: Vec<String>,
    /// Manager tax ids that receive the reduced management cap. Deployments must
    /// set `SALE_REDUCED_CAP_TAX_IDS`; with an empty list every manager gets the
    /// default cap.
    pub reduced_cap_tax_ids: Vec<String>,
    pub reduced_management_cap: f64,
    pub default_management_cap: f64,
}

impl Default for SaleDeskConfig {
    fn default() -> Self {
        Self {
            autosave_interval: Duration::from_secs(DEFAULT_AUTOSAVE_INTERVAL_SECS),
            write_timeout: Duration::from_secs(DEFAULT_WRITE_TIMEOUT_SECS),
            required_fields: split_list(DEFAULT_REQUIRED_FIELDS),
            reduced_cap_tax_ids: Vec::new(),
            reduced_management_cap: DEFAULT_REDUCED_MANAGEMENT_CAP,
            default_management_cap: DEFAULT_MANAGEMENT_CAP,
        }
    }
}

impl SaleDeskConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let autosave_interval =
            seconds_var("SALE_AUTOSAVE_INTERVAL_SECS", defaults.autosave_interval)?;
        let write_timeout = seconds_var("SALE_WRITE_TIMEOUT_SECS", defaults.write_timeout)?;

        let required_fields = match env::var("SALE_REQUIRED_FIELDS") {
            Ok(raw) => split_list(&raw),
            Err(_) => defaults.required_fields,
        };
        if let Some(bad) = required_fields.iter().find(|field| !field.starts_with('/')) {
            return Err(ConfigError::InvalidFieldPointer { value: bad.clone() });
        }

        let reduced_cap_tax_ids = env::var("SALE_REDUCED_CAP_TAX_IDS")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();

        let reduced_management_cap = percent_var(
            "SALE_REDUCED_MANAGEMENT_CAP",
            defaults.reduced_management_cap,
        )?;
        let default_management_cap =
            percent_var("SALE_DEFAULT_MANAGEMENT_CAP", defaults.default_management_cap)?;

        Ok(Self {
            autosave_interval,
            write_timeout,
            required_fields,
            reduced_cap_tax_ids,
            reduced_management_cap,
            default_management_cap,
        })
    }

    /// Settings that load but are likely misconfigured for production.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.reduced_cap_tax_ids.is_empty() {
            warnings.push(
                "SALE_REDUCED_CAP_TAX_IDS is empty; every manager receives the default cap"
                    .to_string(),
            );
        }
        warnings
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn seconds_var(variable: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let Ok(raw) = env::var(variable) else {
        return Ok(default);
    };
    let secs = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidNumber {
            variable,
            value: raw.clone(),
        })?;
    if secs == 0 {
        return Err(ConfigError::ZeroDuration { variable });
    }
    Ok(Duration::from_secs(secs))
}

fn percent_var(variable: &'static str, default: f64) -> Result<f64, ConfigError> {
    let Ok(raw) = env::var(variable) else {
        return Ok(default);
    };
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && (0.0..=100.0).contains(&value) => Ok(value),
        _ => Err(ConfigError::InvalidNumber {
            variable,
            value: raw,
        }),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str, value: String },
    ZeroDuration { variable: &'static str },
    InvalidFieldPointer { value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable, value } => {
                write!(f, "{variable} has an unusable value '{value}'")
            }
            ConfigError::ZeroDuration { variable } => {
                write!(f, "{variable} must be at least one second")
            }
            ConfigError::InvalidFieldPointer { value } => write!(
                f,
                "SALE_REQUIRED_FIELDS entry '{value}' must be a JSON pointer starting with '/'"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}
