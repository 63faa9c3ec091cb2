use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

use crate::error::OdmError;

const SCHEMES: [&str; 2] = ["mongodb://", "mongodb+srv://"];

/// Configuration loaded from the process environment
pub trait EnvConfig: Sized {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self, ConfigError>;

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError>;

    /// Where each setting came from, for debugging
    fn config_sources(&self) -> HashMap<String, ConfigSource>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    EnvVar(String),
    Default(String),
}

/// Write acknowledgement requested from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteConcern {
    Nodes(u32),
    Majority,
}

impl Default for WriteConcern {
    fn default() -> Self {
        WriteConcern::Nodes(1)
    }
}

impl FromStr for WriteConcern {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("majority") {
            return Ok(WriteConcern::Majority);
        }
        s.trim()
            .parse::<u32>()
            .map(WriteConcern::Nodes)
            .map_err(|_| ConfigError::InvalidValue {
                field: "write_concern".to_string(),
                value: s.to_string(),
                expected: "a node count or 'majority'".to_string(),
            })
    }
}

impl fmt::Display for WriteConcern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteConcern::Nodes(n) => write!(f, "{}", n),
            WriteConcern::Majority => write!(f, "majority"),
        }
    }
}

/// Connection and binding settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OdmConfig {
    /// Connection string, always carrying a `mongodb://` style scheme
    pub url: String,
    /// Database name; read from the connection string path when unset
    pub database: Option<String>,
    pub write_concern: WriteConcern,
    /// Create unique indexes for unique attributes when binding a model
    pub ensure_indexes: bool,
    /// Limit applied to `all` when the caller gives none
    pub default_limit: Option<i64>,
}

impl Default for OdmConfig {
    fn default() -> Self {
        Self {
            url: "mongodb://localhost:27017".to_string(),
            database: None,
            write_concern: WriteConcern::default(),
            ensure_indexes: true,
            default_limit: None,
        }
    }
}

impl OdmConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: normalize_url(url),
            ..Default::default()
        }
    }

    pub fn with_database(mut self, name: impl Into<String>) -> Self {
        self.database = Some(name.into());
        self
    }

    pub fn with_write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = write_concern;
        self
    }

    pub fn with_ensure_indexes(mut self, ensure_indexes: bool) -> Self {
        self.ensure_indexes = ensure_indexes;
        self
    }

    pub fn with_default_limit(mut self, limit: i64) -> Self {
        self.default_limit = Some(limit);
        self
    }

    /// Configured database name, else the first path segment of the URL
    pub fn database_name(&self) -> Option<String> {
        self.database
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| database_from_url(&self.url))
    }
}

impl EnvConfig for OdmConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let url = get_env_required("ODM_DATABASE_URL")?;
        let database = get_env_optional("ODM_DATABASE_NAME");

        let write_concern = get_env_or_default("ODM_WRITE_CONCERN", "1")?;
        let write_concern = write_concern.parse::<WriteConcern>()?;

        let ensure_indexes = get_env_or_default("ODM_ENSURE_INDEXES", "true")?;
        let ensure_indexes = parse_bool("ensure_indexes", &ensure_indexes)?;

        let default_limit = match get_env_optional("ODM_DEFAULT_LIMIT") {
            Some(limit) => Some(limit.parse::<i64>().map_err(|_| ConfigError::InvalidValue {
                field: "default_limit".to_string(),
                value: limit,
                expected: "a positive integer".to_string(),
            })?),
            None => None,
        };

        Ok(OdmConfig {
            url: normalize_url(&url),
            database,
            write_concern,
            ensure_indexes,
            default_limit,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() || SCHEMES.contains(&self.url.as_str()) {
            return Err(ConfigError::ValidationFailed {
                field: "url".to_string(),
                reason: "Connection string cannot be empty".to_string(),
            });
        }

        if self.database_name().is_none() {
            return Err(ConfigError::ValidationFailed {
                field: "database".to_string(),
                reason: "No database name configured or present in the connection string".to_string(),
            });
        }

        // duplicate key errors are only reported for acknowledged writes
        if self.write_concern == WriteConcern::Nodes(0) {
            return Err(ConfigError::ValidationFailed {
                field: "write_concern".to_string(),
                reason: "Writes must be acknowledged".to_string(),
            });
        }

        if let Some(limit) = self.default_limit {
            if limit <= 0 {
                return Err(ConfigError::InvalidValue {
                    field: "default_limit".to_string(),
                    value: limit.to_string(),
                    expected: "a positive integer".to_string(),
                });
            }
        }

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        sources.insert("url".to_string(), ConfigSource::EnvVar("ODM_DATABASE_URL".to_string()));
        sources.insert("database".to_string(), ConfigSource::EnvVar("ODM_DATABASE_NAME".to_string()));
        sources.insert("write_concern".to_string(), ConfigSource::EnvVar("ODM_WRITE_CONCERN".to_string()));
        sources.insert("ensure_indexes".to_string(), ConfigSource::EnvVar("ODM_ENSURE_INDEXES".to_string()));
        sources.insert("default_limit".to_string(), ConfigSource::EnvVar("ODM_DEFAULT_LIMIT".to_string()));
        sources
    }
}

/// Prepend `mongodb://` unless the string already carries a scheme
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    if SCHEMES.iter().any(|scheme| raw.starts_with(scheme)) {
        raw.to_string()
    } else {
        format!("{}{}", SCHEMES[0], raw)
    }
}

fn database_from_url(url: &str) -> Option<String> {
    // seed lists ("a:1,b:2") are not valid URL hosts, fall back to slicing
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => {
            let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
            let rest = rest.split('?').next().unwrap_or("");
            rest.find('/').map(|slash| rest[slash..].to_string()).unwrap_or_default()
        }
    };

    path.trim_start_matches('/')
        .split('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: "true or false".to_string(),
        }),
    }
}

fn get_env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar {
        var: key.to_string(),
    })
}

fn get_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn get_env_or_default(key: &str, default: &str) -> Result<String, ConfigError> {
    Ok(env::var(key).unwrap_or_else(|_| default.to_string()))
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Validation failed for {field}: {reason}")]
    ValidationFailed { field: String, reason: String },
}

impl From<ConfigError> for OdmError {
    fn from(err: ConfigError) -> Self {
        OdmError::Configuration(err.to_string())
    }
}
