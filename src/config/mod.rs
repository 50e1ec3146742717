//! Configuration module for the osTicket API.
//!
//! All configuration is loaded from environment variables (and an optional `.env` file).

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Where uploaded attachment payloads are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentBackend {
    /// `ost_file_chunk` BLOB rows
    Database,
    /// Files under the given root, referenced from `ost_file`
    Filesystem(PathBuf),
}

/// Connection settings for the osTicket MySQL database.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of the human format
    pub log_json: bool,
    pub attachments: AttachmentBackend,
    /// Request body limit, which bounds attachment uploads
    pub max_upload_bytes: usize,
    /// Take the caller address from the first `X-Forwarded-For` hop
    pub trust_forwarded_for: bool,
}

/// A missing or malformed configuration variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.var, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError {
                    var,
                    message: "must be set".to_string(),
                })
        };

        let database = DatabaseConfig {
            host: required("DB_HOST")?,
            port: parse_or(&lookup, "DB_PORT", 3306)?,
            user: required("DB_USER")?,
            password: required("DB_PASSWORD")?,
            name: required("DB_NAME")?,
            max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            acquire_timeout: Duration::from_secs(parse_or(&lookup, "DB_ACQUIRE_TIMEOUT_SECS", 5)?),
        };

        let bind_addr = match lookup("BIND_ADDR") {
            Some(addr) => addr.parse().map_err(|_| ConfigError {
                var: "BIND_ADDR",
                message: format!("invalid socket address '{}'", addr),
            })?,
            None => {
                let port: u16 = parse_or(&lookup, "PORT", 8080)?;
                SocketAddr::from(([0, 0, 0, 0], port))
            }
        };

        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let log_json = match lookup("LOG_FORMAT").as_deref() {
            None | Some("text") => false,
            Some("json") => true,
            Some(other) => {
                return Err(ConfigError {
                    var: "LOG_FORMAT",
                    message: format!("expected 'text' or 'json', got '{}'", other),
                })
            }
        };

        let attachments = match lookup("ATTACHMENT_STORAGE").as_deref() {
            None | Some("database") => AttachmentBackend::Database,
            Some("filesystem") => AttachmentBackend::Filesystem(required("ATTACHMENT_DIR")?.into()),
            Some(other) => {
                return Err(ConfigError {
                    var: "ATTACHMENT_STORAGE",
                    message: format!("expected 'database' or 'filesystem', got '{}'", other),
                })
            }
        };

        Ok(Self {
            database,
            bind_addr,
            log_level,
            log_json,
            attachments,
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", 32 * 1024 * 1024)?,
            trust_forwarded_for: parse_or(&lookup, "TRUST_X_FORWARDED_FOR", false)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError {
            var,
            message: format!("invalid value '{}'", raw),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const DB_VARS: &[(&str, &str)] = &[
        ("DB_HOST", "db.internal"),
        ("DB_USER", "osticket"),
        ("DB_PASSWORD", "secret"),
        ("DB_NAME", "osticket"),
    ];

    #[test]
    fn test_default_config() {
        let config = Config::from_lookup(lookup_from(DB_VARS)).unwrap();

        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.log_level, "info");
        assert!(!config.log_json);
        assert_eq!(config.attachments, AttachmentBackend::Database);
        assert_eq!(config.max_upload_bytes, 32 * 1024 * 1024);
        assert!(!config.trust_forwarded_for);
    }

    #[test]
    fn test_missing_database_variable() {
        let err = Config::from_lookup(lookup_from(&[
            ("DB_HOST", "localhost"),
            ("DB_USER", "osticket"),
            ("DB_NAME", "osticket"),
        ]))
        .unwrap_err();

        assert_eq!(err.var, "DB_PASSWORD");
    }

    #[test]
    fn test_port_and_bind_addr() {
        let mut vars = DB_VARS.to_vec();
        vars.push(("PORT", "9000"));
        let config = Config::from_lookup(lookup_from(&vars)).unwrap();
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:9000");

        vars.push(("BIND_ADDR", "127.0.0.1:7000"));
        let config = Config::from_lookup(lookup_from(&vars)).unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:7000");
    }

    #[test]
    fn test_invalid_port() {
        let mut vars = DB_VARS.to_vec();
        vars.push(("DB_PORT", "not-a-port"));
        let err = Config::from_lookup(lookup_from(&vars)).unwrap_err();
        assert_eq!(err.var, "DB_PORT");
    }

    #[test]
    fn test_filesystem_storage_requires_dir() {
        let mut vars = DB_VARS.to_vec();
        vars.push(("ATTACHMENT_STORAGE", "filesystem"));
        let err = Config::from_lookup(lookup_from(&vars)).unwrap_err();
        assert_eq!(err.var, "ATTACHMENT_DIR");

        vars.push(("ATTACHMENT_DIR", "/var/lib/osticket/files"));
        let config = Config::from_lookup(lookup_from(&vars)).unwrap();
        assert_eq!(
            config.attachments,
            AttachmentBackend::Filesystem(PathBuf::from("/var/lib/osticket/files"))
        );
    }

    #[test]
    fn test_json_logging_and_forwarded_for() {
        let mut vars = DB_VARS.to_vec();
        vars.push(("LOG_FORMAT", "json"));
        vars.push(("TRUST_X_FORWARDED_FOR", "true"));
        let config = Config::from_lookup(lookup_from(&vars)).unwrap();
        assert!(config.log_json);
        assert!(config.trust_forwarded_for);
    }

    #[test]
    fn test_password_redacted_in_debug() {
        let config = Config::from_lookup(lookup_from(DB_VARS)).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret"));
    }
}
