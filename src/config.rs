use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::telegram::DEFAULT_API_BASE;

const DEFAULT_WORKSHEET: &str = "Changes Log";
const DEFAULT_USERS_FILE: &str = "users.json";
const DEFAULT_HEALTH_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 100;
const DEFAULT_POLL_MAX_FAILURES: u32 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Where the changes log lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogBackend {
    Sheets {
        /// Service-account key JSON
        credentials: String,
        spreadsheet_id: String,
        worksheet: String,
    },
    Sqlite {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub telegram_token: String,
    pub telegram_api_base: String,
    pub admin_id: i64,
    pub log_backend: LogBackend,
    pub users_file: PathBuf,
    pub health_addr: SocketAddr,
    pub chart_font: Option<PathBuf>,
    pub poll_timeout: Duration,
    pub poll_max_failures: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let telegram_token = require("TELEGRAM_BOT_TOKEN")?;
        let admin_id = parse_var("ADMIN_ID", &require("ADMIN_ID")?)?;

        let log_backend = match get("LOG_BACKEND").as_deref().unwrap_or("sheets") {
            "sheets" => LogBackend::Sheets {
                credentials: require("GOOGLE_CREDENTIALS")?,
                spreadsheet_id: require("SPREADSHEET_ID")?,
                worksheet: get("LOG_WORKSHEET").unwrap_or_else(|| DEFAULT_WORKSHEET.to_string()),
            },
            "sqlite" => LogBackend::Sqlite {
                path: PathBuf::from(require("LOG_SQLITE_PATH")?),
            },
            other => {
                return Err(ConfigError::Invalid {
                    name: "LOG_BACKEND",
                    reason: format!("unknown backend '{other}', expected sheets or sqlite"),
                })
            }
        };

        let health_addr = get("HEALTH_ADDR").unwrap_or_else(|| DEFAULT_HEALTH_ADDR.to_string());
        let poll_timeout_secs = match get("POLL_TIMEOUT_SECS") {
            Some(raw) => parse_var("POLL_TIMEOUT_SECS", &raw)?,
            None => DEFAULT_POLL_TIMEOUT_SECS,
        };
        let poll_max_failures: u32 = match get("POLL_MAX_FAILURES") {
            Some(raw) => parse_var("POLL_MAX_FAILURES", &raw)?,
            None => DEFAULT_POLL_MAX_FAILURES,
        };
        if poll_max_failures == 0 {
            return Err(ConfigError::Invalid {
                name: "POLL_MAX_FAILURES",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            telegram_token,
            telegram_api_base: get("TELEGRAM_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            admin_id,
            log_backend,
            users_file: PathBuf::from(get("USERS_FILE").unwrap_or_else(|| DEFAULT_USERS_FILE.to_string())),
            health_addr: parse_var("HEALTH_ADDR", &health_addr)?,
            chart_font: get("CHART_FONT_PATH").map(PathBuf::from),
            poll_timeout: Duration::from_secs(poll_timeout_secs),
            poll_max_failures,
        })
    }
}

fn parse_var<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("TELEGRAM_BOT_TOKEN", "123:abc"),
        ("ADMIN_ID", "929686990"),
        ("GOOGLE_CREDENTIALS", "{}"),
        ("SPREADSHEET_ID", "sheet"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(BASE)).unwrap();
        assert_eq!(config.admin_id, 929686990);
        assert_eq!(config.users_file, PathBuf::from("users.json"));
        assert_eq!(config.telegram_api_base, DEFAULT_API_BASE);
        assert_eq!(config.health_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.poll_timeout, Duration::from_secs(100));
        assert_eq!(config.poll_max_failures, 5);
        assert_eq!(config.chart_font, None);
        assert_eq!(
            config.log_backend,
            LogBackend::Sheets {
                credentials: "{}".to_string(),
                spreadsheet_id: "sheet".to_string(),
                worksheet: "Changes Log".to_string(),
            }
        );
    }

    #[test]
    fn test_each_required_variable_is_fatal() {
        for missing in ["TELEGRAM_BOT_TOKEN", "ADMIN_ID", "GOOGLE_CREDENTIALS", "SPREADSHEET_ID"] {
            let vars: Vec<(&str, &str)> = BASE.iter().copied().filter(|(k, _)| *k != missing).collect();
            assert_eq!(
                Config::from_lookup(lookup(&vars)),
                Err(ConfigError::Missing(missing))
            );
        }
    }

    #[test]
    fn test_blank_is_missing() {
        let mut vars = BASE.to_vec();
        vars.push(("TELEGRAM_BOT_TOKEN", "   "));
        let vars: Vec<_> = vars.into_iter().skip(1).collect();
        assert_eq!(
            Config::from_lookup(lookup(&vars)),
            Err(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))
        );
    }

    #[test]
    fn test_admin_id_must_be_numeric() {
        let mut vars = BASE.to_vec();
        vars[1] = ("ADMIN_ID", "admin");
        assert!(matches!(
            Config::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid { name: "ADMIN_ID", .. })
        ));
    }

    #[test]
    fn test_sqlite_backend() {
        let vars = [
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("ADMIN_ID", "1"),
            ("LOG_BACKEND", "sqlite"),
            ("LOG_SQLITE_PATH", "/tmp/changes.db"),
        ];
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(
            config.log_backend,
            LogBackend::Sqlite { path: PathBuf::from("/tmp/changes.db") }
        );

        let vars = [("TELEGRAM_BOT_TOKEN", "123:abc"), ("ADMIN_ID", "1"), ("LOG_BACKEND", "sqlite")];
        assert_eq!(
            Config::from_lookup(lookup(&vars)),
            Err(ConfigError::Missing("LOG_SQLITE_PATH"))
        );
    }

    #[test]
    fn test_unknown_backend_and_bad_numbers() {
        let mut vars = BASE.to_vec();
        vars.push(("LOG_BACKEND", "csv"));
        assert!(matches!(
            Config::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid { name: "LOG_BACKEND", .. })
        ));

        let mut vars = BASE.to_vec();
        vars.push(("POLL_MAX_FAILURES", "0"));
        assert!(matches!(
            Config::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid { name: "POLL_MAX_FAILURES", .. })
        ));

        let mut vars = BASE.to_vec();
        vars.push(("HEALTH_ADDR", "localhost"));
        assert!(matches!(
            Config::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid { name: "HEALTH_ADDR", .. })
        ));
    }
}
