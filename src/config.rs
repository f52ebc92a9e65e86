use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use dotenvy::dotenv;
use log::LevelFilter;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Extensions a page link must end with to be considered downloadable.
pub const SUPPORTED_EXTENSIONS: [&str; 10] = [
    ".pdf", ".xlsx", ".xls", ".doc", ".docx", ".html", ".htm", ".zip", ".csv", ".txt",
];

/// Parameter triples run by the automatic (scheduled) mining.
pub const AUTOMATIC_PRESETS: [(&str, &str, &str); 3] = [
    ("Pequena", "SP", "Tecnologia"),
    ("Média", "RJ", "Saúde"),
    ("Micro", "MG", "Serviços"),
];

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: LevelFilter,
    pub file: PathBuf,
}

/// Runtime configuration, sourced from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub interval: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub max_results: usize,
    pub request_delay: Duration,
    pub storage_path: PathBuf,
    pub storage_max_size_mb: u64,
    pub log: LogSettings,
    pub proxy: Option<String>,
    pub cleanup_retention_days: u64,
    pub cleanup_at: NaiveTime,
    pub statistics_at: NaiveTime,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interval: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(300),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_results: 100,
            request_delay: Duration::from_secs(2),
            storage_path: PathBuf::from("./storage"),
            storage_max_size_mb: 1024,
            log: LogSettings {
                level: LevelFilter::Info,
                file: PathBuf::from("./logs/minerador.log"),
            },
            proxy: None,
            cleanup_retention_days: 30,
            cleanup_at: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or(NaiveTime::MIN),
            statistics_at: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        // .env is optional
        let _ = dotenv();
        let defaults = Config::default();

        let use_proxy = env_or("USE_PROXY", "false".to_string())?.eq_ignore_ascii_case("true");
        let proxy = if use_proxy {
            let host = env_or("PROXY_HOST", String::new())?;
            let port = env_or("PROXY_PORT", String::new())?;
            if host.is_empty() || port.is_empty() {
                log::warn!("USE_PROXY is set but PROXY_HOST/PROXY_PORT are missing; ignoring proxy");
                None
            } else {
                Some(format!("http://{}:{}", host, port))
            }
        } else {
            None
        };

        Ok(Config {
            interval: Duration::from_secs(env_or("AGENTE_INTERVALO", 3600u64)?),
            request_timeout: Duration::from_secs(env_or("AGENTE_TIMEOUT", 300u64)?),
            user_agent: env_or("AGENTE_USER_AGENT", defaults.user_agent)?,
            max_results: env_or("BUSCA_MAX_RESULTADOS", defaults.max_results)?,
            request_delay: Duration::from_secs(env_or("BUSCA_DELAY_ENTRE_REQUESTS", 2u64)?),
            storage_path: env_or("STORAGE_PATH", defaults.storage_path)?,
            storage_max_size_mb: env_or("STORAGE_MAX_SIZE_MB", defaults.storage_max_size_mb)?,
            log: LogSettings {
                level: env_or("LOG_LEVEL", defaults.log.level)?,
                file: env_or("LOG_FILE", defaults.log.file)?,
            },
            proxy,
            cleanup_retention_days: env_or("CLEANUP_RETENTION_DAYS", defaults.cleanup_retention_days)?,
            cleanup_at: time_of_day("CLEANUP_AT", defaults.cleanup_at)?,
            statistics_at: time_of_day("STATISTICS_AT", defaults.statistics_at)?,
        })
    }

    /// Per-surface cap for one query: the result budget is split across three surfaces.
    pub fn results_per_surface(&self) -> usize {
        self.max_results / 3
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        _ => Ok(default),
    }
}

fn time_of_day(key: &str, default: NaiveTime) -> Result<NaiveTime> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .with_context(|| format!("{} must be HH:MM, got {:?}", key, raw)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.interval, Duration::from_secs(3600));
        assert_eq!(config.results_per_surface(), 33);
        assert_eq!(config.cleanup_retention_days, 30);
        assert_eq!(config.cleanup_at, NaiveTime::from_hms_opt(2, 0, 0).unwrap());
        assert_eq!(config.statistics_at, NaiveTime::from_hms_opt(6, 0, 0).unwrap());
        assert!(config.proxy.is_none());
    }

    #[test]
    fn env_or_parses_and_rejects() {
        env::set_var("MINER_TEST_NUMBER", "42");
        assert_eq!(env_or("MINER_TEST_NUMBER", 1u64).unwrap(), 42);

        env::set_var("MINER_TEST_BAD_NUMBER", "forty-two");
        assert!(env_or("MINER_TEST_BAD_NUMBER", 1u64).is_err());

        assert_eq!(env_or("MINER_TEST_UNSET_KEY", 7u64).unwrap(), 7);
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        env::set_var("MINER_TEST_LEVEL", "debug");
        assert_eq!(env_or("MINER_TEST_LEVEL", LevelFilter::Info).unwrap(), LevelFilter::Debug);
    }

    #[test]
    fn time_of_day_requires_hh_mm() {
        env::set_var("MINER_TEST_TIME", "03:30");
        assert_eq!(
            time_of_day("MINER_TEST_TIME", NaiveTime::MIN).unwrap(),
            NaiveTime::from_hms_opt(3, 30, 0).unwrap()
        );
        env::set_var("MINER_TEST_BAD_TIME", "late");
        assert!(time_of_day("MINER_TEST_BAD_TIME", NaiveTime::MIN).is_err());
    }
}
