use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, RotorError};
use crate::proxy::validator::ProbeStrategy;
use crate::request::delay::DelayRange;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxy pool configuration
    pub pool: PoolConfig,
    /// Proxy validation configuration
    pub validator: ValidatorConfig,
    /// Request executor configuration
    pub executor: ExecutorConfig,
    /// Logging configuration
    pub log: LogConfig,
    /// Newline separated proxy list read at startup
    pub proxy_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            validator: ValidatorConfig::default(),
            executor: ExecutorConfig::default(),
            log: LogConfig::default(),
            proxy_file: "proxies.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum time between two uses of the same endpoint
    pub cooldown: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(300_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Endpoints validated concurrently per batch
    pub batch_size: usize,
    /// Pause between two batches
    pub batch_pause: Duration,
    /// Upper bound for a single probe
    pub probe_timeout: Duration,
    /// Probe strategies, tried in order until one succeeds
    pub strategies: Vec<ProbeStrategy>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_pause: Duration::from_millis(1_000),
            probe_timeout: Duration::from_secs(30),
            strategies: ProbeStrategy::default_chain(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Total attempts per logical operation
    pub max_attempts: u32,
    /// Timeout for one send
    pub request_timeout: Duration,
    /// Pause before every send
    pub humanized_delay: DelayRange,
    /// Extra random noise added on top of the humanized delay
    pub jitter: Duration,
    /// Backoff range for the first retry; later retries scale it by the attempt number
    pub backoff: DelayRange,
    /// Ceiling for the scaled backoff
    pub backoff_cap: Duration,
    /// Wait when the pool has no endpoint at all
    pub empty_pool_wait: DelayRange,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            request_timeout: Duration::from_secs(30),
            humanized_delay: DelayRange::from_millis(4_000, 8_000),
            jitter: Duration::from_millis(1_000),
            backoff: DelayRange::from_millis(5_000, 10_000),
            backoff_cap: Duration::from_secs(60),
            empty_pool_wait: DelayRange::from_millis(30_000, 60_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = ExecutorConfig::default();

        Ok(Config {
            pool: PoolConfig {
                cooldown: Duration::from_millis(parse_env("ROTOR_POOL_COOLDOWN_MS", 300_000)?),
            },
            validator: ValidatorConfig {
                batch_size: parse_env::<usize>("ROTOR_VALIDATE_BATCH_SIZE", 10)?.max(1),
                batch_pause: Duration::from_millis(parse_env(
                    "ROTOR_VALIDATE_BATCH_PAUSE_MS",
                    1_000,
                )?),
                probe_timeout: Duration::from_secs(parse_env("ROTOR_PROBE_TIMEOUT_SECS", 30)?),
                strategies: parse_strategies()?,
            },
            executor: ExecutorConfig {
                max_attempts: parse_env::<u32>("ROTOR_MAX_ATTEMPTS", 3)?.max(1),
                request_timeout: Duration::from_secs(parse_env(
                    "ROTOR_REQUEST_TIMEOUT_SECS",
                    30,
                )?),
                humanized_delay: parse_range("ROTOR_HUMANIZED_DELAY_MS", defaults.humanized_delay)?,
                jitter: Duration::from_millis(parse_env("ROTOR_JITTER_MS", 1_000)?),
                backoff: parse_range("ROTOR_BACKOFF_MS", defaults.backoff)?,
                backoff_cap: Duration::from_millis(parse_env("ROTOR_BACKOFF_CAP_MS", 60_000)?),
                empty_pool_wait: parse_range("ROTOR_EMPTY_POOL_WAIT_MS", defaults.empty_pool_wait)?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
            proxy_file: get_env_or("ROTOR_PROXY_FILE", "proxies.txt"),
        })
    }
}

/// Parse `ROTOR_PROBE_URLS`; an empty value keeps the built-in chain
fn parse_strategies() -> Result<Vec<ProbeStrategy>> {
    let raw = env::var("ROTOR_PROBE_URLS").unwrap_or_default();
    let entries: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if entries.is_empty() {
        return Ok(ProbeStrategy::default_chain());
    }

    entries
        .into_iter()
        .map(|entry| {
            ProbeStrategy::parse(entry).map_err(|e| {
                RotorError::InvalidConfig(format!("ROTOR_PROBE_URLS entry '{}': {}", entry, e))
            })
        })
        .collect()
}

/// Parse a `min-max` millisecond range
fn parse_range(key: &str, default: DelayRange) -> Result<DelayRange> {
    let Ok(raw) = env::var(key) else {
        return Ok(default);
    };

    let invalid = || RotorError::InvalidConfig(format!("{} must look like '<min>-<max>'", key));

    let (min, max) = raw.trim().split_once('-').ok_or_else(invalid)?;
    let min: u64 = min.trim().parse().map_err(|_| invalid())?;
    let max: u64 = max.trim().parse().map_err(|_| invalid())?;
    if min > max {
        return Err(RotorError::InvalidConfig(format!(
            "{} min must not exceed max",
            key
        )));
    }

    Ok(DelayRange::from_millis(min, max))
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RotorError::InvalidConfig(format!("{} must be a valid number", key))),
        Err(_) => Ok(default),
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const CONFIG_ENV_KEYS: &[&str] = &[
        "ROTOR_POOL_COOLDOWN_MS",
        "ROTOR_VALIDATE_BATCH_SIZE",
        "ROTOR_VALIDATE_BATCH_PAUSE_MS",
        "ROTOR_PROBE_TIMEOUT_SECS",
        "ROTOR_PROBE_URLS",
        "ROTOR_MAX_ATTEMPTS",
        "ROTOR_REQUEST_TIMEOUT_SECS",
        "ROTOR_HUMANIZED_DELAY_MS",
        "ROTOR_JITTER_MS",
        "ROTOR_BACKOFF_MS",
        "ROTOR_BACKOFF_CAP_MS",
        "ROTOR_EMPTY_POOL_WAIT_MS",
        "ROTOR_PROXY_FILE",
        "LOG_LEVEL",
        "LOG_FORMAT",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();

        assert_eq!(config.pool.cooldown, Duration::from_millis(300_000));
        assert_eq!(config.validator.batch_size, 10);
        assert_eq!(config.validator.strategies, ProbeStrategy::default_chain());
        assert_eq!(config.executor.max_attempts, 3);
        assert_eq!(
            config.executor.empty_pool_wait,
            DelayRange::from_millis(30_000, 60_000)
        );
        assert_eq!(config.log.level, "info");
        assert_eq!(config.proxy_file, "proxies.txt");
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("ROTOR_POOL_COOLDOWN_MS", "1000");
        env::set_var("ROTOR_VALIDATE_BATCH_SIZE", "0");
        env::set_var("ROTOR_MAX_ATTEMPTS", "5");
        env::set_var("ROTOR_BACKOFF_MS", "100-200");
        env::set_var(
            "ROTOR_PROBE_URLS",
            "tunnel+http://echo.example/ip, https://echo.example/json",
        );
        env::set_var("LOG_FORMAT", "json");

        let config = Config::from_env().unwrap();

        assert_eq!(config.pool.cooldown, Duration::from_millis(1000));
        assert_eq!(config.validator.batch_size, 1);
        assert_eq!(config.executor.max_attempts, 5);
        assert_eq!(config.executor.backoff, DelayRange::from_millis(100, 200));
        assert_eq!(
            config.validator.strategies,
            vec![
                ProbeStrategy::Tunnel {
                    url: "http://echo.example/ip".to_string()
                },
                ProbeStrategy::Json {
                    url: "https://echo.example/json".to_string()
                },
            ]
        );
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_config_default_matches_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let from_env = Config::from_env().unwrap();
        let default = Config::default();
        assert_eq!(from_env.proxy_file, default.proxy_file);
        assert_eq!(from_env.pool.cooldown, default.pool.cooldown);
        assert_eq!(from_env.executor.backoff, default.executor.backoff);
        assert_eq!(from_env.validator.probe_timeout, default.validator.probe_timeout);
    }

    #[test]
    fn test_config_from_env_invalid_number() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("ROTOR_MAX_ATTEMPTS", "three");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, RotorError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_invalid_range() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("ROTOR_HUMANIZED_DELAY_MS", "900-100");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            RotorError::InvalidConfig(_)
        ));

        env::set_var("ROTOR_HUMANIZED_DELAY_MS", "fast");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            RotorError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_config_from_env_invalid_probe_url() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("ROTOR_PROBE_URLS", "tunnel+https://echo.example/ip");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            RotorError::InvalidConfig(_)
        ));
    }
}
