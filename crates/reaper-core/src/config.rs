use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;

use crate::enrich::DEFAULT_MAX_RETRIES;
use crate::error::AppError;
use crate::proxy::ProxyRotator;
use crate::scheduler::SchedulerConfig;

/// Runtime settings for the scheduler and its remote clients.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub proxy_enabled: bool,
    pub proxies: Vec<String>,
    pub tick_interval: Duration,
    pub dispatch_window: TimeDelta,
    pub max_concurrent_jobs: usize,
    pub enrichment_max_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        let scheduler = SchedulerConfig::default();
        Self {
            proxy_enabled: false,
            proxies: Vec::new(),
            tick_interval: scheduler.tick_interval,
            dispatch_window: scheduler.dispatch_window,
            max_concurrent_jobs: scheduler.max_concurrent_jobs,
            enrichment_max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl Settings {
    /// Read settings from environment variables. All are optional.
    ///
    /// - `REAPER_PROXY_ENABLED` (bool, defaults to false)
    /// - `REAPER_PROXIES` (comma-separated proxy endpoints)
    /// - `REAPER_TICK_INTERVAL_SECS` (defaults to 60)
    /// - `REAPER_DISPATCH_WINDOW_SECS` (defaults to 60)
    /// - `REAPER_MAX_CONCURRENT_JOBS` (defaults to 5)
    /// - `REAPER_ENRICHMENT_MAX_RETRIES` (defaults to 3)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let proxy_enabled = match lookup("REAPER_PROXY_ENABLED") {
            None => defaults.proxy_enabled,
            Some(raw) => parse_bool("REAPER_PROXY_ENABLED", &raw)?,
        };

        let proxies: Vec<String> = lookup("REAPER_PROXIES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let tick_interval = match lookup("REAPER_TICK_INTERVAL_SECS") {
            None => defaults.tick_interval,
            Some(raw) => Duration::from_secs(parse_positive("REAPER_TICK_INTERVAL_SECS", &raw)?),
        };

        let dispatch_window = match lookup("REAPER_DISPATCH_WINDOW_SECS") {
            None => defaults.dispatch_window,
            Some(raw) => TimeDelta::seconds(parse_positive("REAPER_DISPATCH_WINDOW_SECS", &raw)?),
        };

        let max_concurrent_jobs = match lookup("REAPER_MAX_CONCURRENT_JOBS") {
            None => defaults.max_concurrent_jobs,
            Some(raw) => parse_positive("REAPER_MAX_CONCURRENT_JOBS", &raw)?,
        };

        let enrichment_max_retries = match lookup("REAPER_ENRICHMENT_MAX_RETRIES") {
            None => defaults.enrichment_max_retries,
            Some(raw) => raw.trim().parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid REAPER_ENRICHMENT_MAX_RETRIES '{raw}': must be a non-negative integer"
                ))
            })?,
        };

        if proxy_enabled && proxies.is_empty() {
            tracing::warn!("REAPER_PROXY_ENABLED is set but REAPER_PROXIES is empty");
        }

        Ok(Self {
            proxy_enabled,
            proxies,
            tick_interval,
            dispatch_window,
            max_concurrent_jobs,
            enrichment_max_retries,
        })
    }

    pub fn proxy_rotator(&self) -> ProxyRotator {
        ProxyRotator::from_endpoints(self.proxies.iter().cloned())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: self.tick_interval,
            dispatch_window: self.dispatch_window,
            max_concurrent_jobs: self.max_concurrent_jobs,
        }
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(AppError::ConfigError(format!(
            "Invalid {key} '{raw}': expected true or false"
        ))),
    }
}

fn parse_positive<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: FromStr + PartialOrd + Default,
{
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(AppError::ConfigError(format!(
            "Invalid {key} '{raw}': must be a positive integer"
        ))),
    }
}
