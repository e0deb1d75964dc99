use crate::error::{EnrichError, Result};
use log::info;
use std::time::Duration;

pub const DEFAULT_SEMRUSH_ENDPOINT: &str = "https://api.semrush.com";
pub const DEFAULT_SERPSTAT_ENDPOINT: &str = "https://api.serpstat.com/v3";

/// Provider credentials and endpoints, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub semrush_token: Option<String>,
    pub serpstat_token: Option<String>,
    pub semrush_endpoint: String,
    pub serpstat_endpoint: String,
    /// Requests per second allowed against the SERPstat API.
    pub serpstat_rps: f64,
    /// Optional timeout for rank API requests. `None` blocks indefinitely.
    pub rank_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            semrush_token: None,
            serpstat_token: None,
            semrush_endpoint: DEFAULT_SEMRUSH_ENDPOINT.to_string(),
            serpstat_endpoint: DEFAULT_SERPSTAT_ENDPOINT.to_string(),
            serpstat_rps: 1.0,
            rank_timeout: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let serpstat_rps = match std::env::var("SERPSTAT_RPS") {
            Ok(raw) => {
                let rps: f64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| EnrichError::Config(format!("SERPSTAT_RPS is not a number: {raw}")))?;
                if rps <= 0.0 {
                    return Err(EnrichError::Config("SERPSTAT_RPS must be positive".to_string()));
                }
                rps
            }
            Err(_) => defaults.serpstat_rps,
        };

        let rank_timeout = match std::env::var("RANK_TIMEOUT_SECS") {
            Ok(raw) => Some(Duration::from_secs(raw.trim().parse().map_err(|_| {
                EnrichError::Config(format!("RANK_TIMEOUT_SECS is not an integer: {raw}"))
            })?)),
            Err(_) => None,
        };

        let config = Self {
            semrush_token: non_empty_var("SEMRUSH_TOKEN"),
            serpstat_token: non_empty_var("SERPSTAT_TOKEN"),
            semrush_endpoint: non_empty_var("SEMRUSH_ENDPOINT").unwrap_or(defaults.semrush_endpoint),
            serpstat_endpoint: non_empty_var("SERPSTAT_ENDPOINT")
                .unwrap_or(defaults.serpstat_endpoint),
            serpstat_rps,
            rank_timeout,
        };

        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        fn preview(val: &Option<String>) -> String {
            match val {
                Some(v) => {
                    let n = v.chars().count().min(4);
                    format!("{}...({} chars)", v.chars().take(n).collect::<String>(), v.len())
                }
                None => "<not set>".to_string(),
            }
        }

        info!(
            "Config loaded: semrush={} ({}), serpstat={} ({}), serpstat_rps={}",
            self.semrush_endpoint,
            preview(&self.semrush_token),
            self.serpstat_endpoint,
            preview(&self.serpstat_token),
            self.serpstat_rps
        );
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
