use std::{env, fmt::Display, str::FromStr, time::Duration};

use anyhow::{anyhow, Context};
use tracing::{info, warn};

pub struct Config {
    pub api_base_url: String,
    pub timeout: Duration,
    pub origin: Option<String>,
}

impl Config {
    pub fn load(api_url: Option<String>) -> anyhow::Result<Self> {
        let api_base_url = match api_url {
            Some(url) => url,
            None => env::var("ATTENDANCE_API_URL")
                .context("ATTENDANCE_API_URL must be set to the attendance API gateway URL")?,
        };
        if !api_base_url.starts_with("http://") && !api_base_url.starts_with("https://") {
            return Err(anyhow!("API URL must start with http:// or https://, got {api_base_url}"));
        }

        Ok(Self {
            api_base_url,
            timeout: Duration::from_secs(try_load("ATTENDANCE_HTTP_TIMEOUT_SECS", "30")?),
            origin: var("ATTENDANCE_ORIGIN").ok(),
        })
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key)
        .map(|value| value.trim().to_string())
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or(())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        anyhow!("invalid {key} value '{raw}': {e}")
    })
}
