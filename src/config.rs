//! Service configuration loaded from the environment
//!
//! All knobs come from environment variables (optionally seeded from a `.env`
//! file by the binary). `from_lookup` takes the lookup as a closure so tests
//! never touch the process environment.

use crate::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Width used when the caller asks for a single tall page.
pub const SINGLE_PAGE_WIDTH: u32 = 3000;
/// Device scale factor used when the caller asks for a single tall page.
pub const SINGLE_PAGE_SCALE: f64 = 1.5;

/// Basic-auth credential pair used against the dashboard server
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// `user:password`, the form passed to the worker
    pub fn joined(&self) -> String {
        format!("{}:{}", self.user, self.password)
    }

    /// Split a `user:password` string at the first colon.
    pub fn parse(joined: &str) -> Result<Self> {
        let (user, password) = joined
            .split_once(':')
            .ok_or_else(|| Error::InvalidRequest("credentials must be user:password".into()))?;
        Ok(Self::new(user, password))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where generated files live and how long they are kept
#[derive(Debug, Clone, PartialEq)]
pub struct OutputStore {
    /// Output directory, also served under `/output`
    pub dir: PathBuf,
    /// Age after which generated files are swept
    pub ttl: Duration,
    /// Period of the retention sweep
    pub sweep_interval: Duration,
}

impl OutputStore {
    /// Output store settings alone; they don't need credentials.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Ok(Self {
            dir: get("OUTPUT_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("output")),
            ttl: Duration::from_secs(parse_or(&get, "OUTPUT_TTL_SECS", 3600)?),
            sweep_interval: Duration::from_secs(parse_or(&get, "SWEEP_INTERVAL_SECS", 3600)?),
        })
    }
}

/// Configuration for the render service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Dashboard credentials
    pub credentials: Credentials,
    /// Host name that replaces loopback hosts in request URLs
    pub internal_host: String,
    /// HTTP listening port
    pub port: u16,
    /// Page width for full dashboards
    pub dashboard_width: u32,
    /// Page width for single panels
    pub panel_width: u32,
    /// Device scale factor for high quality renders
    pub high_quality_scale: f64,
    /// Blind wait after navigation for client-side drawing
    pub render_wait: Duration,
    /// Navigation bound inside the worker
    pub navigation_timeout: Duration,
    /// Hard ceiling for a whole request
    pub request_timeout: Duration,
    /// Output Store location and retention
    pub store: OutputStore,
}

impl ServiceConfig {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let user = get("GRAFANA_USER");
        let password = get("GRAFANA_PASSWORD");
        let credentials = match (user, password) {
            (Some(user), Some(password)) => Credentials::new(user, password),
            _ => {
                return Err(Error::ConfigError(
                    "GRAFANA_USER and GRAFANA_PASSWORD must be set".into(),
                ))
            }
        };

        Ok(Self {
            credentials,
            internal_host: get("GRAFANA_HOST").unwrap_or_else(|| "host.docker.internal".to_string()),
            port: parse_or(&get, "EXPORT_SERVER_PORT", 3001)?,
            dashboard_width: parse_or(&get, "PDF_WIDTH_PX", 2400)?,
            panel_width: parse_or(&get, "PANEL_WIDTH_PX", 1200)?,
            high_quality_scale: parse_or(&get, "DEVICE_SCALE_FACTOR", 2.0)?,
            render_wait: Duration::from_millis(parse_or(&get, "RENDER_TIMEOUT", 30_000)?),
            navigation_timeout: Duration::from_millis(parse_or(&get, "NAVIGATION_TIMEOUT", 120_000)?),
            request_timeout: Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 300)?),
            store: OutputStore::from_lookup(&lookup)?,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::ConfigError(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(default),
    }
}
