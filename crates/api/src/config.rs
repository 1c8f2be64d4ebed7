use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use arttic_pipeline::SimulatorConfig;
use axum::http::HeaderValue;

/// A configuration value that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Which accelerator the server drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceleratorKind {
    /// The bundled CPU simulator.
    Simulated,
    /// No device: every load fails with "device unavailable".
    None,
}

impl FromStr for AcceleratorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" => Ok(AcceleratorKind::Simulated),
            "none" => Ok(AcceleratorKind::None),
            other => Err(format!("expected 'simulated' or 'none', got '{other}'")),
        }
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local use.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `127.0.0.1`).
    pub host: IpAddr,
    /// Bind port (default: `7860`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Upper bound on draining connections and the worker at shutdown.
    pub shutdown_timeout_secs: u64,
    pub models_dir: PathBuf,
    pub loras_dir: PathBuf,
    pub outputs_dir: PathBuf,
    /// Access token for gated model repositories.
    pub hf_token: Option<String>,
    pub accelerator: AcceleratorKind,
    /// Artificial delay per denoising step of the simulator.
    pub step_delay_ms: u64,
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                   | Default                 |
    /// |---------------------------|-------------------------|
    /// | `HOST`                    | `127.0.0.1`             |
    /// | `PORT`                    | `7860`                  |
    /// | `CORS_ORIGINS`            | `http://localhost:7860` |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`   | `10`                    |
    /// | `MODELS_DIR`              | `./models`              |
    /// | `LORAS_DIR`               | `./loras`               |
    /// | `OUTPUTS_DIR`             | `./outputs`             |
    /// | `HF_TOKEN`                | unset                   |
    /// | `ACCELERATOR`             | `simulated`             |
    /// | `SIMULATED_STEP_DELAY_MS` | `0`                     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());

        let cors_origins: Vec<String> = text("CORS_ORIGINS", "http://localhost:7860")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        for origin in &cors_origins {
            HeaderValue::from_str(origin).map_err(|e| ConfigError::Invalid {
                var: "CORS_ORIGINS",
                value: origin.clone(),
                reason: e.to_string(),
            })?;
        }

        Ok(Self {
            host: parse(&lookup, "HOST", IpAddr::V4(Ipv4Addr::LOCALHOST))?,
            port: parse(&lookup, "PORT", 7860)?,
            cors_origins,
            request_timeout_secs: parse(&lookup, "REQUEST_TIMEOUT_SECS", 30)?,
            shutdown_timeout_secs: parse(&lookup, "SHUTDOWN_TIMEOUT_SECS", 10)?,
            models_dir: text("MODELS_DIR", "./models").into(),
            loras_dir: text("LORAS_DIR", "./loras").into(),
            outputs_dir: text("OUTPUTS_DIR", "./outputs").into(),
            hf_token: lookup("HF_TOKEN").filter(|t| !t.trim().is_empty()),
            accelerator: parse(&lookup, "ACCELERATOR", AcceleratorKind::Simulated)?,
            step_delay_ms: parse(&lookup, "SIMULATED_STEP_DELAY_MS", 0)?,
        })
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn simulator_config(&self) -> SimulatorConfig {
        SimulatorConfig {
            accelerator: self.accelerator == AcceleratorKind::Simulated,
            step_delay: Duration::from_millis(self.step_delay_ms),
        }
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
