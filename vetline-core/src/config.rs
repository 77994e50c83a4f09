use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::models::Responder;
use crate::ranker::RankWeights;

#[derive(Debug, Deserialize, Clone)]
pub struct VetlineConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub responders: Vec<Responder>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Unix socket for the local IPC transport; empty disables it.
    #[serde(default)]
    pub socket_path: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8780,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    pub initial_radius_km: f64,
    pub radius_step_km: f64,
    pub max_radius_km: f64,
    pub notify_top_k: usize,
    #[serde(default)]
    pub weights: RankWeights,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            initial_radius_km: 2.0,
            radius_step_km: 2.0,
            max_radius_km: 10.0,
            notify_top_k: 3,
            weights: RankWeights::default(),
        }
    }
}

impl MatchingConfig {
    /// Search radii from `start` up to the ceiling, in `radius_step_km` increments.
    /// The ceiling itself is always the last radius tried.
    pub fn radius_schedule(&self, start: f64) -> Vec<f64> {
        let ceiling = self.max_radius_km;
        let mut radii = Vec::new();
        let mut radius = start.min(ceiling);
        if self.radius_step_km > 0.0 {
            while radius < ceiling {
                radii.push(radius);
                radius += self.radius_step_km;
            }
        } else {
            radii.push(radius);
        }
        if radii.last().map_or(true, |last| *last < ceiling) {
            radii.push(ceiling);
        }
        radii
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub acceptance_timeout_secs: u64,
    pub inactivity_timeout_minutes: u64,
    pub sweep_interval_secs: u64,
    /// How long closed and failed sessions stay readable before the sweeper drops them.
    #[serde(default = "default_retention_minutes")]
    pub retention_minutes: u64,
}

fn default_retention_minutes() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            acceptance_timeout_secs: 120,
            inactivity_timeout_minutes: 30,
            sweep_interval_secs: 15,
            retention_minutes: default_retention_minutes(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    /// `scripted` or `http`
    pub backend: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub model: String,
    /// Falls back to `VETLINE_ASSISTANT_API_KEY` when unset.
    #[serde(default)]
    pub api_key: Option<String>,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            backend: "scripted".to_string(),
            base_url: String::new(),
            model: String::new(),
            api_key: None,
            max_retries: 1,
            retry_delay_ms: 250,
            timeout_secs: 15,
        }
    }
}

impl VetlineConfig {
    /// Load from a TOML file, with `VETLINE__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("VETLINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        s.try_deserialize()
    }
}
