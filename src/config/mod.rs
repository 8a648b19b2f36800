use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string (job queue, rate-limit state, progress feed)
    pub redis_url: String,

    /// AES-256-GCM key for credential encryption (base64-encoded, 32 bytes)
    pub encryption_key: String,

    /// Admissions allowed per identifier per minute
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u64,

    /// Base delay between sequential provider calls within one job (seconds)
    #[serde(default = "default_scrape_delay_seconds")]
    pub scrape_delay_seconds: u64,

    /// Lower bound of per-call random jitter (seconds)
    #[serde(default = "default_jitter_seconds_min")]
    pub jitter_seconds_min: u64,

    /// Upper bound of per-call random jitter (seconds)
    #[serde(default = "default_jitter_seconds_max")]
    pub jitter_seconds_max: u64,

    /// UTC hour (0-23) at which the daily scheduled scrapes fire
    #[serde(default = "default_scheduler_hour_utc")]
    pub scheduler_hour_utc: u32,

    /// Fallback session identity when a target has no stored credential
    #[serde(default)]
    pub session_handle: Option<String>,
    #[serde(default)]
    pub session_secret: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_rate_limit_per_minute() -> u64 {
    2
}

fn default_scrape_delay_seconds() -> u64 {
    30
}

fn default_jitter_seconds_min() -> u64 {
    5
}

fn default_jitter_seconds_max() -> u64 {
    15
}

fn default_scheduler_hour_utc() -> u32 {
    2
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
