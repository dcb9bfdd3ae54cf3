//! Configuration management

use anyhow::{Context, Result};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Directory for generated import error reports
    pub report_dir: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let nats_url =
            std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let report_dir =
            std::env::var("REPORT_DIR").unwrap_or_else(|_| "reports/imports".to_string());

        Ok(Self {
            nats_url,
            database_url,
            report_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    // Env vars are process-wide; tests that touch them take this lock.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_config_report_dir_uses_env_when_set() {
        let _guard = ENV_LOCK.lock();
        std::env::set_var("REPORT_DIR", "/tmp/leadline-reports");
        std::env::set_var("DATABASE_URL", "postgres://test");

        let config = Config::from_env().unwrap();
        assert_eq!(config.report_dir, "/tmp/leadline-reports");

        std::env::remove_var("REPORT_DIR");
    }

    #[test]
    fn test_config_nats_url_defaults_to_localhost() {
        let _guard = ENV_LOCK.lock();
        std::env::remove_var("NATS_URL");
        std::env::set_var("DATABASE_URL", "postgres://test");

        let config = Config::from_env().unwrap();
        assert_eq!(config.nats_url, "nats://localhost:4222");
    }
}
