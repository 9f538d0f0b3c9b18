//! Configuration management

use crate::db::DbConfig;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default job-launch endpoint for local development.
pub const DEFAULT_LAUNCH_URL: &str = "http://127.0.0.1:8700/api/v1/jobs";

/// Default job-launch request timeout in seconds.
pub const DEFAULT_LAUNCH_TIMEOUT_SECS: u64 = 30;

/// Default warehouse schema holding staging and production tables.
pub const DEFAULT_PROMOTION_SCHEMA: &str = "public";

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DbConfig,
    pub launcher: LauncherConfig,
    pub promotion: PromotionConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Job-execution service configuration
///
/// `template_path`, `service_account` and `temp_location` are fixed per
/// deployment and merged into every launch request; the input path and
/// dataset come from the triggering notification.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub launch_url: String,
    pub template_path: String,
    pub service_account: String,
    pub temp_location: String,
    pub request_timeout_secs: u64,
}

/// Promotion configuration
#[derive(Debug, Clone)]
pub struct PromotionConfig {
    /// Warehouse schema containing the staging and production tables
    pub schema: String,
    /// Production tables with a staging variant to promote from
    pub tables: Vec<String>,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("CHUNKFLOW_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: std::env::var("CHUNKFLOW_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: std::env::var("CHUNKFLOW_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            },
            database: DbConfig::from_env()?,
            launcher: LauncherConfig {
                launch_url: std::env::var("LAUNCH_URL")
                    .unwrap_or_else(|_| DEFAULT_LAUNCH_URL.to_string()),
                template_path: std::env::var("LAUNCH_TEMPLATE_PATH").unwrap_or_default(),
                service_account: std::env::var("LAUNCH_SERVICE_ACCOUNT").unwrap_or_default(),
                temp_location: std::env::var("LAUNCH_TEMP_LOCATION").unwrap_or_default(),
                request_timeout_secs: std::env::var("LAUNCH_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_LAUNCH_TIMEOUT_SECS),
            },
            promotion: PromotionConfig {
                schema: std::env::var("PROMOTION_SCHEMA")
                    .unwrap_or_else(|_| DEFAULT_PROMOTION_SCHEMA.to_string()),
                tables: std::env::var("PROMOTION_TABLES")
                    .unwrap_or_default()
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.launcher.launch_url.is_empty() {
            anyhow::bail!("Job launch URL cannot be empty");
        }

        if self.promotion.schema.is_empty() {
            anyhow::bail!("Promotion schema cannot be empty");
        }

        if self.promotion.tables.is_empty() {
            tracing::warn!(
                "PROMOTION_TABLES is empty - promotion will only advance the registry watermark"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_launch_url() {
        let config = Config {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DbConfig::default(),
            launcher: LauncherConfig {
                launch_url: String::new(),
                template_path: String::new(),
                service_account: String::new(),
                temp_location: String::new(),
                request_timeout_secs: DEFAULT_LAUNCH_TIMEOUT_SECS,
            },
            promotion: PromotionConfig {
                schema: DEFAULT_PROMOTION_SCHEMA.to_string(),
                tables: vec![],
            },
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        let config = Config {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DbConfig::default(),
            launcher: LauncherConfig {
                launch_url: DEFAULT_LAUNCH_URL.to_string(),
                template_path: "registry/stage-chunk:latest".to_string(),
                service_account: "stage-runner".to_string(),
                temp_location: "s3://scratch/tmp".to_string(),
                request_timeout_secs: DEFAULT_LAUNCH_TIMEOUT_SECS,
            },
            promotion: PromotionConfig {
                schema: DEFAULT_PROMOTION_SCHEMA.to_string(),
                tables: vec!["dia_object".to_string()],
            },
        };

        assert!(config.validate().is_ok());
    }
}
