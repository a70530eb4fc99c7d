use std::env;

use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;

#[derive(Deserialize, Clone, Debug)]
pub struct BillingConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: PortoneConfig,
    pub policy: PolicyConfig,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    /// Unset runs the service on the in-memory store (dev only).
    pub url: Option<Secret<String>>,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// PortOne gateway credentials and endpoint.
#[derive(Deserialize, Clone, Debug)]
pub struct PortoneConfig {
    pub api_key: String,
    pub api_secret: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    pub timeout_secs: u64,
}

/// Billing policy knobs; see the reconciler and scheduler for how each
/// is applied.
#[derive(Deserialize, Clone, Debug)]
pub struct PolicyConfig {
    pub failure_threshold: i64,
    pub failure_window_days: i64,
    pub grace_days: u64,
    pub sweep_interval_secs: u64,
    pub verify_webhook_signatures: bool,
}

impl BillingConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("BILLING_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("BILLING_SERVICE_PORT")
            .unwrap_or_else(|_| "3005".to_string())
            .parse()?;

        let db_url = env::var("BILLING_DATABASE_URL").ok().map(Secret::new);
        let max_connections = env::var("BILLING_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("BILLING_DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let api_key = env::var("PORTONE_API_KEY").unwrap_or_default();
        let api_secret = env::var("PORTONE_API_SECRET").unwrap_or_default();
        let webhook_secret = env::var("PORTONE_WEBHOOK_SECRET").unwrap_or_default();
        let api_base_url = env::var("PORTONE_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.iamport.kr".to_string());
        let timeout_secs = env::var("PORTONE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;

        let failure_threshold = env::var("BILLING_FAILURE_THRESHOLD")
            .unwrap_or_else(|_| "3".to_string())
            .parse()?;
        let failure_window_days = env::var("BILLING_FAILURE_WINDOW_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()?;
        let grace_days = env::var("BILLING_GRACE_DAYS")
            .unwrap_or_else(|_| "14".to_string())
            .parse()?;
        let sweep_interval_secs = env::var("BILLING_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "86400".to_string())
            .parse()?;
        let verify_webhook_signatures = env::var("WEBHOOK_VERIFY_SIGNATURES")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: db_url,
                max_connections,
                min_connections,
            },
            gateway: PortoneConfig {
                api_key,
                api_secret: Secret::new(api_secret),
                webhook_secret: Secret::new(webhook_secret),
                api_base_url,
                timeout_secs,
            },
            policy: PolicyConfig {
                failure_threshold,
                failure_window_days,
                grace_days,
                sweep_interval_secs,
                verify_webhook_signatures,
            },
            service_name: "billing-service".to_string(),
            log_level: env::var("BILLING_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("BILLING_OTLP_ENDPOINT").ok(),
        })
    }
}
