use std::env;
use std::time::Duration;

use crate::error::CoreError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub push_gateway_url: String,
    pub assign_queue_size: usize,
    pub event_buffer_size: usize,
    pub activator_interval_secs: u64,
    pub reconcile_interval_secs: u64,
    pub store_retry_attempts: u32,
    pub store_retry_base_ms: u64,
    pub gateway_retry_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, CoreError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            push_gateway_url: env::var("PUSH_GATEWAY_URL")
                .unwrap_or_else(|_| "https://fcm.googleapis.com/fcm/send".to_string()),
            assign_queue_size: parse_or_default("ASSIGN_QUEUE_SIZE", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            activator_interval_secs: parse_or_default("ACTIVATOR_INTERVAL_SECS", 60)?,
            reconcile_interval_secs: parse_or_default("RECONCILE_INTERVAL_SECS", 30)?,
            store_retry_attempts: parse_or_default("STORE_RETRY_ATTEMPTS", 3)?,
            store_retry_base_ms: parse_or_default("STORE_RETRY_BASE_MS", 50)?,
            gateway_retry_attempts: parse_or_default("GATEWAY_RETRY_ATTEMPTS", 2)?,
        })
    }

    pub fn activator_interval(&self) -> Duration {
        Duration::from_secs(self.activator_interval_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, CoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| CoreError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
