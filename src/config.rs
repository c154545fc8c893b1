#![allow(dead_code)]

use std::env;

/// Process-wide configuration, loaded once from the environment at startup.
///
/// Shared by both the ingress and worker binaries; fields that only make
/// sense for one role (e.g. `task_oidc_audience` is the worker's own URL)
/// are still present on both so tests can construct one `AppConfig` type.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub trusted_hosts: Vec<String>,
    pub docs_enabled: bool,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,

    pub database_url: String,
    pub db_max_connections: u32,

    pub oidc_issuer: Option<String>,
    pub oidc_jwks_url: Option<String>,
    pub task_oidc_audience: String,
    pub task_token_mint_url: Option<String>,
    pub task_queue_base_url: Option<String>,
    pub task_queue_api_key: Option<String>,

    pub stripe_api_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,

    pub whatsapp_provider: String,
    pub whatsapp_base_url: Option<String>,
    pub whatsapp_instance: Option<String>,
    pub whatsapp_api_key: Option<String>,
    pub whatsapp_meta_verify_token: Option<String>,
    pub whatsapp_meta_app_secret: Option<String>,

    pub vault_key_hex: Option<String>,
    pub contact_hash_secret_hex: Option<String>,

    pub default_confirmation_threshold: f64,
    pub hold_ttl_minutes: i64,

    pub retention_processed_events_days: i64,
    pub retention_outbox_events_days: i64,
    pub retention_idempotency_keys_days: i64,

    pub scheduler_enabled: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Hotelly"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            trusted_hosts: parse_csv(&env_or("TRUSTED_HOSTS", "localhost,127.0.0.1")),
            docs_enabled: env_parse_bool_or("DOCS_ENABLED", true),
            rate_limit_enabled: env_parse_bool_or("RATE_LIMIT_ENABLED", true),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 20),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 40),

            database_url: env_or("DATABASE_URL", "postgres://localhost/hotelly"),
            db_max_connections: env_parse_or("DB_MAX_CONNECTIONS", 10),

            oidc_issuer: env_opt("OIDC_ISSUER"),
            oidc_jwks_url: env_opt("OIDC_JWKS_URL"),
            task_oidc_audience: env_or("TASK_OIDC_AUDIENCE", "http://localhost:8001"),
            task_token_mint_url: env_opt("TASK_TOKEN_MINT_URL"),
            task_queue_base_url: env_opt("TASK_QUEUE_BASE_URL"),
            task_queue_api_key: env_opt("TASK_QUEUE_API_KEY"),

            stripe_api_key: env_opt("STRIPE_API_KEY"),
            stripe_webhook_secret: env_opt("STRIPE_WEBHOOK_SECRET"),

            whatsapp_provider: env_or("WHATSAPP_PROVIDER", "meta"),
            whatsapp_base_url: env_opt("WHATSAPP_BASE_URL"),
            whatsapp_instance: env_opt("WHATSAPP_INSTANCE"),
            whatsapp_api_key: env_opt("WHATSAPP_API_KEY"),
            whatsapp_meta_verify_token: env_opt("WHATSAPP_META_VERIFY_TOKEN"),
            whatsapp_meta_app_secret: env_opt("WHATSAPP_META_APP_SECRET"),

            vault_key_hex: env_opt("VAULT_KEY_HEX"),
            contact_hash_secret_hex: env_opt("CONTACT_HASH_SECRET_HEX"),

            default_confirmation_threshold: env_parse_or("DEFAULT_CONFIRMATION_THRESHOLD", 1.0),
            hold_ttl_minutes: env_parse_or("HOLD_TTL_MINUTES", 30),

            retention_processed_events_days: env_parse_or("RETENTION_PROCESSED_EVENTS_DAYS", 90),
            retention_outbox_events_days: env_parse_or("RETENTION_OUTBOX_EVENTS_DAYS", 180),
            retention_idempotency_keys_days: env_parse_or("RETENTION_IDEMPOTENCY_KEYS_DAYS", 30),

            scheduler_enabled: env_parse_bool_or("SCHEDULER_ENABLED", true),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    pub fn docs_enabled_runtime(&self) -> bool {
        if self.is_production() {
            return false;
        }
        self.docs_enabled
    }

    pub fn rate_limit_enabled_runtime(&self) -> bool {
        self.rate_limit_enabled
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/v1".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::normalize_prefix;

    #[test]
    fn normalizes_prefix() {
        assert_eq!(normalize_prefix("v1"), "/v1");
        assert_eq!(normalize_prefix("/v1/"), "/v1");
        assert_eq!(normalize_prefix(""), "/v1");
    }
}
