use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::identity::{ContactHasher, Vault};

/// Process-scoped context passed explicitly into every handler, per the
/// "no ambient singletons" design note: connection pools, JWKS caches, and
/// secret handles live here so tests can substitute fakes instead of
/// reaching for global state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: PgPool,
    pub http_client: reqwest::Client,
    pub contact_hasher: ContactHasher,
    pub vault: Vault,
    /// Cached JWKS document, keyed by issuer URL; refreshed on verification
    /// failure before giving up, per the OIDC verification contract.
    pub jwks_cache: Cache<String, Arc<jsonwebtoken::jwk::JwkSet>>,
}

impl AppState {
    pub async fn build(config: AppConfig) -> Result<Self, AppError> {
        let db_pool = crate::db::build_pool(&config.database_url, config.db_max_connections).await?;
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|error| AppError::Internal(format!("could not build http client: {error}")))?;

        let contact_hasher = ContactHasher::from_hex(config.contact_hash_secret_hex.as_deref())?;
        let vault = Vault::from_hex(config.vault_key_hex.as_deref())?;

        let jwks_cache = Cache::builder()
            .time_to_live(Duration::from_secs(600))
            .max_capacity(16)
            .build();

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            http_client,
            contact_hasher,
            vault,
            jwks_cache,
        })
    }
}
