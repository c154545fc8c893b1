//! DB-backed RBAC (section 4.11). Roles are resolved per `(user, property)`
//! rather than cached in the bearer token, so a revoked role takes effect
//! on the very next request. Ordering mirrors `assert_org_role` in the
//! multi-tenant source: callers declare a minimum role and this module
//! does the membership lookup and comparison.

use std::sync::Arc;

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sqlx::{PgPool, Row};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Viewer,
    Governance,
    Staff,
    Manager,
    Owner,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "viewer" => Some(Role::Viewer),
            "governance" => Some(Role::Governance),
            "staff" => Some(Role::Staff),
            "manager" => Some(Role::Manager),
            "owner" => Some(Role::Owner),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Governance => "governance",
            Role::Staff => "staff",
            Role::Manager => "manager",
            Role::Owner => "owner",
        }
    }
}

#[derive(Debug, Deserialize)]
struct OidcClaims {
    sub: String,
    #[serde(default)]
    aud: Option<String>,
}

/// Verifies a bearer token against the cached JWKS for `issuer`, refreshing
/// the cache once on verification failure before giving up (the document
/// may have rotated). Returns the `sub` claim.
pub async fn verify_bearer_token(state: &AppState, token: &str) -> Result<String, AppError> {
    let (sub, _aud) = verify_oidc_token(state, token).await?;
    Ok(sub)
}

/// Same verification path as [`verify_bearer_token`] but also returns the
/// `aud` claim, for task-dispatch tokens (section 4.8) whose audience must
/// be checked against the worker's own canonical URL.
pub async fn verify_task_bearer(state: &AppState, token: &str) -> Result<String, AppError> {
    let (_sub, aud) = verify_oidc_token(state, token).await?;
    aud.ok_or_else(|| AppError::Unauthorized("task token missing audience".to_string()))
}

async fn verify_oidc_token(state: &AppState, token: &str) -> Result<(String, Option<String>), AppError> {
    let jwks = load_jwks(state, false).await?;
    match decode_with_jwks(token, &jwks) {
        Ok(claims) => Ok(claims),
        Err(_) => {
            let refreshed = load_jwks(state, true).await?;
            decode_with_jwks(token, &refreshed)
        }
    }
}

async fn load_jwks(state: &AppState, force_refresh: bool) -> Result<Arc<JwkSet>, AppError> {
    let issuer = state
        .config
        .oidc_issuer
        .as_deref()
        .ok_or_else(|| AppError::Internal("OIDC_ISSUER not configured".to_string()))?;
    let jwks_url = state
        .config
        .oidc_jwks_url
        .as_deref()
        .ok_or_else(|| AppError::Internal("OIDC_JWKS_URL not configured".to_string()))?;
    let key = issuer.to_string();
    if !force_refresh {
        if let Some(cached) = state.jwks_cache.get(&key).await {
            return Ok(cached);
        }
    }

    let response = state
        .http_client
        .get(jwks_url)
        .send()
        .await
        .map_err(|error| AppError::Dependency(format!("jwks fetch failed: {error}")))?;
    let jwks: JwkSet = response
        .json()
        .await
        .map_err(|error| AppError::Dependency(format!("jwks parse failed: {error}")))?;
    let jwks = Arc::new(jwks);
    state.jwks_cache.insert(key, jwks.clone()).await;
    Ok(jwks)
}

fn decode_with_jwks(token: &str, jwks: &JwkSet) -> Result<(String, Option<String>), AppError> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|error| AppError::Unauthorized(format!("bad token header: {error}")))?;
    let kid = header
        .kid
        .ok_or_else(|| AppError::Unauthorized("token missing kid".to_string()))?;
    let jwk = jwks
        .find(&kid)
        .ok_or_else(|| AppError::Unauthorized("unknown signing key".to_string()))?;
    let decoding_key = DecodingKey::from_jwk(jwk)
        .map_err(|error| AppError::Unauthorized(format!("bad jwk: {error}")))?;

    let mut validation = Validation::new(Algorithm::RS256);
    // Audience is checked by callers against the exact expected string
    // (task dispatch) or not at all (dashboard bearer tokens); jsonwebtoken's
    // built-in check only supports membership, not exact-match semantics.
    validation.validate_aud = false;

    let data = jsonwebtoken::decode::<OidcClaims>(token, &decoding_key, &validation)
        .map_err(|error| AppError::Unauthorized(format!("token verification failed: {error}")))?;
    Ok((data.claims.sub, data.claims.aud))
}

pub async fn resolve_user_id(pool: &PgPool, subject: &str) -> Result<String, AppError> {
    let row = sqlx::query("SELECT id FROM users WHERE oidc_subject = $1")
        .bind(subject)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from_sqlx)?;
    let row = row.ok_or_else(|| AppError::Unauthorized("subject has no local user".to_string()))?;
    Ok(row.get("id"))
}

/// Loads the caller's role on `property_id` and compares it against
/// `minimum`. 403 (not 401) once we have a verified identity -- absence of
/// a row means "authenticated but unauthorized", not "unauthenticated".
pub async fn require_role(
    pool: &PgPool,
    user_id: &str,
    property_id: &str,
    minimum: Role,
) -> Result<Role, AppError> {
    let row = sqlx::query(
        "SELECT role FROM user_property_roles WHERE user_id = $1 AND property_id = $2",
    )
    .bind(user_id)
    .bind(property_id)
    .fetch_optional(pool)
    .await
    .map_err(AppError::from_sqlx)?;

    let Some(row) = row else {
        return Err(AppError::Forbidden("no role on this property".to_string()));
    };
    let role_str: String = row.get("role");
    let role = Role::parse(&role_str)
        .ok_or_else(|| AppError::Internal(format!("unrecognized role in db: {role_str}")))?;

    if role >= minimum {
        Ok(role)
    } else {
        Err(AppError::Forbidden(format!(
            "role '{}' is below required '{}'",
            role.as_str(),
            minimum.as_str()
        )))
    }
}

/// Refuses to remove a role row if doing so would leave the property with
/// zero owners (400 fail-closed, per section 4.11).
pub async fn assert_removal_keeps_an_owner(
    pool: &PgPool,
    property_id: &str,
    removing_user_id: &str,
) -> Result<(), AppError> {
    let remaining_owners: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM user_property_roles
         WHERE property_id = $1 AND role = 'owner' AND user_id <> $2",
    )
    .bind(property_id)
    .bind(removing_user_id)
    .fetch_one(pool)
    .await
    .map_err(AppError::from_sqlx)?
    .get("n");

    let is_owner: bool = sqlx::query(
        "SELECT EXISTS(
            SELECT 1 FROM user_property_roles
            WHERE property_id = $1 AND user_id = $2 AND role = 'owner'
         ) AS is_owner",
    )
    .bind(property_id)
    .bind(removing_user_id)
    .fetch_one(pool)
    .await
    .map_err(AppError::from_sqlx)?
    .get("is_owner");

    if is_owner && remaining_owners == 0 {
        return Err(AppError::BadRequest(
            "cannot remove the last owner of a property".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering_matches_hierarchy() {
        assert!(Role::Viewer < Role::Governance);
        assert!(Role::Governance < Role::Staff);
        assert!(Role::Staff < Role::Manager);
        assert!(Role::Manager < Role::Owner);
    }

    #[test]
    fn parses_known_roles_only() {
        assert_eq!(Role::parse("manager"), Some(Role::Manager));
        assert_eq!(Role::parse("superadmin"), None);
    }
}
