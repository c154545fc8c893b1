//! PII-free contact identity: a non-reversible per-contact hash used as the
//! join key everywhere in the schema, and a short-TTL encrypted vault that is
//! the only place the provider's actual routable identifier is stored.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::{PgPool, Row};

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

const CONTACT_HASH_LEN: usize = 32;

fn decode_hex(hex: &str) -> Result<Vec<u8>, AppError> {
    if hex.len() % 2 != 0 {
        return Err(AppError::Internal("secret hex must have even length".into()));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| AppError::Internal("secret is not valid hex".into()))
        })
        .collect()
}

/// Derives `contact_hash = base64url_no_pad(HMAC-SHA256(secret, "{property_id}|{channel}|{sender_id}"))[..32]`.
#[derive(Clone)]
pub struct ContactHasher {
    secret: Vec<u8>,
}

impl ContactHasher {
    pub fn from_hex(secret_hex: Option<&str>) -> Result<Self, AppError> {
        let secret = match secret_hex {
            Some(hex) => decode_hex(hex)?,
            // Permitted in non-production for local development; AppState's
            // caller is responsible for refusing to boot in production
            // without a real secret configured (see `AppConfig::is_production`).
            None => b"hotelly-dev-contact-hash-secret".to_vec(),
        };
        Ok(Self { secret })
    }

    pub fn hash(&self, property_id: &str, channel: &str, sender_id: &str) -> Result<String, AppError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .map_err(|_| AppError::Internal("invalid contact-hash secret".into()))?;
        mac.update(format!("{property_id}|{channel}|{sender_id}").as_bytes());
        let digest = mac.finalize().into_bytes();
        let encoded = URL_SAFE_NO_PAD.encode(digest);
        Ok(encoded.chars().take(CONTACT_HASH_LEN).collect())
    }
}

/// AES-256-GCM envelope over a provider's routable contact identifier.
/// Ciphertext is stored as `nonce || ct` and never logged decrypted.
#[derive(Clone)]
pub struct Vault {
    key: Key<Aes256Gcm>,
}

impl Vault {
    pub fn from_hex(key_hex: Option<&str>) -> Result<Self, AppError> {
        let bytes = match key_hex {
            Some(hex) => decode_hex(hex)?,
            None => b"01234567890123456789012345678901".to_vec(),
        };
        if bytes.len() != 32 {
            return Err(AppError::Internal("vault key must be 32 bytes".into()));
        }
        Ok(Self {
            key: *Key::<Aes256Gcm>::from_slice(&bytes),
        })
    }

    /// Encrypts `plaintext` with a fresh random nonce; returns `nonce || ct`.
    pub fn seal(&self, plaintext: &str) -> Result<Vec<u8>, AppError> {
        let cipher = Aes256Gcm::new(&self.key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ct = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| AppError::Internal("vault encryption failed".into()))?;
        let mut out = Vec::with_capacity(nonce.len() + ct.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    /// Decrypts a `nonce || ct` blob. A mismatch here (wrong key across
    /// ingress/worker) surfaces as an AES authentication failure, the
    /// documented failure mode when the two roles' keys diverge.
    pub fn open(&self, sealed: &[u8]) -> Result<String, AppError> {
        if sealed.len() < 12 {
            return Err(AppError::Internal("vault ciphertext too short".into()));
        }
        let (nonce_bytes, ct) = sealed.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher = Aes256Gcm::new(&self.key);
        let plaintext = cipher
            .decrypt(nonce, ct)
            .map_err(|_| AppError::Internal("vault decryption failed (key mismatch?)".into()))?;
        String::from_utf8(plaintext)
            .map_err(|_| AppError::Internal("vault plaintext was not valid utf-8".into()))
    }
}

/// Writes the sealed routable identifier for `(property_id, channel,
/// contact_hash)` with a 24h TTL (section 4.3). Called by ingress only.
pub async fn write_contact_ref(
    pool: &PgPool,
    vault: &Vault,
    property_id: &str,
    channel: &str,
    contact_hash: &str,
    routable_id: &str,
) -> Result<(), AppError> {
    let sealed = vault.seal(routable_id)?;
    sqlx::query(
        "INSERT INTO contact_refs (property_id, channel, contact_hash, sealed_identifier, expires_at)
         VALUES ($1, $2, $3, $4, now() + interval '24 hours')
         ON CONFLICT (property_id, channel, contact_hash)
         DO UPDATE SET sealed_identifier = EXCLUDED.sealed_identifier, expires_at = EXCLUDED.expires_at",
    )
    .bind(property_id)
    .bind(channel)
    .bind(contact_hash)
    .bind(sealed)
    .execute(pool)
    .await
    .map_err(AppError::from_sqlx)?;
    Ok(())
}

/// Reads and decrypts the routable identifier for a contact, if a
/// non-expired vault row exists. `None` means the send-response handler
/// must terminate permanently with `contact_ref_not_found` (section 4.3) --
/// it never falls back to anything else.
pub async fn read_contact_ref(
    pool: &PgPool,
    vault: &Vault,
    property_id: &str,
    channel: &str,
    contact_hash: &str,
) -> Result<Option<String>, AppError> {
    let row = sqlx::query(
        "SELECT sealed_identifier FROM contact_refs
         WHERE property_id = $1 AND channel = $2 AND contact_hash = $3 AND expires_at > now()",
    )
    .bind(property_id)
    .bind(channel)
    .bind(contact_hash)
    .fetch_optional(pool)
    .await
    .map_err(AppError::from_sqlx)?;

    let Some(row) = row else {
        return Ok(None);
    };
    let sealed: Vec<u8> = row.get("sealed_identifier");
    vault.open(&sealed).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_hash_is_deterministic_and_bounded() {
        let hasher = ContactHasher::from_hex(None).unwrap();
        let a = hasher.hash("prop_1", "whatsapp", "+595981111111").unwrap();
        let b = hasher.hash("prop_1", "whatsapp", "+595981111111").unwrap();
        assert_eq!(a, b);
        assert!(a.len() <= 32);
    }

    #[test]
    fn contact_hash_differs_per_property() {
        let hasher = ContactHasher::from_hex(None).unwrap();
        let a = hasher.hash("prop_1", "whatsapp", "+595981111111").unwrap();
        let b = hasher.hash("prop_2", "whatsapp", "+595981111111").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn vault_round_trips() {
        let vault = Vault::from_hex(None).unwrap();
        let sealed = vault.seal("+595981111111").unwrap();
        assert_ne!(sealed, b"+595981111111");
        let opened = vault.open(&sealed).unwrap();
        assert_eq!(opened, "+595981111111");
    }

    #[test]
    fn vault_rejects_tampered_ciphertext() {
        let vault = Vault::from_hex(None).unwrap();
        let mut sealed = vault.seal("+595981111111").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(vault.open(&sealed).is_err());
    }

    #[test]
    fn vault_keys_must_match_across_roles() {
        let a = Vault::from_hex(Some(&"01".repeat(32))).unwrap();
        let b = Vault::from_hex(Some(&"02".repeat(32))).unwrap();
        let sealed = a.seal("secret").unwrap();
        assert!(b.open(&sealed).is_err());
    }
}
