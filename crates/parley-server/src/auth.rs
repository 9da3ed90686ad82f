//! Credential hashing and bearer tokens.
//!
//! Passwords are stored as argon2 PHC strings. Tokens are
//! `<user_id>.<expires_unix>.<hex hmac-sha256>`, signed with the server
//! secret; nothing about them is persisted.

use anyhow::anyhow;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use parley_shared::types::UserId;

use crate::error::ServiceError;

type HmacSha256 = Hmac<Sha256>;

const SALT_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Passwords
// ---------------------------------------------------------------------------

/// Argon2id password hashing. Work runs on the blocking pool.
#[derive(Clone, Default)]
pub struct Credentials {
    argon: Argon2<'static>,
}

impl Credentials {
    pub async fn hash_password(&self, password: String) -> Result<String, ServiceError> {
        let argon = self.argon.clone();
        tokio::task::spawn_blocking(move || hash_blocking(&argon, &password))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "password hashing task failed");
                ServiceError::Transient("The service is temporarily unavailable".into())
            })?
    }

    /// A malformed stored hash never matches.
    pub async fn verify_password(&self, password: String, stored_hash: String) -> bool {
        let argon = self.argon.clone();
        tokio::task::spawn_blocking(move || verify_blocking(&argon, &password, &stored_hash))
            .await
            .unwrap_or(false)
    }

    /// Minimal cost parameters so tests do not spend seconds hashing.
    #[cfg(test)]
    pub fn fast() -> Self {
        let params = argon2::Params::new(8, 1, 1, None).unwrap();
        Self {
            argon: Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params),
        }
    }
}

fn hash_blocking(argon: &Argon2<'_>, password: &str) -> Result<String, ServiceError> {
    let mut salt_bytes = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt_bytes);

    let salt = SaltString::encode_b64(&salt_bytes).map_err(hash_failed)?;
    let hash = argon
        .hash_password(password.as_bytes(), &salt)
        .map_err(hash_failed)?;
    Ok(hash.to_string())
}

fn verify_blocking(argon: &Argon2<'_>, password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => argon.verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash is malformed");
            false
        }
    }
}

fn hash_failed(e: argon2::password_hash::Error) -> ServiceError {
    tracing::error!(error = %e, "password hashing failed");
    ServiceError::Transient("The service is temporarily unavailable".into())
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// Issues and checks signed bearer tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    mac: HmacSha256,
    ttl: chrono::Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl_hours: i64) -> anyhow::Result<Self> {
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| anyhow!("token secret cannot key HMAC-SHA256"))?;
        Ok(Self {
            mac,
            ttl: chrono::Duration::hours(ttl_hours),
        })
    }

    pub fn issue(&self, user: UserId) -> String {
        let expires = (Utc::now() + self.ttl).timestamp();
        self.issue_with_expiry(user, expires)
    }

    fn issue_with_expiry(&self, user: UserId, expires_unix: i64) -> String {
        let payload = format!("{user}.{expires_unix}");
        let signature = hex::encode(self.sign(&payload));
        format!("{payload}.{signature}")
    }

    /// Return the user a token was issued to, or `Unauthorized` if it is
    /// malformed, forged or expired.
    pub fn verify(&self, token: &str) -> Result<UserId, ServiceError> {
        let invalid = || ServiceError::Unauthorized("Invalid or expired token".into());

        let (payload, signature) = token.rsplit_once('.').ok_or_else(invalid)?;
        let (user, expires) = payload.split_once('.').ok_or_else(invalid)?;

        let signature = hex::decode(signature).map_err(|_| invalid())?;
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).map_err(|_| invalid())?;

        let expires: i64 = expires.parse().map_err(|_| invalid())?;
        if expires <= Utc::now().timestamp() {
            return Err(invalid());
        }

        user.parse::<UserId>().map_err(|_| invalid())
    }

    fn sign(&self, payload: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}
