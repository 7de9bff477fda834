//! Bearer-token verification and password hashing.
//!
//! The request pipeline treats authentication as a collaborator with one
//! contract: given a presented token, yield a verified user id or fail.
//! Tokens are HS256 JWTs whose subject is the user id; passwords are stored
//! as argon2id PHC strings.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use notesync_core::{Error, Result};

/// Access token lifetime.
pub const TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// User id.
    sub: String,
    iat: i64,
    exp: i64,
}

/// Issues and verifies access tokens for the request pipeline.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenService {
    /// Create a token service from a shared secret.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Create a token service from `JWT_SECRET`.
    ///
    /// The secret has no default: a guessable fallback would let anyone
    /// mint identities.
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("JWT_SECRET")
            .map_err(|_| Error::Config("JWT_SECRET must be set".to_string()))?;
        if secret.trim().is_empty() {
            return Err(Error::Config("JWT_SECRET must not be empty".to_string()));
        }
        Ok(Self::new(secret.as_bytes()))
    }

    /// Issue an access token for a user.
    pub fn issue(&self, user_id: Uuid) -> Result<String> {
        self.issue_with_lifetime(user_id, Duration::seconds(TOKEN_LIFETIME_SECS))
    }

    /// Issue a token with an explicit lifetime (negative in expiry tests).
    pub fn issue_with_lifetime(&self, user_id: Uuid, lifetime: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + lifetime).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("failed to sign token: {}", e)))
    }

    /// Verify a presented token and return the user id it vouches for.
    ///
    /// Every failure collapses into [`Error::Unauthorized`]; callers get no
    /// hint whether the signature, the expiry, or the subject was at fault.
    pub fn verify(&self, token: &str) -> Result<Uuid> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|_| Error::Unauthorized("Could not validate credentials".to_string()))?;

        data.claims
            .sub
            .parse::<Uuid>()
            .map_err(|_| Error::Unauthorized("Could not validate credentials".to_string()))
    }
}

/// Hash a password into an argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("failed to hash password: {}", e)))
}

/// Check a password against a stored PHC string.
///
/// A malformed stored hash counts as a failed check rather than an error;
/// login failures must stay indistinguishable.
pub fn verify_password(stored_hash: &str, password: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
