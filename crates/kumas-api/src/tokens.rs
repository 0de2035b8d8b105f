use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;

use kumas_types::api::{Claims, RefreshClaims};
use kumas_types::models::UserId;

use crate::error::ApiError;

pub const ACCESS_TTL_SECS: i64 = 30 * 60;
pub const REFRESH_TTL_SECS: i64 = 14 * 24 * 60 * 60;

/// A refresh token presented with less than this much life left is rotated.
pub const REISSUE_WINDOW_SECS: i64 = 24 * 60 * 60;

/// HS256 signing keys. Access and refresh tokens use separate secrets, so one
/// can never be replayed as the other.
pub struct TokenKeys {
    access_secret: String,
    refresh_secret: String,
}

impl TokenKeys {
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
        }
    }

    pub fn issue_access(&self, id: UserId, email: &str, name: &str) -> anyhow::Result<String> {
        let now = Utc::now();
        let claims = Claims {
            id,
            email: email.to_string(),
            name: name.to_string(),
            iat: now.timestamp() as usize,
            exp: (now + Duration::seconds(ACCESS_TTL_SECS)).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.access_secret.as_bytes()),
        )?;
        Ok(token)
    }

    pub fn issue_refresh(&self, id: UserId) -> anyhow::Result<String> {
        self.issue_refresh_with_ttl(id, Duration::seconds(REFRESH_TTL_SECS))
    }

    pub(crate) fn issue_refresh_with_ttl(&self, id: UserId, ttl: Duration) -> anyhow::Result<String> {
        let now = Utc::now();
        let claims = RefreshClaims {
            id,
            iat: now.timestamp() as usize,
            exp: (now + ttl).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.refresh_secret.as_bytes()),
        )?;
        Ok(token)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.access_secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|e| {
            debug!("access token rejected: {}", e);
            ApiError::unauthorized()
        })
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, ApiError> {
        decode::<RefreshClaims>(
            token,
            &DecodingKey::from_secret(self.refresh_secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|e| {
            debug!("refresh token rejected: {}", e);
            ApiError::unauthorized()
        })
    }
}

/// True when a refresh token expiring at `exp` is inside the rotation window.
pub fn needs_rotation(exp: usize) -> bool {
    (exp as i64) < Utc::now().timestamp() + REISSUE_WINDOW_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> TokenKeys {
        TokenKeys::new("access", "refresh")
    }

    #[test]
    fn test_access_token_carries_identity() {
        let keys = keys();
        let token = keys.issue_access(7, "user1@kumas.dev", "heungbu").unwrap();
        let claims = keys.verify_access(&token).unwrap();
        assert_eq!(claims.id, 7);
        assert_eq!(claims.email, "user1@kumas.dev");
        assert_eq!(claims.exp - claims.iat, ACCESS_TTL_SECS as usize);
    }

    #[test]
    fn test_tokens_are_not_interchangeable() {
        let keys = keys();
        let refresh = keys.issue_refresh(7).unwrap();
        let access = keys.issue_access(7, "a@b.c", "n").unwrap();
        assert!(matches!(keys.verify_access(&refresh), Err(ApiError::Unauthorized(_))));
        assert!(matches!(keys.verify_refresh(&access), Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn test_expired_refresh_is_rejected() {
        let keys = keys();
        let token = keys.issue_refresh_with_ttl(7, Duration::hours(-2)).unwrap();
        assert!(keys.verify_refresh(&token).is_err());
    }

    #[test]
    fn test_rotation_window() {
        let fresh = (Utc::now().timestamp() + REFRESH_TTL_SECS) as usize;
        let stale = (Utc::now() + Duration::hours(3)).timestamp() as usize;
        assert!(!needs_rotation(fresh));
        assert!(needs_rotation(stale));
    }
}
