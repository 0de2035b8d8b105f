use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, info};

use kumas_db::{Database, queries};
use kumas_types::api::{Claims, LoginRequest, ReissueRequest, TokenResponse};
use kumas_types::models::UserId;

use crate::error::ApiError;
use crate::state::AppState;
use crate::tokens::{TokenKeys, needs_rotation};
use crate::{blocking, reply, validate};

const TOKEN_TYPE: &str = "Bearer";

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

fn verify_password(password: &str, hash: &str) -> Result<bool, ApiError> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("corrupt password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Check credentials, then issue an access token and a fresh refresh token.
/// The refresh token replaces whatever was stored for the user.
pub fn login(db: &Database, keys: &TokenKeys, req: &LoginRequest) -> Result<TokenResponse, ApiError> {
    validate::login(req)?;

    let user = db.get_user_by_email(&req.email)?.ok_or_else(ApiError::not_found)?;
    if !verify_password(&req.password, &user.password)? {
        debug!("wrong password for user {}", user.id);
        return Err(ApiError::not_found());
    }

    let access_token = keys.issue_access(user.id, &user.email, &user.name)?;
    let refresh_token = keys.issue_refresh(user.id)?;
    db.save_refresh_token(user.id, Some(&refresh_token))?;

    info!("user {} logged in", user.id);
    Ok(TokenResponse {
        token_type: TOKEN_TYPE,
        access_token,
        refresh_token: Some(refresh_token),
    })
}

pub fn logout(db: &Database, user_id: UserId) -> Result<(), ApiError> {
    db.save_refresh_token(user_id, None)?;
    info!("user {} logged out", user_id);
    Ok(())
}

/// Exchange a refresh token for a new access token. The refresh token itself
/// is rotated only when it is close to expiry.
pub fn reissue(db: &Database, keys: &TokenKeys, refresh_token: &str) -> Result<TokenResponse, ApiError> {
    let claims = keys.verify_refresh(refresh_token)?;

    db.with_tx(|tx| {
        let user = queries::find_user_by_id(tx, claims.id)?.ok_or_else(ApiError::unauthorized)?;
        if user.refresh_token.as_deref() != Some(refresh_token) {
            debug!("stale refresh token presented for user {}", user.id);
            return Err(ApiError::unauthorized());
        }

        let access_token = keys.issue_access(user.id, &user.email, &user.name)?;
        let rotated = if needs_rotation(claims.exp) {
            let token = keys.issue_refresh(user.id)?;
            queries::set_refresh_token(tx, user.id, Some(&token))?;
            debug!("rotated refresh token for user {}", user.id);
            Some(token)
        } else {
            None
        };

        Ok(TokenResponse {
            token_type: TOKEN_TYPE,
            access_token,
            refresh_token: rotated,
        })
    })
}

// -- Handlers --

pub async fn login_handler(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tokens = blocking(&state, move |s| login(&s.db, &s.tokens, &req)).await?;
    Ok(reply(StatusCode::OK, tokens))
}

pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    blocking(&state, move |s| logout(&s.db, claims.id)).await?;
    Ok(reply(StatusCode::OK, ()))
}

pub async fn reissue_handler(
    State(state): State<AppState>,
    Json(req): Json<ReissueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tokens = blocking(&state, move |s| reissue(&s.db, &s.tokens, &req.refresh_token)).await?;
    Ok(reply(StatusCode::OK, tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use chrono::Duration;
    use kumas_types::models::Gender;

    fn seed(state: &AppState) -> UserId {
        let hash = hash_password("hunter2").unwrap();
        state
            .db
            .with_conn(|conn| queries::insert_user(conn, "user1@kumas.dev", &hash, "heungbu", Gender::M))
            .unwrap()
    }

    fn login_req(password: &str) -> LoginRequest {
        LoginRequest {
            email: "user1@kumas.dev".into(),
            password: password.into(),
        }
    }

    #[test]
    fn test_login_stores_refresh_token() {
        let state = testutil::state();
        let id = seed(&state);

        let tokens = login(&state.db, &state.tokens, &login_req("hunter2")).unwrap();
        let claims = state.tokens.verify_access(&tokens.access_token).unwrap();
        assert_eq!(claims.id, id);

        let stored = state.db.get_user_by_id(id).unwrap().unwrap().refresh_token;
        assert_eq!(stored, tokens.refresh_token);
    }

    #[test]
    fn test_login_failures_are_indistinguishable() {
        let state = testutil::state();
        seed(&state);

        let wrong_password = login(&state.db, &state.tokens, &login_req("nope")).unwrap_err();
        let unknown = login(
            &state.db,
            &state.tokens,
            &LoginRequest {
                email: "ghost@kumas.dev".into(),
                password: "hunter2".into(),
            },
        )
        .unwrap_err();
        assert_eq!(wrong_password.to_string(), crate::error::NO_MATCH);
        assert_eq!(unknown.to_string(), crate::error::NO_MATCH);
    }

    #[test]
    fn test_reissue_keeps_fresh_refresh_token() {
        let state = testutil::state();
        seed(&state);
        let first = login(&state.db, &state.tokens, &login_req("hunter2")).unwrap();
        let refresh = first.refresh_token.unwrap();

        let again = reissue(&state.db, &state.tokens, &refresh).unwrap();
        assert!(again.refresh_token.is_none());
        assert!(state.tokens.verify_access(&again.access_token).is_ok());
    }

    #[test]
    fn test_reissue_rotates_token_near_expiry() {
        let state = testutil::state();
        let id = seed(&state);
        let near = state.tokens.issue_refresh_with_ttl(id, Duration::hours(2)).unwrap();
        state.db.save_refresh_token(id, Some(&near)).unwrap();

        let out = reissue(&state.db, &state.tokens, &near).unwrap();
        let rotated = out.refresh_token.unwrap();
        let stored = state.db.get_user_by_id(id).unwrap().unwrap().refresh_token;
        assert_eq!(stored.as_deref(), Some(rotated.as_str()));

        // the replaced token no longer matches
        assert!(matches!(
            reissue(&state.db, &state.tokens, &near),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_logout_invalidates_refresh_token() {
        let state = testutil::state();
        let id = seed(&state);
        let tokens = login(&state.db, &state.tokens, &login_req("hunter2")).unwrap();

        logout(&state.db, id).unwrap();
        let err = reissue(&state.db, &state.tokens, &tokens.refresh_token.unwrap()).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }
}
