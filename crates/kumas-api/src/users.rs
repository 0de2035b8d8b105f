use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use kumas_db::{Connection, Database, queries};
use kumas_types::api::{Claims, RegisterRequest, UpdateUserRequest};
use kumas_types::models::{User, UserId};

use crate::auth::hash_password;
use crate::error::ApiError;
use crate::state::AppState;
use crate::{blocking, reply, validate};

pub const EMAIL_IN_USE: &str = "This is the email used.";
pub const NOT_AN_IMAGE: &str = "Only image format is possible.";

/// Upper bound for a profile image upload.
pub const MAX_IMAGE_BYTES: usize = 100 * 1024;

/// Public path prefix under which uploads are served.
pub const IMAGE_PREFIX: &str = "img";

pub fn register(db: &Database, req: &RegisterRequest) -> Result<User, ApiError> {
    validate::register(req)?;
    let password_hash = hash_password(&req.password)?;

    let user = db.with_tx(|tx| -> Result<User, ApiError> {
        if queries::email_taken(tx, &req.email, None)? {
            return Err(ApiError::bad_request(EMAIL_IN_USE));
        }
        let id = queries::insert_user(tx, &req.email, &password_hash, &req.name, req.gender)
            .map_err(|e| ApiError::from_store(e, || ApiError::bad_request(EMAIL_IN_USE)))?;
        load(tx, id)
    })?;

    info!("registered user {} ({})", user.id, user.email);
    Ok(user)
}

pub fn get_user_by_id(db: &Database, id: UserId) -> Result<User, ApiError> {
    let row = db.get_user_by_id(id)?.ok_or_else(ApiError::not_found)?;
    Ok(row.into_user())
}

pub fn get_user_by_email(db: &Database, email: &str) -> Result<User, ApiError> {
    let row = db.get_user_by_email(email)?.ok_or_else(ApiError::not_found)?;
    Ok(row.into_user())
}

pub fn update_user(db: &Database, id: UserId, req: &UpdateUserRequest) -> Result<User, ApiError> {
    validate::update_user(req)?;
    let password_hash = req.password.as_deref().map(hash_password).transpose()?;

    db.with_tx(|tx| {
        if let Some(email) = &req.email {
            if queries::email_taken(tx, email, Some(id))? {
                return Err(ApiError::bad_request(EMAIL_IN_USE));
            }
        }
        let n = queries::update_user(
            tx,
            id,
            req.email.as_deref(),
            password_hash.as_deref(),
            req.name.as_deref(),
        )
        .map_err(|e| ApiError::from_store(e, || ApiError::bad_request(EMAIL_IN_USE)))?;
        if n == 0 {
            return Err(ApiError::not_found());
        }
        load(tx, id)
    })
}

/// `Active -> Deleted`. The row and its email stay; every lookup skips it.
pub fn delete_user(db: &Database, id: UserId) -> Result<(), ApiError> {
    let deleted = db.with_conn(|conn| queries::soft_delete_user(conn, id))?;
    if !deleted {
        return Err(ApiError::not_found());
    }
    info!("user {} soft-deleted", id);
    Ok(())
}

pub fn set_image_path(db: &Database, id: UserId, path: Option<&str>) -> Result<User, ApiError> {
    db.with_tx(|tx| {
        if queries::set_profile_image(tx, id, path)? == 0 {
            return Err(ApiError::not_found());
        }
        load(tx, id)
    })
}

/// File extension for an accepted image content type.
pub fn image_extension(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    match mime.to_ascii_lowercase().as_str() {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpeg"),
        "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

/// Store an uploaded image and point the user's profile at it.
pub async fn set_profile_image(
    state: &AppState,
    id: UserId,
    content_type: Option<&str>,
    body: Bytes,
) -> Result<User, ApiError> {
    let ext = content_type
        .and_then(image_extension)
        .ok_or_else(|| ApiError::Forbidden(NOT_AN_IMAGE.to_string()))?;
    if body.is_empty() || body.len() > MAX_IMAGE_BYTES {
        return Err(ApiError::Forbidden(NOT_AN_IMAGE.to_string()));
    }

    let file_name = format!("{}.{}", Uuid::new_v4(), ext);
    let file_path = state.upload_dir.join(&file_name);
    tokio::fs::create_dir_all(&state.upload_dir)
        .await
        .map_err(|e| anyhow::anyhow!("create upload dir: {}", e))?;
    tokio::fs::write(&file_path, &body)
        .await
        .map_err(|e| anyhow::anyhow!("write upload {}: {}", file_path.display(), e))?;

    let public_path = format!("{IMAGE_PREFIX}/{file_name}");
    let result = blocking(state, move |s| set_image_path(&s.db, id, Some(&public_path))).await;
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(&file_path).await {
            warn!("failed to remove orphaned upload {}: {}", file_path.display(), e);
        }
    }
    result
}

fn load(conn: &Connection, id: UserId) -> Result<User, ApiError> {
    let row = queries::find_user_by_id(conn, id)?.ok_or_else(ApiError::not_found)?;
    Ok(row.into_user())
}

// -- Handlers --

pub async fn register_handler(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = blocking(&state, move |s| register(&s.db, &req)).await?;
    Ok(reply(StatusCode::CREATED, user))
}

pub async fn get_by_id_handler(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<impl IntoResponse, ApiError> {
    let user = blocking(&state, move |s| get_user_by_id(&s.db, id)).await?;
    Ok(reply(StatusCode::OK, user))
}

pub async fn get_by_email_handler(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = blocking(&state, move |s| get_user_by_email(&s.db, &email)).await?;
    Ok(reply(StatusCode::OK, user))
}

pub async fn update_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = blocking(&state, move |s| update_user(&s.db, claims.id, &req)).await?;
    Ok(reply(StatusCode::OK, user))
}

pub async fn delete_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    blocking(&state, move |s| delete_user(&s.db, claims.id)).await?;
    Ok(reply(StatusCode::OK, ()))
}

pub async fn set_image_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let user = set_profile_image(&state, claims.id, content_type, body).await?;
    Ok(reply(StatusCode::CREATED, user))
}

pub async fn clear_image_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = blocking(&state, move |s| set_image_path(&s.db, claims.id, None)).await?;
    Ok(reply(StatusCode::OK, user))
}
