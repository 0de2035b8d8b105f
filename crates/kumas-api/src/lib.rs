pub mod auth;
pub mod chats;
pub mod error;
pub mod friends;
pub mod messages;
pub mod middleware;
pub mod state;
pub mod tokens;
pub mod users;
pub mod validate;

use axum::{Json, http::StatusCode};
use serde::Serialize;
use tracing::error;

use kumas_types::api::ApiResponse;

use crate::error::ApiError;
use crate::state::{AppState, AppStateInner};

/// Wrap a handler result in the success envelope.
pub fn reply<T: Serialize>(code: StatusCode, result: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (
        code,
        Json(ApiResponse {
            success: true,
            code: code.as_u16(),
            result,
        }),
    )
}

/// Run store work off the async runtime.
pub async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppStateInner) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&*state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("blocking task failed: {}", e))
        })?
}

#[cfg(test)]
pub(crate) mod testutil {
    use kumas_db::Database;
    use kumas_gateway::dispatcher::Dispatcher;
    use kumas_types::models::{Gender, UserId};

    use crate::state::{AppState, AppStateInner};
    use crate::tokens::TokenKeys;

    pub fn state() -> AppState {
        AppStateInner::new(
            Database::open_in_memory().unwrap(),
            Dispatcher::new(),
            TokenKeys::new("test-access-secret", "test-refresh-secret"),
            std::env::temp_dir().join(format!("kumas-test-{}", uuid::Uuid::new_v4())),
        )
    }

    /// Insert a user directly, skipping password hashing.
    pub fn user(db: &Database, email: &str, name: &str) -> UserId {
        db.with_conn(|conn| kumas_db::queries::insert_user(conn, email, "x", name, Gender::M))
            .unwrap()
    }
}
