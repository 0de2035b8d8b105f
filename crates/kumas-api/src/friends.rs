use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;

use kumas_db::{Database, queries};
use kumas_types::api::{Claims, FriendRequest};
use kumas_types::models::{User, UserId};

use crate::error::ApiError;
use crate::state::AppState;
use crate::{blocking, reply};

pub const ALREADY_FRIENDS: &str = "It's already registered.";
pub const NOT_FRIENDS: &str = "It's not registered.";

pub fn list_friends(db: &Database, user_id: UserId) -> Result<Vec<User>, ApiError> {
    let rows = db.with_conn(|conn| queries::list_friends(conn, user_id))?;
    Ok(rows.into_iter().map(|r| r.into_user()).collect())
}

/// Add a directed edge `user_id -> target_id` and return the target's profile.
pub fn add_friend(db: &Database, user_id: UserId, target_id: UserId) -> Result<User, ApiError> {
    if user_id == target_id {
        return Err(ApiError::forbidden());
    }

    db.with_tx(|tx| {
        let target = queries::find_user_by_id(tx, target_id)?.ok_or_else(ApiError::not_found)?;
        if queries::friend_exists(tx, user_id, target_id)? {
            return Err(ApiError::bad_request(ALREADY_FRIENDS));
        }
        queries::insert_friend(tx, user_id, target_id)
            .map_err(|e| ApiError::from_store(e, || ApiError::bad_request(ALREADY_FRIENDS)))?;
        debug!("user {} added friend {}", user_id, target_id);
        Ok(target.into_user())
    })
}

pub fn remove_friend(db: &Database, user_id: UserId, target_id: UserId) -> Result<(), ApiError> {
    if user_id == target_id {
        return Err(ApiError::forbidden());
    }

    db.with_tx(|tx| {
        queries::find_user_by_id(tx, target_id)?.ok_or_else(ApiError::not_found)?;
        if queries::delete_friend(tx, user_id, target_id)? == 0 {
            return Err(ApiError::bad_request(NOT_FRIENDS));
        }
        debug!("user {} removed friend {}", user_id, target_id);
        Ok(())
    })
}

// -- Handlers --

pub async fn list_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let friends = blocking(&state, move |s| list_friends(&s.db, claims.id)).await?;
    Ok(reply(StatusCode::OK, friends))
}

pub async fn add_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<FriendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let friend = blocking(&state, move |s| add_friend(&s.db, claims.id, req.target_id)).await?;
    Ok(reply(StatusCode::CREATED, friend))
}

pub async fn remove_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(target_id): Path<UserId>,
) -> Result<impl IntoResponse, ApiError> {
    blocking(&state, move |s| remove_friend(&s.db, claims.id, target_id)).await?;
    Ok(reply(StatusCode::OK, ()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn test_friend_edge_lifecycle() {
        let state = testutil::state();
        let a = testutil::user(&state.db, "user1@kumas.dev", "heungbu");
        let b = testutil::user(&state.db, "user2@kumas.dev", "nolbu");

        let added = add_friend(&state.db, a, b).unwrap();
        assert_eq!(added.id, b);
        assert!(matches!(
            add_friend(&state.db, a, b),
            Err(ApiError::BadRequest(ref m)) if m == ALREADY_FRIENDS
        ));

        // edges are directed
        assert_eq!(list_friends(&state.db, a).unwrap().len(), 1);
        assert!(list_friends(&state.db, b).unwrap().is_empty());

        remove_friend(&state.db, a, b).unwrap();
        assert!(matches!(
            remove_friend(&state.db, a, b),
            Err(ApiError::BadRequest(ref m)) if m == NOT_FRIENDS
        ));
    }

    #[test]
    fn test_self_and_missing_targets() {
        let state = testutil::state();
        let a = testutil::user(&state.db, "user1@kumas.dev", "heungbu");

        assert!(matches!(add_friend(&state.db, a, a), Err(ApiError::Forbidden(_))));
        assert!(matches!(remove_friend(&state.db, a, a), Err(ApiError::Forbidden(_))));
        assert!(matches!(add_friend(&state.db, a, 999), Err(ApiError::NotFound(_))));
        assert!(matches!(remove_friend(&state.db, a, 999), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn test_deleted_friend_disappears_from_list() {
        let state = testutil::state();
        let a = testutil::user(&state.db, "user1@kumas.dev", "heungbu");
        let b = testutil::user(&state.db, "user2@kumas.dev", "nolbu");
        add_friend(&state.db, a, b).unwrap();

        crate::users::delete_user(&state.db, b).unwrap();
        assert!(list_friends(&state.db, a).unwrap().is_empty());
    }
}
