pub mod config;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post, put},
};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use kumas_api::error::ApiError;
use kumas_api::middleware::{bearer_token, require_auth};
use kumas_api::state::AppState;
use kumas_api::{auth, chats, friends, messages, users};
use kumas_gateway::connection;

/// Assemble the full HTTP surface. API routes live under `api_prefix`;
/// uploaded images are served from the state's upload directory at `/img`.
pub fn build_router(state: AppState, api_prefix: &str) -> Router {
    let public_routes = Router::new()
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/token", post(auth::reissue_handler))
        .route("/auth/register", post(users::register_handler))
        .route("/users", post(users::register_handler))
        .route("/users/id/{id}", get(users::get_by_id_handler))
        .route("/users/email/{email}", get(users::get_by_email_handler))
        .route("/gateway", get(ws_upgrade));

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route(
            "/users",
            patch(users::update_handler).delete(users::delete_handler),
        )
        .route(
            "/users/images",
            post(users::set_image_handler).delete(users::clear_image_handler),
        )
        .route("/friends", get(friends::list_handler).post(friends::add_handler))
        .route("/friends/{id}", delete(friends::remove_handler))
        .route("/chats", get(chats::list_handler).post(chats::create_handler))
        .route(
            "/chats/{chat_id}",
            put(chats::update_handler).delete(chats::delete_handler),
        )
        .route(
            "/chats/{chat_id}/messages",
            get(messages::list_handler).post(messages::create_handler),
        )
        .route(
            "/chats/{chat_id}/messages/{message_id}",
            delete(messages::delete_handler),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let api = public_routes
        .merge(protected_routes)
        .with_state(state.clone());

    let router = if api_prefix.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(api_prefix, api)
    };

    router
        .nest_service("/img", ServeDir::new(&state.upload_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// Authenticate before upgrading: the access token comes from the bearer
/// header or, for browser clients, the `token` query parameter.
async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)
        .or(query.token)
        .ok_or_else(ApiError::unauthorized)?;
    let claims = state.tokens.verify_access(&token)?;

    let dispatcher = state.dispatcher.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, dispatcher, claims.id, claims.name)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use kumas_api::state::AppStateInner;
    use kumas_api::tokens::TokenKeys;
    use kumas_db::Database;
    use kumas_gateway::dispatcher::Dispatcher;
    use tower::ServiceExt;

    fn router() -> Router {
        let state = AppStateInner::new(
            Database::open_in_memory().unwrap(),
            Dispatcher::new(),
            TokenKeys::new("access", "refresh"),
            std::env::temp_dir().join("kumas-router-test"),
        );
        build_router(state, "/api")
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_protected_route_without_token_is_unauthorized() {
        let response = router()
            .oneshot(Request::get("/api/chats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], 401);
        assert_eq!(body["name"], "UnauthorizedError");
    }

    #[tokio::test]
    async fn test_register_returns_success_envelope() {
        let request = Request::post("/api/users")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"email":"user1@kumas.dev","password":"hunter2","name":"heungbu","gender":"M"}"#,
            ))
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["code"], 201);
        assert_eq!(body["result"]["email"], "user1@kumas.dev");
        assert!(body["result"].get("password").is_none());
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found_envelope() {
        let response = router()
            .oneshot(Request::get("/api/users/id/42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(response).await["message"], kumas_api::error::NO_MATCH);
    }
}
