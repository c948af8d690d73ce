use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use hydrocarbon_common::ScrapeSchedule;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::SessionKey;
use crate::response::{ApiError, ApiResponse};
use crate::AppState;

#[derive(Deserialize)]
pub struct CreateTokenRequest {
    pub email: String,
}

pub async fn token_create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTokenRequest>,
) -> ApiResponse<serde_json::Value> {
    let result = state.store.create_login_token(&req.email).await;
    ApiResponse::from(result.map(|token| serde_json::json!({ "token": token })))
}

#[derive(Deserialize)]
pub struct CreateKeyRequest {
    pub token: String,
}

pub async fn key_create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateKeyRequest>,
) -> ApiResponse<serde_json::Value> {
    let result = state.store.create_session(&req.token).await;
    ApiResponse::from(result.map(|key| serde_json::json!({ "key": key })))
}

pub async fn feed_list(State(state): State<Arc<AppState>>, SessionKey(user_id): SessionKey) -> ApiResponse<serde_json::Value> {
    let result = state.store.list_feeds(user_id).await;
    ApiResponse::from(result.map(|feeds| serde_json::json!({ "feeds": feeds })))
}

#[derive(Deserialize)]
pub struct CreateFeedRequest {
    pub url: String,
}

pub async fn feed_create(
    State(state): State<Arc<AppState>>,
    SessionKey(user_id): SessionKey,
    Json(req): Json<CreateFeedRequest>,
) -> ApiResponse<serde_json::Value> {
    ApiResponse(feed_create_inner(state, user_id, req).await)
}

async fn feed_create_inner(
    state: Arc<AppState>,
    user_id: Uuid,
    req: CreateFeedRequest,
) -> Result<serde_json::Value, ApiError> {
    let opts = hydrocarbon_core::registry::HandlerOpts { http: state.http.clone(), params: Vec::new() };

    let plugin = state
        .registry
        .for_entrypoint(&req.url, &[])
        .map_err(|_| ApiError::BadRequest("no registered plugin accepts this url".into()))?
        .clone();

    let (title, config) = plugin
        .create_config(&req.url, &opts)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let feed = state.store.create_feed(user_id, title, plugin.name().to_string(), req.url).await?;

    state
        .store
        .insert_schedule(
            feed.id,
            plugin.name(),
            &[ScrapeSchedule { scheduled_start_at: chrono::Utc::now(), config }],
        )
        .await?;

    Ok(serde_json::json!({ "feed": feed }))
}

#[derive(Deserialize)]
pub struct RemoveFeedRequest {
    pub feed_id: Uuid,
}

pub async fn feed_remove(
    State(state): State<Arc<AppState>>,
    SessionKey(user_id): SessionKey,
    Json(req): Json<RemoveFeedRequest>,
) -> ApiResponse<serde_json::Value> {
    let result = state.store.remove_feed(user_id, req.feed_id).await;
    ApiResponse::from(result.map(|_| serde_json::json!({})))
}

pub async fn folder_list(State(state): State<Arc<AppState>>, SessionKey(user_id): SessionKey) -> ApiResponse<serde_json::Value> {
    let result = state.store.list_folders(user_id).await;
    ApiResponse::from(result.map(|folders| serde_json::json!({ "folders": folders })))
}

#[derive(Deserialize)]
pub struct CreateFolderRequest {
    pub name: String,
}

pub async fn folder_create(
    State(state): State<Arc<AppState>>,
    SessionKey(user_id): SessionKey,
    Json(req): Json<CreateFolderRequest>,
) -> ApiResponse<serde_json::Value> {
    let result = state.store.create_folder(user_id, req.name).await;
    ApiResponse::from(result.map(|folder| serde_json::json!({ "folder": folder })))
}

#[derive(Deserialize)]
pub struct PostListQuery {
    pub feed_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn post_list(
    State(state): State<Arc<AppState>>,
    SessionKey(user_id): SessionKey,
    Query(query): Query<PostListQuery>,
) -> ApiResponse<serde_json::Value> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);
    let result = state.store.list_posts(user_id, query.feed_id, limit, offset).await;
    ApiResponse::from(result.map(|posts| serde_json::json!({ "posts": posts })))
}

#[derive(Deserialize)]
pub struct PostGetQuery {
    pub post_id: Uuid,
}

pub async fn post_get(
    State(state): State<Arc<AppState>>,
    SessionKey(user_id): SessionKey,
    Query(query): Query<PostGetQuery>,
) -> ApiResponse<serde_json::Value> {
    ApiResponse(post_get_inner(state, user_id, query.post_id).await)
}

async fn post_get_inner(state: Arc<AppState>, user_id: Uuid, post_id: Uuid) -> Result<serde_json::Value, ApiError> {
    let post = state.store.get_post(user_id, post_id).await?.ok_or(ApiError::NotFound)?;
    Ok(serde_json::json!({ "post": post }))
}

#[derive(Deserialize)]
pub struct MarkReadRequest {
    pub post_id: Uuid,
}

pub async fn post_mark_read(
    State(state): State<Arc<AppState>>,
    SessionKey(user_id): SessionKey,
    Json(req): Json<MarkReadRequest>,
) -> ApiResponse<serde_json::Value> {
    let result = state.store.mark_post_read(user_id, req.post_id).await;
    ApiResponse::from(result.map(|_| serde_json::json!({})))
}

pub async fn plugin_list(State(state): State<Arc<AppState>>, _key: SessionKey) -> ApiResponse<serde_json::Value> {
    let names: Vec<&str> = state.registry.list_names();
    ApiResponse(Ok(serde_json::json!({ "plugins": names })))
}
