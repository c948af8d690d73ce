//! The `X-Hydrocarbon-Key` session extractor. Runs before any handler
//! body, rejecting with `401` rather than letting an unauthenticated
//! request reach a handler.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::response::ApiError;
use crate::AppState;

const KEY_HEADER: &str = "X-Hydrocarbon-Key";

pub struct SessionKey(pub Uuid);

impl FromRequestParts<Arc<AppState>> for SessionKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let user_id = state.store.verify_key(key).await?.ok_or(ApiError::Unauthorized)?;
        Ok(SessionKey(user_id))
    }
}
