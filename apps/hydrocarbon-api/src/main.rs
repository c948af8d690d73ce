use std::sync::Arc;

use anyhow::Result;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hydrocarbon_common::Config;
use hydrocarbon_core::{HttpClient, PluginRegistry, RateLimiter, Store};
use hydrocarbon_plugin_feed::FeedPlugin;
use hydrocarbon_plugin_forum::ForumPlugin;
use hydrocarbon_store::PgStore;

mod auth;
mod response;
mod routes;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub registry: Arc<PluginRegistry>,
    pub http: Arc<HttpClient>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hydrocarbon=info".parse()?))
        .init();

    let config = Config::api_from_env();
    config.log_redacted();

    let store: Arc<dyn Store> = Arc::new(PgStore::connect(&config.database_url).await?);
    let registry = Arc::new(PluginRegistry::new(vec![Arc::new(FeedPlugin::new()), Arc::new(ForumPlugin::new())]));
    let limiter = Arc::new(RateLimiter::new(config.rate_limit_rps, config.rate_limit_burst));
    let http = Arc::new(HttpClient::new(limiter));

    let state = Arc::new(AppState { store, registry, http });

    let app = Router::new()
        .route("/v1/token/create", post(routes::token_create))
        .route("/v1/key/create", post(routes::key_create))
        .route("/v1/feed/list", get(routes::feed_list))
        .route("/v1/feed/create", post(routes::feed_create))
        .route("/v1/feed/remove", post(routes::feed_remove))
        .route("/v1/folder/list", get(routes::folder_list))
        .route("/v1/folder/create", post(routes::folder_create))
        .route("/v1/post/list", get(routes::post_list))
        .route("/v1/post/get", get(routes::post_get))
        .route("/v1/post/mark_read", post(routes::post_mark_read))
        .route("/v1/plugin/list", get(routes::plugin_list))
        .route("/", get(|| async { "ok" }))
        .with_state(state)
        .layer(if cfg!(debug_assertions) {
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static("x-hydrocarbon-key")])
        } else {
            let origins: Vec<HeaderValue> = std::env::var("CORS_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static("x-hydrocarbon-key")])
        })
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(header::CACHE_CONTROL, HeaderValue::from_static("no-store")))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!("http_request", method = %request.method(), path = %request.uri().path())
            }),
        );

    let addr = config.http_listen_addr.clone();
    info!("hydrocarbon api starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>()).await?;

    Ok(())
}
