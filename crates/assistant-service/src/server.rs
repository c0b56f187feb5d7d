//! HTTP server startup and routing.

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::{api, config::Config, metrics, shared_state::AppState};

/// Run the assistant service until the listener fails.
pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    cfg.print_config();
    let addr = cfg.api_addr()?;
    let state = AppState::from_config(cfg)?;

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/query", get(api::query))
        .route("/quota", get(api::get_quota))
        .route("/heartbeat", get(api::heartbeat))
        .route("/metrics", get(metrics::get_metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::QuotaResponse;
    use crate::backend::testing::ScriptedBackend;
    use crate::config::SessionSettings;
    use crate::quota::{IdentityResolver, QuotaLedger, UserInfo};
    use crate::registry::Registry;
    use crate::session::SessionServices;
    use crate::store::MemoryStore;
    use crate::verifier::{Verifier, DEFAULT_VERIFIER_TIMEOUT};
    use crate::widgets::DefaultWidgetRenderer;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    /// "sub" has a subscription, "free" does not, anything else is rejected.
    struct TokenTable;

    #[async_trait]
    impl IdentityResolver for TokenTable {
        async fn resolve(&self, token: &str) -> anyhow::Result<UserInfo> {
            match token {
                "sub" => Ok(UserInfo { user_id: 1, has_subscription: true }),
                "free" => Ok(UserInfo { user_id: 2, has_subscription: false }),
                _ => Err(anyhow::anyhow!("error from user id service: unknown token")),
            }
        }
    }

    fn test_config() -> Config {
        Config {
            api_host: "127.0.0.1".into(),
            api_port: 0,
            gemini_key: "key".into(),
            gemini_base_url: "http://localhost".into(),
            chat_model: "chat".into(),
            verifier_model: "lite".into(),
            user_identification_url: "http://localhost/identify".into(),
            store_path: None,
            word_delay_ms: 0,
            action_timeout_seconds: 1,
            verifier_timeout_ms: 100,
            max_tool_iterations: 10,
            thread_ttl_seconds: 600,
            monthly_quota_credits: 1_000,
        }
    }

    fn test_state(store: Arc<MemoryStore>) -> AppState {
        let backend = Arc::new(ScriptedBackend::default());
        let settings = SessionSettings {
            monthly_quota_credits: 1_000,
            ..SessionSettings::default()
        };
        let services = SessionServices {
            store,
            identity: Arc::new(TokenTable),
            backend: backend.clone(),
            registry: Arc::new(Registry::default()),
            renderer: Arc::new(DefaultWidgetRenderer),
            verifier: Arc::new(Verifier::new(backend, "lite", DEFAULT_VERIFIER_TIMEOUT)),
            settings,
        };
        AppState::new(test_config(), services)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_heartbeat() {
        let app = build_router(test_state(Arc::new(MemoryStore::new())));
        let (status, body) = get(app, "/heartbeat").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"bobby");
    }

    #[tokio::test]
    async fn test_quota_reports_usage() {
        let store = Arc::new(MemoryStore::new());
        QuotaLedger::new(store.clone(), 1).charge_credits(250).await.unwrap();
        let app = build_router(test_state(store));

        let (status, body) = get(app, "/quota?token=sub").await;

        assert_eq!(status, StatusCode::OK);
        let quota: QuotaResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            quota,
            QuotaResponse {
                used: 250,
                remaining: 750,
                has_subscription: true
            }
        );
    }

    #[tokio::test]
    async fn test_quota_without_subscription() {
        let app = build_router(test_state(Arc::new(MemoryStore::new())));
        let (status, body) = get(app, "/quota?token=free").await;
        assert_eq!(status, StatusCode::OK);
        let quota: QuotaResponse = serde_json::from_slice(&body).unwrap();
        assert!(!quota.has_subscription);
        assert_eq!((quota.used, quota.remaining), (0, 0));
    }

    #[tokio::test]
    async fn test_quota_rejects_missing_or_bad_token() {
        let app = build_router(test_state(Arc::new(MemoryStore::new())));
        let (status, body) = get(app.clone(), "/quota").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, b"No token provided.");

        let (status, _) = get(app, "/quota?token=nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        metrics::init_metrics();
        let app = build_router(test_state(Arc::new(MemoryStore::new())));
        let _ = get(app.clone(), "/quota?token=sub").await;
        let (status, body) = get(app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8_lossy(&body).contains("requests_total"));
    }
}
