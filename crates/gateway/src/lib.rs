//! HTTP gateway for chatrelay.
//!
//! Exposes the streaming generation endpoint plus conversation CRUD and
//! usage statistics. Non-streaming responses share a `{ code, message,
//! data }` envelope; the SSE endpoint bypasses it.
//!
//! Built on Axum.

pub mod chat_api;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderMap;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware::{self, Next},
    response::Json,
    routing::{get, post},
};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use chatrelay_chat::{
    ChatPipeline, ContextAssembler, GenerationBroker, ModelRouting, PersistenceCoordinator,
};
use chatrelay_config::AppConfig;
use chatrelay_core::{HistoryStore, TextGenerator, UsageStore};
use chatrelay_metering::{ModelPricing, PricingTable, UsageMeter};
use chatrelay_providers::DeepSeekGenerator;
use chatrelay_store::SqliteStore;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub pipeline: ChatPipeline,
    pub history: Arc<dyn HistoryStore>,
    pub usage: Arc<dyn UsageStore>,
    /// Static bearer token -> user id map from config.
    pub tokens: HashMap<String, String>,
}

impl GatewayState {
    /// Resolve the caller from the `Authorization: Bearer` header.
    pub fn resolve_user(&self, headers: &HeaderMap) -> Option<String> {
        let token = headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))?;
        self.tokens.get(token).cloned()
    }
}

pub type SharedState = Arc<GatewayState>;

/// The resolved caller, inserted by the auth middleware.
#[derive(Debug, Clone)]
pub struct AuthedUser(pub String);

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    // CRUD and statistics require a resolvable bearer token; the
    // streaming endpoint handles anonymous callers itself.
    let protected = Router::new()
        .route(
            "/conversation",
            post(chat_api::create_conversation_handler).get(chat_api::list_conversations_handler),
        )
        .route(
            "/conversation/{id}",
            get(chat_api::get_conversation_handler).delete(chat_api::delete_conversation_handler),
        )
        .route("/statistics/overview", get(chat_api::overview_handler))
        .route(
            "/statistics/usage/daily",
            get(chat_api::daily_usage_handler),
        )
        .route(
            "/statistics/usage/by-model",
            get(chat_api::usage_by_model_handler),
        )
        .route(
            "/statistics/conversation/{id}",
            get(chat_api::conversation_stats_handler),
        )
        .route(
            "/statistics/top-conversations",
            get(chat_api::top_conversations_handler),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/chat/generate", post(chat_api::generate_handler))
        .with_state(state)
        .merge(protected)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// `GET /health`
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Bearer auth for the envelope routes. Inserts [`AuthedUser`].
async fn auth_middleware(
    State(state): State<SharedState>,
    mut req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    match state.resolve_user(req.headers()) {
        Some(user_id) => {
            req.extensions_mut().insert(AuthedUser(user_id));
            Ok(next.run(req).await)
        }
        None => {
            warn!("Unauthorized request: missing or unknown bearer token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store = Arc::new(SqliteStore::new(&config.store.db_path).await?);

    let pricing = PricingTable::with_defaults();
    for (model, p) in &config.pricing {
        pricing.set(
            model.clone(),
            ModelPricing::new(p.input_per_m, p.output_per_m, p.cached_input_per_m),
        );
    }
    let meter = Arc::new(UsageMeter::new(pricing));

    let generator: Option<Arc<dyn TextGenerator>> = match &config.backend.api_key {
        Some(key) => Some(Arc::new(
            DeepSeekGenerator::with_timeout(
                key,
                std::time::Duration::from_secs(config.backend.request_timeout_secs),
            )
            .with_base_url(&config.backend.base_url),
        )),
        None => {
            warn!("No backend API key configured; generation requests will be rejected");
            None
        }
    };

    let routing = ModelRouting {
        primary: config.backend.primary_model.clone(),
        extended_reasoning: config.backend.reasoning_model.clone(),
        max_tokens: config.backend.max_tokens,
        temperature: config.backend.temperature,
    };

    let history: Arc<dyn HistoryStore> = store.clone();
    let usage: Arc<dyn UsageStore> = store;

    let pipeline = ChatPipeline::new(
        ContextAssembler::new(history.clone(), config.pipeline.history_window),
        GenerationBroker::new(generator, routing),
        Arc::new(PersistenceCoordinator::new(
            history.clone(),
            usage.clone(),
            meter,
        )),
        config.pipeline.client_buffer,
    );

    let state = Arc::new(GatewayState {
        pipeline,
        history,
        usage,
        tokens: config.gateway.tokens.clone(),
    });

    let app = build_router(state);
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use chatrelay_core::{BackendError, GenerationEvent, GenerationRequest, TokenUsage};
    use chatrelay_store::MemoryStore;
    use tokio::sync::mpsc;

    /// Streams a fixed answer without touching a real backend.
    struct MockGenerator;

    #[async_trait::async_trait]
    impl TextGenerator for MockGenerator {
        fn name(&self) -> &str {
            "mock"
        }

        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<mpsc::Receiver<GenerationEvent>, BackendError> {
            let (tx, rx) = mpsc::channel(8);
            tokio::spawn(async move {
                let events = vec![
                    GenerationEvent::TextDelta {
                        text: "Hello".into(),
                    },
                    GenerationEvent::TextDelta {
                        text: " world".into(),
                    },
                    GenerationEvent::Finish {
                        text: "Hello world".into(),
                        reasoning: String::new(),
                        model_id: "deepseek-chat".into(),
                        usage: Some(TokenUsage {
                            input_tokens: 10,
                            output_tokens: 5,
                            total_tokens: 15,
                            cached_input_tokens: 0,
                            reasoning_tokens: 0,
                        }),
                    },
                ];
                for event in events {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }
    }

    fn test_state(generator: Option<Arc<dyn TextGenerator>>) -> SharedState {
        let store = Arc::new(MemoryStore::new());
        let history: Arc<dyn HistoryStore> = store.clone();
        let usage: Arc<dyn UsageStore> = store;

        let pricing = PricingTable::with_defaults();
        let meter = Arc::new(UsageMeter::new(pricing));

        let pipeline = ChatPipeline::new(
            ContextAssembler::new(history.clone(), 40),
            GenerationBroker::new(generator, ModelRouting::default()),
            Arc::new(PersistenceCoordinator::new(
                history.clone(),
                usage.clone(),
                meter,
            )),
            64,
        );

        let mut tokens = HashMap::new();
        tokens.insert("secret-token".to_string(), "user-1".to_string());

        Arc::new(GatewayState {
            pipeline,
            history,
            usage,
            tokens,
        })
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = build_router(test_state(None));

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn envelope_routes_require_auth() {
        let app = build_router(test_state(None));

        let req = Request::builder()
            .uri("/conversation")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_and_list_conversations() {
        let state = test_state(None);

        let req = Request::builder()
            .method("POST")
            .uri("/conversation")
            .header("Authorization", "Bearer secret-token")
            .header("Content-Type", "application/json")
            .body(Body::from(r#"{"title": "First chat"}"#))
            .unwrap();

        let response = build_router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["code"], 200);
        assert_eq!(envelope["message"], "ok");
        assert!(envelope["data"]["id"].is_string());

        let req = Request::builder()
            .uri("/conversation")
            .header("Authorization", "Bearer secret-token")
            .body(Body::empty())
            .unwrap();

        let response = build_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["data"]["items"].as_array().unwrap().len(), 1);
        assert_eq!(envelope["data"]["total"], 1);
    }

    #[tokio::test]
    async fn missing_conversation_is_404() {
        let app = build_router(test_state(None));

        let req = Request::builder()
            .uri("/conversation/nonexistent")
            .header("Authorization", "Bearer secret-token")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn generate_streams_sse_frames() {
        let state = test_state(Some(Arc::new(MockGenerator)));
        let conversation = state
            .history
            .create_conversation("user-1", None)
            .await
            .unwrap();

        let body = serde_json::json!({
            "conversation_id": conversation.id,
            "model_type": "primary",
            "messages": [{"role": "user", "content": "hi"}]
        });

        let req = Request::builder()
            .method("POST")
            .uri("/chat/generate")
            .header("Authorization", "Bearer secret-token")
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = build_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"));

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("event: text-delta"));
        assert!(text.contains("event: finish"));
        assert!(text.contains("Hello world"));
    }

    #[tokio::test]
    async fn generate_without_backend_is_rejected() {
        let state = test_state(None);
        let conversation = state
            .history
            .create_conversation("user-1", None)
            .await
            .unwrap();

        let body = serde_json::json!({
            "conversation_id": conversation.id,
            "model_type": "primary",
            "messages": [{"role": "user", "content": "hi"}]
        });

        let req = Request::builder()
            .method("POST")
            .uri("/chat/generate")
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = build_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn generate_for_unknown_conversation_is_404() {
        let state = test_state(Some(Arc::new(MockGenerator)));

        let body = serde_json::json!({
            "conversation_id": "no-such-conversation",
            "model_type": "primary",
            "messages": [{"role": "user", "content": "hi"}]
        });

        let req = Request::builder()
            .method("POST")
            .uri("/chat/generate")
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = build_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn statistics_routes_report_usage() {
        let state = test_state(None);
        let conversation = state
            .history
            .create_conversation("user-1", Some("metrics".into()))
            .await
            .unwrap();
        state
            .usage
            .create_usage(chatrelay_core::UsageRecord {
                user_id: "user-1".into(),
                conversation_id: conversation.id.clone(),
                message_id: "m1".into(),
                model: "deepseek-chat".into(),
                input_tokens: 100,
                output_tokens: 50,
                total_tokens: 150,
                cached_input_tokens: 0,
                reasoning_tokens: 0,
                estimated_cost: 0.0012,
            })
            .await
            .unwrap();

        let get = |uri: &str| {
            Request::builder()
                .uri(uri)
                .header("Authorization", "Bearer secret-token")
                .body(Body::empty())
                .unwrap()
        };

        let response = build_router(state.clone())
            .oneshot(get("/statistics/usage/by-model"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["data"][0]["model"], "deepseek-chat");
        assert_eq!(envelope["data"][0]["total_tokens"], 150);

        let response = build_router(state.clone())
            .oneshot(get("/statistics/usage/daily?days=7"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["data"].as_array().unwrap().len(), 1);
        assert_eq!(envelope["data"][0]["count"], 1);

        let response = build_router(state.clone())
            .oneshot(get("/statistics/top-conversations"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["data"][0]["title"], "metrics");
        assert_eq!(envelope["data"][0]["request_count"], 1);

        let uri = format!("/statistics/conversation/{}", conversation.id.0);
        let response = build_router(state.clone()).oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["data"]["request_count"], 1);
        assert_eq!(envelope["data"]["total_tokens"], 150);

        // Conversations you do not own look like they do not exist.
        let response = build_router(state)
            .oneshot(get("/statistics/conversation/someone-elses"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
