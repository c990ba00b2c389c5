pub mod handlers;
pub mod routes;
pub mod state;

use axum::http::HeaderValue;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::WebConfig;
use state::AppState;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed.is_empty() || origins.iter().any(|origin| origin == "*") {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(allowed)
    }
}

/// Full router with state applied.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.web.cors_origins);

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(config: WebConfig, state: Arc<AppState>) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::config::AppConfig;
    use crate::llm::LlmManager;
    use crate::query::{HistoryStore, QueryExecutor};
    use crate::schema::SchemaManager;
    use crate::testing::{CountingSource, SHOP_DDL};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let config = AppConfig::default();
        let llm = Arc::new(LlmManager::new(&config.llm).unwrap());
        let executor = Arc::new(QueryExecutor::new(
            Arc::new(CountingSource::with_rows(vec![json!({"id": 1})])),
            Arc::new(HistoryStore::new()),
            Duration::from_secs(1),
        ));
        let state = AppState::new(
            config,
            llm,
            Arc::new(ResponseCache::default()),
            Arc::new(SchemaManager::new(None)),
            executor,
        );
        app(Arc::new(state))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let app = test_app();
        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn validation_flags_dangerous_statements() {
        let app = test_app();
        let (status, body) = send(
            &app,
            post_json("/api/query/validate", json!({"sql_query": "DROP TABLE users;"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_valid"], false);
        assert_eq!(body["estimated_execution_time"], 0.0);
    }

    #[tokio::test]
    async fn rejected_queries_are_forbidden_and_still_recorded() {
        let app = test_app();
        let (status, body) = send(
            &app,
            post_json(
                "/api/query/execute",
                json!({"sql_query": "DELETE FROM users;", "user_id": "ana"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "policy_error");

        let (status, history) = send(&app, get("/api/query/history?user_id=ana")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history.as_array().unwrap().len(), 1);
        assert_eq!(history[0]["success"], false);
    }

    #[tokio::test]
    async fn blank_sql_is_a_bad_request() {
        let app = test_app();
        let (status, body) = send(
            &app,
            post_json("/api/query/execute", json!({"sql_query": "  ", "user_id": "ana"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
        assert_eq!(body["message"], "Query is empty");
    }

    #[tokio::test]
    async fn dry_runs_return_an_empty_successful_result() {
        let app = test_app();
        let (status, body) = send(
            &app,
            post_json(
                "/api/query/execute",
                json!({"sql_query": "SELECT id FROM users;", "dry_run": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["row_count"], 0);
        assert_eq!(body["metadata"]["dry_run"], true);
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn uploaded_schemas_can_be_described() {
        let app = test_app();
        let upload = Request::builder()
            .method("POST")
            .uri("/api/schema/upload")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(SHOP_DDL))
            .unwrap();
        let (status, body) = send(&app, upload).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tables_count"], 2);

        let schema_id = body["schema_id"].as_str().unwrap().to_string();
        let (status, info) = send(&app, get(&format!("/api/schema/info?schema_id={}", schema_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["tables"].as_array().unwrap().len(), 2);
        assert_eq!(info["relationships"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn multipart_uploads_read_the_file_field() {
        let app = test_app();
        let boundary = "askgate-boundary";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"shop.sql\"\r\nContent-Type: text/plain\r\n\r\n{ddl}\r\n--{b}--\r\n",
            b = boundary,
            ddl = SHOP_DDL
        );
        let upload = Request::builder()
            .method("POST")
            .uri("/api/schema/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, body) = send(&app, upload).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["message"].as_str().unwrap().contains("shop.sql"));
    }

    #[tokio::test]
    async fn unknown_schema_ids_are_bad_requests() {
        let app = test_app();
        let (status, body) = send(&app, get("/api/schema/info?schema_id=nope")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
    }

    #[tokio::test]
    async fn offline_intent_parsing_uses_keywords() {
        let app = test_app();
        let (status, body) = send(
            &app,
            post_json("/api/nlp/parse-intent", json!({"query": "count all orders"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["intent"], "aggregate");
        assert_eq!(body["confidence"], 0.7);

        let (status, _) = send(&app, post_json("/api/nlp/parse-intent", json!({"query": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn entity_positions_are_character_ranges() {
        let app = test_app();
        let upload = Request::builder()
            .method("POST")
            .uri("/api/schema/upload")
            .body(Body::from(SHOP_DDL))
            .unwrap();
        send(&app, upload).await;

        let (status, body) = send(
            &app,
            post_json("/api/nlp/extract-entities", json!({"query": "show orders"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let entity = &body["entities"][0];
        assert_eq!(entity["type"], "table");
        assert_eq!(entity["value"], "orders");
        assert_eq!(entity["position"], json!([5, 11]));
    }

    #[tokio::test]
    async fn generation_without_a_backend_is_a_gateway_error() {
        let app = test_app();
        let upload = Request::builder()
            .method("POST")
            .uri("/api/schema/upload")
            .body(Body::from(SHOP_DDL))
            .unwrap();
        send(&app, upload).await;

        let (status, body) = send(
            &app,
            post_json("/api/nlp/generate-sql", json!({"query": "show orders"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "generation_error");
    }

    #[tokio::test]
    async fn chat_replies_carry_typed_actions_and_keep_the_conversation() {
        let app = test_app();
        let upload = Request::builder()
            .method("POST")
            .uri("/api/schema/upload")
            .body(Body::from(SHOP_DDL))
            .unwrap();
        send(&app, upload).await;

        let (status, body) = send(
            &app,
            post_json(
                "/api/chat/message",
                json!({"message": "which tables are in the schema?", "user_id": "ana"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message_type"], "schema_info");
        let kinds: Vec<&str> = body["suggested_actions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["action"]["kind"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["explain_table", "show_relationships"]);

        let conversation_id = body["conversation_id"].as_str().unwrap().to_string();
        let (status, body) = send(
            &app,
            post_json(
                "/api/chat/message",
                json!({"message": "show me something", "user_id": "ana", "conversation_id": conversation_id}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["suggested_actions"][0]["action"]["kind"], "generate_sql");
        assert_eq!(body["metadata"]["message_count"], 4);

        let (status, conversation) = send(
            &app,
            get(&format!("/api/chat/conversation?conversation_id={}", conversation_id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(conversation["messages"].as_array().unwrap().len(), 4);
        assert_eq!(conversation["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn chat_rejects_blank_messages_and_unknown_conversations() {
        let app = test_app();
        let (status, body) =
            send(&app, post_json("/api/chat/message", json!({"message": " "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");

        let (status, _) = send(&app, get("/api/chat/conversation?conversation_id=nope")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_reports_backend_and_counts() {
        let app = test_app();
        let (status, body) = send(&app, get("/api/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["llm_backend"], "offline");
        assert_eq!(body["llm_available"], false);
        assert_eq!(body["schema_count"], 0);

        let (status, body) = send(&app, post_json("/api/cache/clear", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }
}
