use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handler::SocketHandler;
use crate::engine;
use crate::pool::{ConnectionPool, DatabaseConfig};

#[derive(Clone)]
pub struct AppState {
    pub pool: ConnectionPool,
    pub config: DatabaseConfig,
}

#[derive(Debug, Deserialize)]
struct SqlParams {
    sql: Option<String>,
}

/// Build the router serving one database: the WebSocket statement protocol,
/// a one-shot SQL endpoint, and the raw database file as a fallback.
pub fn create_router(config: DatabaseConfig) -> Router {
    let state = AppState {
        pool: ConnectionPool::new(),
        config,
    };

    Router::new()
        .route("/", get(root).post(run_post))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(Any),
        )
}

async fn root(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Query(params): Query<SqlParams>,
    State(state): State<AppState>,
) -> Response {
    if let Ok(ws) = ws {
        return ws.on_upgrade(move |socket| async move {
            match SocketHandler::new(state.pool, state.config) {
                Ok(handler) => handler.run(socket).await,
                Err(err) => {
                    tracing::error!(error = %err, "failed to open database for socket session");
                }
            }
        });
    }

    if let Some(sql) = params.sql {
        return run_sql(&state, &sql).into_response();
    }

    serve_db_file(&state).await
}

async fn run_post(State(state): State<AppState>, sql: String) -> Response {
    run_sql(&state, &sql).into_response()
}

/// One-shot query path: every invocation acquires and releases exactly one
/// pooled connection.
fn run_sql(state: &AppState, sql: &str) -> (StatusCode, Json<Value>) {
    let conn = match state.pool.acquire(&state.config) {
        Ok(conn) => conn,
        Err(err) => {
            tracing::error!(error = %err, "failed to open database for one-shot query");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            );
        }
    };

    let result = engine::query_all(&conn.lock(), sql, &[]);
    drop(conn);
    state.pool.release(&state.config);

    match result {
        Ok(rows) => (StatusCode::OK, Json(Value::Array(rows))),
        Err(err) => {
            tracing::debug!(error = %err, "one-shot query rejected");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid SQL", "data": err.to_string() })),
            )
        }
    }
}

async fn serve_db_file(state: &AppState) -> Response {
    match tokio::fs::read(&state.config.path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(err) => {
            tracing::debug!(error = %err, path = %state.config.path, "database file not readable");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
