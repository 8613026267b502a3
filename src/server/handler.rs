//! Per-connection dispatcher for the remote statement protocol.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket};
use serde_json::{json, Value};

use crate::engine;
use crate::error::Result;
use crate::pool::{ConnectionPool, DatabaseConfig, SharedConnection};
use crate::protocol::{
    PartialFrame, Request, RequestFrame, Response, ResponseFrame, RunPayload, StatementPayload,
};

const INVALID_HANDLE: &str = "Invalid Handle";

/// State machine for one client connection: created while the socket opens,
/// processes frames strictly in arrival order while open, releases every
/// held resource on close. Terminal; a handler is never reused.
pub struct SocketHandler {
    conn: SharedConnection,
    pool: ConnectionPool,
    config: DatabaseConfig,
    /// Handle table: server-issued id to the statement's SQL. The compiled
    /// statement itself lives in the connection's `prepare_cached` LRU.
    statements: HashMap<u64, String>,
    next_handle: u64,
}

impl SocketHandler {
    /// Acquire the pooled connection for `config`. The connection may be
    /// shared with every other open session using an identical config.
    pub fn new(pool: ConnectionPool, config: DatabaseConfig) -> Result<Self> {
        let conn = pool.acquire(&config)?;
        Ok(Self {
            conn,
            pool,
            config,
            statements: HashMap::new(),
            next_handle: 0,
        })
    }

    /// Process frames until the peer goes away. Each request produces exactly
    /// one response frame echoing its id; a failed request never tears the
    /// connection down.
    pub async fn run(mut self, mut socket: WebSocket) {
        while let Some(Ok(msg)) = socket.recv().await {
            match msg {
                Message::Text(text) => {
                    let Some(frame) = self.handle_frame(text.as_str()) else {
                        continue;
                    };
                    let encoded = match serde_json::to_string(&frame) {
                        Ok(encoded) => encoded,
                        Err(err) => {
                            tracing::error!(error = %err, "failed to encode response frame");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(encoded.into())).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        tracing::debug!("socket session ended");
        // Drop releases the handle table and the pooled connection.
    }

    /// Decode one inbound frame and dispatch it. Frames that fail the typed
    /// decode still get an `error` response when their id is salvageable;
    /// otherwise they are logged and dropped.
    pub fn handle_frame(&mut self, text: &str) -> Option<ResponseFrame> {
        match serde_json::from_str::<RequestFrame>(text) {
            Ok(frame) => Some(ResponseFrame {
                id: frame.id,
                response: self.dispatch(frame.request),
            }),
            Err(err) => match serde_json::from_str::<PartialFrame>(text) {
                Ok(partial) => Some(ResponseFrame {
                    id: partial.id,
                    response: Response::Error(format!("Malformed request: {err}")),
                }),
                Err(_) => {
                    tracing::warn!(error = %err, "dropping frame with no recoverable id");
                    None
                }
            },
        }
    }

    fn dispatch(&mut self, request: Request) -> Response {
        match request {
            Request::Prepare(sql) => self.prepare(sql),
            Request::Run(RunPayload { sql, args }) => self.run_one_shot(&sql, &args),
            Request::PrepareAll(StatementPayload { handle, args }) => {
                self.statement_all(handle, &args)
            }
            Request::PrepareGet(StatementPayload { handle, args }) => {
                self.statement_get(handle, &args)
            }
            Request::PrepareFinalize(handle) => self.finalize(handle),
        }
    }

    fn prepare(&mut self, sql: String) -> Response {
        if let Err(err) = engine::validate(&self.conn.lock(), &sql) {
            return Response::Error(err.to_string());
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        self.statements.insert(handle, sql);
        tracing::debug!(handle, "prepared statement");
        Response::Respond(json!(handle))
    }

    fn run_one_shot(&self, sql: &str, args: &[Value]) -> Response {
        match engine::query_all(&self.conn.lock(), sql, args) {
            Ok(rows) => Response::Respond(Value::Array(rows)),
            Err(err) => Response::Error(err.to_string()),
        }
    }

    fn statement_all(&self, handle: u64, args: &[Value]) -> Response {
        let Some(sql) = self.statements.get(&handle) else {
            return Response::Error(INVALID_HANDLE.to_string());
        };
        match engine::query_cached_all(&self.conn.lock(), sql, args) {
            Ok(rows) => Response::Respond(Value::Array(rows)),
            Err(err) => Response::Error(err.to_string()),
        }
    }

    fn statement_get(&self, handle: u64, args: &[Value]) -> Response {
        let Some(sql) = self.statements.get(&handle) else {
            return Response::Error(INVALID_HANDLE.to_string());
        };
        match engine::query_cached_get(&self.conn.lock(), sql, args) {
            Ok(row) => Response::Respond(row.unwrap_or(Value::Null)),
            Err(err) => Response::Error(err.to_string()),
        }
    }

    fn finalize(&mut self, handle: u64) -> Response {
        if self.statements.remove(&handle).is_none() {
            return Response::Error(INVALID_HANDLE.to_string());
        }
        Response::Respond(Value::Bool(true))
    }
}

impl Drop for SocketHandler {
    /// Guaranteed teardown on every exit path, normal close or abrupt
    /// disconnect: drop every outstanding statement handle, then give the
    /// pooled connection back.
    fn drop(&mut self) {
        if !self.statements.is_empty() {
            tracing::debug!(
                count = self.statements.len(),
                "finalizing statements left behind by the client"
            );
            self.statements.clear();
        }
        self.pool.release(&self.config);
    }
}
