//! Native async client for the remote statement protocol.
//!
//! A [`RemoteDatabase`] owns one persistent WebSocket. Requests carry a
//! monotonically increasing correlation id; the caller suspends on a oneshot
//! channel until the reader task sees the response frame with the matching
//! id. Ids are `u64` starting at 0 per connection — the space cannot be
//! exhausted by a realistic connection lifetime, so there is no wraparound
//! handling.
//!
//! # Example
//!
//! ```rust,no_run
//! use remote_sqlite::RemoteDatabase;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = RemoteDatabase::connect("ws://localhost:8090/").await?;
//!
//!     let rows = db.run("SELECT * FROM albums WHERE id < :id", &[json!(5)]).await?;
//!     println!("{rows:?}");
//!
//!     let mut stmt = db.prepare("SELECT * FROM albums WHERE artist = ?").await?;
//!     let first = stmt.get(&[json!("Tycho")]).await?;
//!     println!("{first:?}");
//!     stmt.finalize().await?;
//!
//!     db.close().await;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{
    Request, RequestFrame, Response, ResponseFrame, RunPayload, StatementPayload,
};

/// Outcome of one request: the `respond` payload, or the raw `error` payload.
type CallResult = std::result::Result<Value, String>;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<CallResult>>>>;

struct ClientInner {
    sender: mpsc::Sender<Message>,
    pending: Pending,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl ClientInner {
    /// Assign the next id, register a pending completion under it, transmit
    /// the frame and await the matching response.
    async fn call(&self, request: Request) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_string(&RequestFrame { id, request })?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if self.sender.send(Message::Text(frame.into())).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(Error::Transport("connection is closed".to_string()));
        }

        match rx.await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(message)) => Err(Error::Query(message)),
            Err(_) => Err(Error::Transport(
                "connection closed before the response arrived".to_string(),
            )),
        }
    }
}

/// Complete the pending caller for one inbound frame. Frames that do not
/// decode, and responses whose id has no pending entry, are logged and
/// dropped — never raised to any caller.
fn dispatch_frame(pending: &Pending, text: &str) {
    let frame: ResponseFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::warn!(error = %err, "discarding undecodable frame");
            return;
        }
    };

    let Some(waiter) = pending.lock().remove(&frame.id) else {
        tracing::warn!(id = frame.id, "discarding response with no pending request");
        return;
    };

    let result = match frame.response {
        Response::Respond(payload) => Ok(payload),
        Response::Error(message) => Err(message),
    };
    // The caller may have given up; nothing to do then.
    let _ = waiter.send(result);
}

/// Connection to a database served over the remote statement protocol.
///
/// Cloning is cheap and every clone drives the same connection.
#[derive(Clone)]
pub struct RemoteDatabase {
    inner: Arc<ClientInner>,
}

impl RemoteDatabase {
    /// Perform the WebSocket handshake and spawn the connection's reader and
    /// writer tasks. Fails with [`Error::Transport`] if the URL is invalid or
    /// the peer is unreachable.
    pub async fn connect(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::Transport(format!("invalid url: {e}")))?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let (mut sink, mut stream) = ws_stream.split();

        let (sender, mut outbox) = mpsc::channel::<Message>(64);
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbox.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() || closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn({
            let pending = pending.clone();
            async move {
                while let Some(Ok(msg)) = stream.next().await {
                    match msg {
                        Message::Text(text) => dispatch_frame(&pending, text.as_str()),
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                // Rejects every still-waiting caller with a transport error.
                pending.lock().clear();
            }
        });

        Ok(Self {
            inner: Arc::new(ClientInner {
                sender,
                pending,
                next_id: AtomicU64::new(0),
                reader,
                writer,
            }),
        })
    }

    /// Compile a statement on the server and wrap the returned handle.
    pub async fn prepare(&self, sql: &str) -> Result<RemoteStatement> {
        let payload = self.inner.call(Request::Prepare(sql.to_string())).await?;
        let handle = payload
            .as_u64()
            .ok_or_else(|| Error::Protocol(format!("expected statement handle, got {payload}")))?;
        Ok(RemoteStatement {
            inner: self.inner.clone(),
            handle,
            finalized: false,
        })
    }

    /// One-shot query: compiled, executed and discarded server-side in a
    /// single round trip without consuming a handle slot.
    pub async fn run(&self, sql: &str, args: &[Value]) -> Result<Vec<Value>> {
        let payload = self
            .inner
            .call(Request::Run(RunPayload {
                sql: sql.to_string(),
                args: args.to_vec(),
            }))
            .await?;
        decode_rows(payload)
    }

    /// Send a close frame. In-flight requests are rejected with a transport
    /// error once the peer confirms the close.
    pub async fn close(&self) {
        let _ = self.inner.sender.send(Message::Close(None)).await;
    }
}

/// A prepared statement living on the server, addressed by its handle.
///
/// Once finalized, every operation fails fast locally with
/// [`Error::StatementFinalized`] — the stale handle never reaches the server.
pub struct RemoteStatement {
    inner: Arc<ClientInner>,
    handle: u64,
    finalized: bool,
}

impl RemoteStatement {
    /// The server-issued handle, scoped to this connection.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    fn guard(&self) -> Result<()> {
        if self.finalized {
            Err(Error::StatementFinalized)
        } else {
            Ok(())
        }
    }

    /// Execute with `args` and return the first row, or `None` when the
    /// result set is empty.
    pub async fn get(&self, args: &[Value]) -> Result<Option<Value>> {
        self.guard()?;
        let payload = self
            .inner
            .call(Request::PrepareGet(StatementPayload {
                handle: self.handle,
                args: args.to_vec(),
            }))
            .await?;
        Ok(if payload.is_null() { None } else { Some(payload) })
    }

    /// Execute with `args` and return every row.
    pub async fn all(&self, args: &[Value]) -> Result<Vec<Value>> {
        self.guard()?;
        let payload = self
            .inner
            .call(Request::PrepareAll(StatementPayload {
                handle: self.handle,
                args: args.to_vec(),
            }))
            .await?;
        decode_rows(payload)
    }

    /// Release the server-side statement. The local flag is set before the
    /// round trip, so a second call fails fast instead of relying on the
    /// server to reject a stale handle.
    pub async fn finalize(&mut self) -> Result<()> {
        self.guard()?;
        self.finalized = true;
        self.inner
            .call(Request::PrepareFinalize(self.handle))
            .await?;
        Ok(())
    }
}

fn decode_rows(payload: Value) -> Result<Vec<Value>> {
    serde_json::from_value(payload)
        .map_err(|e| Error::Protocol(format!("expected a row array: {e}")))
}
