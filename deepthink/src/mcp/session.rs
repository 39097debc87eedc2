//! SSE session management for the MCP HTTP+SSE transport
//!
//! Every `GET /sse` stream owns exactly one session. Inbound POSTs are looked
//! up by session id and queued to that session's worker, which dispatches
//! them in arrival order and pushes responses back down the stream.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::handler::{JsonRpcRequest, McpHandler, SessionContext};
use crate::{Error, Result};

/// Event sent over SSE stream
#[derive(Clone, Debug, PartialEq)]
pub struct SseEvent {
    pub event_type: String,
    pub data: String,
}

impl SseEvent {
    /// First event on every stream: where to POST messages for this session
    pub fn endpoint(messages_path: &str, session_id: &str) -> Self {
        Self {
            event_type: "endpoint".to_string(),
            data: format!("{}?sessionId={}", messages_path, session_id),
        }
    }

    pub fn message(data: String) -> Self {
        Self {
            event_type: "message".to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

struct SessionEntry {
    inbound: mpsc::Sender<JsonRpcRequest>,
    outbound: mpsc::Sender<SseEvent>,
    /// Flipped to `true` exactly once, when the session is removed
    closed: watch::Sender<bool>,
}

type SessionMap = Arc<RwLock<HashMap<String, SessionEntry>>>;

/// Manages SSE sessions and routes posted messages to them
pub struct SessionManager {
    sessions: SessionMap,
    handler: Arc<McpHandler>,
    max_sessions: usize,
    queue_capacity: usize,
}

impl SessionManager {
    pub fn with_limits(handler: Arc<McpHandler>, max_sessions: usize, queue_capacity: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            handler,
            max_sessions,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Create a session for a newly opened stream.
    ///
    /// The session stays registered until the returned [`Session`] is dropped
    /// or [`SessionManager::close`] is called.
    pub fn open(&self) -> Result<Session> {
        let id = Uuid::new_v4().to_string();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.queue_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(self.queue_capacity);
        let (closed_tx, closed_rx) = watch::channel(false);

        {
            let mut sessions = self.sessions.write();
            if sessions.len() >= self.max_sessions {
                return Err(Error::TooManySessions(self.max_sessions));
            }
            sessions.insert(
                id.clone(),
                SessionEntry {
                    inbound: inbound_tx,
                    outbound: outbound_tx.clone(),
                    closed: closed_tx,
                },
            );
        }

        tokio::spawn(run_worker(
            id.clone(),
            self.handler.clone(),
            inbound_rx,
            outbound_tx,
            closed_rx.clone(),
        ));

        tracing::info!(session = %id, "MCP session opened");

        Ok(Session {
            id: id.clone(),
            events: outbound_rx,
            closed: closed_rx,
            _guard: SessionGuard {
                id,
                sessions: self.sessions.clone(),
            },
        })
    }

    /// Queue a request for the session's worker.
    ///
    /// Fails with [`Error::SessionNotFound`] for unknown or closed sessions,
    /// without touching the dispatcher.
    pub fn post(&self, session_id: &str, request: JsonRpcRequest) -> Result<()> {
        let inbound = {
            let sessions = self.sessions.read();
            sessions
                .get(session_id)
                .filter(|entry| !entry.outbound.is_closed())
                .map(|entry| entry.inbound.clone())
        }
        .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        inbound.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::SessionBusy(session_id.to_string()),
            mpsc::error::TrySendError::Closed(_) => Error::SessionNotFound(session_id.to_string()),
        })
    }

    /// Close a session explicitly. Returns false if it was not open.
    pub fn close(&self, session_id: &str) -> bool {
        remove_session(&self.sessions, session_id)
    }

    pub fn state(&self, session_id: &str) -> SessionState {
        let sessions = self.sessions.read();
        match sessions.get(session_id) {
            Some(entry) if !entry.outbound.is_closed() => SessionState::Open,
            _ => SessionState::Closed,
        }
    }

    /// Get active session count
    pub fn active_count(&self) -> usize {
        self.sessions.read().len()
    }
}

/// Handle for one open stream: the session id plus its outbound events
pub struct Session {
    id: String,
    events: mpsc::Receiver<SseEvent>,
    closed: watch::Receiver<bool>,
    _guard: SessionGuard,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next event to push to the client; `None` once the session is closed.
    ///
    /// Events still buffered at close time are discarded.
    pub async fn recv(&mut self) -> Option<SseEvent> {
        if *self.closed.borrow() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.closed.changed() => None,
            event = self.events.recv() => event,
        }
    }
}

/// Unregisters the session when the stream goes away
struct SessionGuard {
    id: String,
    sessions: SessionMap,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        remove_session(&self.sessions, &self.id);
    }
}

fn remove_session(sessions: &SessionMap, session_id: &str) -> bool {
    let Some(entry) = sessions.write().remove(session_id) else {
        return false;
    };
    entry.closed.send_replace(true);
    tracing::info!(session = %session_id, "MCP session closed");
    true
}

/// Dispatch queued requests one at a time and push responses to the stream.
///
/// Exits as soon as the session is closed or the client has gone away;
/// requests still queued at that point are discarded. An in-flight call is
/// never cancelled, but its response is dropped once the session is closed.
async fn run_worker(
    session_id: String,
    handler: Arc<McpHandler>,
    mut inbound: mpsc::Receiver<JsonRpcRequest>,
    outbound: mpsc::Sender<SseEvent>,
    mut closed: watch::Receiver<bool>,
) {
    let ctx = SessionContext {
        session_id: session_id.clone(),
    };

    loop {
        let request = tokio::select! {
            biased;
            _ = closed.changed() => break,
            request = inbound.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        tracing::debug!(session = %session_id, method = %request.method, "Dispatching message");

        let response = handler.handle(request, &ctx).await;
        if *closed.borrow() {
            tracing::debug!(session = %session_id, "Session closed, dropping response");
            break;
        }
        let Some(response) = response else {
            continue;
        };

        let data = match serde_json::to_string(&response) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(session = %session_id, "Failed to serialize MCP response: {}", e);
                continue;
            }
        };

        if outbound.send(SseEvent::message(data)).await.is_err() {
            tracing::debug!(session = %session_id, "Stream closed, dropping response");
            break;
        }
    }

    tracing::debug!(session = %session_id, "Session worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::handler::JsonRpcResponse;
    use crate::mcp::tools::{McpTool, ToolContext, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Echoes its `value` argument after an optional delay, counting calls
    struct CountingTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl McpTool for CountingTool {
        fn name(&self) -> &str {
            "count"
        }

        fn description(&self) -> &str {
            "counts calls"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {"value": {"type": "integer"}, "delay_ms": {"type": "integer"}}})
        }

        async fn call(&self, params: Value, _ctx: &ToolContext) -> crate::Result<String> {
            if let Some(ms) = params.get("delay_ms").and_then(|v| v.as_u64()) {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(params["value"].to_string())
        }
    }

    fn manager(max_sessions: usize) -> (SessionManager, Arc<AtomicUsize>) {
        manager_with(max_sessions, 16)
    }

    fn manager_with(max_sessions: usize, queue_capacity: usize) -> (SessionManager, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(CountingTool {
                calls: calls.clone(),
            }))
            .unwrap();
        let handler = Arc::new(McpHandler::new(Arc::new(registry)));
        (SessionManager::with_limits(handler, max_sessions, queue_capacity), calls)
    }

    fn call(id: u64, value: u64, delay_ms: u64) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(id)),
            method: "tools/call".to_string(),
            params: Some(json!({
                "name": "count",
                "arguments": {"value": value, "delay_ms": delay_ms}
            })),
        }
    }

    async fn next_response(session: &mut Session) -> JsonRpcResponse {
        let event = tokio::time::timeout(Duration::from_secs(5), session.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, "message");
        serde_json::from_str(&event.data).unwrap()
    }

    #[tokio::test]
    async fn test_session_ids_are_unique() {
        let (manager, _) = manager(10);
        let a = manager.open().unwrap();
        let b = manager.open().unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(manager.active_count(), 2);
    }

    #[tokio::test]
    async fn test_drop_closes_session() {
        let (manager, calls) = manager(10);
        let session = manager.open().unwrap();
        let id = session.id().to_string();
        assert_eq!(manager.state(&id), SessionState::Open);

        drop(session);
        assert_eq!(manager.state(&id), SessionState::Closed);
        assert_eq!(manager.active_count(), 0);

        let err = manager.post(&id, call(1, 1, 0)).unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_session_rejected() {
        let (manager, calls) = manager(10);
        let err = manager.post("no-such-session", call(1, 1, 0)).unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_max_sessions_enforced() {
        let (manager, _) = manager(1);
        let _first = manager.open().unwrap();
        assert!(matches!(manager.open(), Err(Error::TooManySessions(1))));
    }

    #[tokio::test]
    async fn test_responses_keep_arrival_order() {
        let (manager, _) = manager(10);
        let mut session = manager.open().unwrap();
        let id = session.id().to_string();

        // The first call is slow; a concurrent dispatcher would answer 2 first.
        manager.post(&id, call(1, 10, 100)).unwrap();
        manager.post(&id, call(2, 20, 0)).unwrap();

        let first = next_response(&mut session).await;
        let second = next_response(&mut session).await;
        assert_eq!(first.id, Some(json!(1)));
        assert_eq!(second.id, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_explicit_close_ends_stream() {
        let (manager, _) = manager(10);
        let mut session = manager.open().unwrap();
        let id = session.id().to_string();

        assert!(manager.close(&id));
        assert!(!manager.close(&id));

        let end = tokio::time::timeout(Duration::from_secs(5), session.recv())
            .await
            .unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_in_flight_result_dropped_after_disconnect() {
        let (manager, calls) = manager(10);
        let session = manager.open().unwrap();
        let id = session.id().to_string();

        manager.post(&id, call(1, 1, 50)).unwrap();
        // Let the worker pick the call up before the stream goes away
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(session);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_close_discards_queued_and_in_flight_responses() {
        let (manager, calls) = manager(10);
        let mut session = manager.open().unwrap();
        let id = session.id().to_string();

        manager.post(&id, call(1, 1, 100)).unwrap();
        manager.post(&id, call(2, 2, 0)).unwrap();
        manager.post(&id, call(3, 3, 0)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(manager.close(&id));

        let end = tokio::time::timeout(Duration::from_secs(5), session.recv())
            .await
            .unwrap();
        assert!(end.is_none());

        // The slow call finishes, but nothing queued behind it is dispatched
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(session.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_full_queue_reports_busy() {
        let (manager, calls) = manager_with(10, 2);
        let session = manager.open().unwrap();
        let id = session.id().to_string();

        // No await between posts, so the worker cannot drain the queue
        manager.post(&id, call(1, 1, 0)).unwrap();
        manager.post(&id, call(2, 2, 0)).unwrap();
        let err = manager.post(&id, call(3, 3, 0)).unwrap_err();
        assert!(matches!(err, Error::SessionBusy(ref busy) if busy == &id));
        assert_eq!(manager.state(&id), SessionState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
