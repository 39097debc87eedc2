use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{CorsConfig, ServerConfig};
use crate::mcp::handler::{JsonRpcRequest, McpHandler};
use crate::mcp::session::{SessionManager, SessionState, SseEvent};
use crate::{Error, Result};

/// Subscribe endpoint
pub const SSE_PATH: &str = "/sse";
/// Message endpoint, advertised to clients in the `endpoint` event
pub const MESSAGES_PATH: &str = "/messages";

#[derive(Clone)]
pub struct AppState {
    pub session_manager: Arc<SessionManager>,
    pub keep_alive: Duration,
}

#[derive(Debug, Deserialize)]
pub struct MessageParams {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

pub struct ApiServer {
    session_manager: Arc<SessionManager>,
    cors_config: CorsConfig,
    keep_alive: Duration,
}

impl ApiServer {
    pub fn new(mcp_handler: Arc<McpHandler>) -> Self {
        Self::with_config(mcp_handler, &ServerConfig::default())
    }

    pub fn with_config(mcp_handler: Arc<McpHandler>, config: &ServerConfig) -> Self {
        let session_manager = Arc::new(SessionManager::with_limits(
            mcp_handler,
            config.max_sessions,
            config.queue_capacity,
        ));

        Self {
            session_manager,
            cors_config: config.cors.clone(),
            keep_alive: Duration::from_secs(config.keep_alive_secs.max(1)),
        }
    }

    pub fn session_manager(&self) -> Arc<SessionManager> {
        self.session_manager.clone()
    }

    /// GET /sse - SSE stream for MCP
    async fn sse_handler(
        State(state): State<AppState>,
    ) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, Error>
    {
        let mut session = state.session_manager.open()?;
        let endpoint = SseEvent::endpoint(MESSAGES_PATH, session.id());

        // The session is owned by the stream; dropping the stream on
        // disconnect unregisters it.
        let stream = async_stream::stream! {
            yield std::result::Result::<Event, Infallible>::Ok(to_event(&endpoint));

            while let Some(event) = session.recv().await {
                yield std::result::Result::<Event, Infallible>::Ok(to_event(&event));
            }
        };

        Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive).text("ping")))
    }

    /// POST /messages?sessionId=<id> - JSON-RPC requests, answered over the stream
    async fn messages_handler(
        State(state): State<AppState>,
        Query(params): Query<MessageParams>,
        body: Bytes,
    ) -> std::result::Result<(StatusCode, &'static str), Error> {
        let session_id = params
            .session_id
            .ok_or_else(|| Error::BadRequest("Missing sessionId query parameter".to_string()))?;

        tracing::debug!(session = %session_id, "New message");

        if state.session_manager.state(&session_id) == SessionState::Closed {
            return Err(Error::SessionNotFound(session_id));
        }

        let request: JsonRpcRequest = serde_json::from_slice(&body)
            .map_err(|e| Error::BadRequest(format!("Invalid JSON-RPC message: {}", e)))?;

        state.session_manager.post(&session_id, request)?;

        Ok((StatusCode::ACCEPTED, "Accepted"))
    }

    /// GET /health
    async fn health_handler(State(state): State<AppState>) -> Json<Value> {
        Json(json!({
            "status": "ok",
            "sessions": state.session_manager.active_count(),
        }))
    }

    pub fn router(&self) -> Router {
        let app_state = AppState {
            session_manager: self.session_manager.clone(),
            keep_alive: self.keep_alive,
        };

        Router::new()
            .route(SSE_PATH, get(Self::sse_handler))
            .route(MESSAGES_PATH, post(Self::messages_handler))
            .route("/health", get(Self::health_handler))
            .with_state(app_state)
            .layer(cors_layer(&self.cors_config))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on an already-bound listener until the process exits
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!("Server is running on {}", addr);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

/// `"*"` allows any origin; otherwise only the listed origins are echoed back
fn cors_layer(config: &CorsConfig) -> CorsLayer {
    if !config.enabled {
        return CorsLayer::new();
    }

    let allow = if config.origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(config.origins.iter().filter_map(|o| o.parse::<HeaderValue>().ok()))
    };

    CorsLayer::new()
        .allow_origin(allow)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

fn to_event(event: &SseEvent) -> Event {
    Event::default().event(&event.event_type).data(&event.data)
}
