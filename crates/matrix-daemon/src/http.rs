use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use matrix_core::event::CoreEvent;
use matrix_proto::protocol::{Command, MatrixState};
use matrix_proto::state::StateManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<CoreEvent>,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<CoreEvent>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(HttpState {
            state_manager,
            event_tx,
        });

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/views", get(list_views))
        .route("/api/channel/:ch", post(press_channel))
        .route("/api/focus/:tile", post(focus_tile))
        .route("/api/tiles/:n", post(set_tile_count))
        .route("/api/active/:n", post(set_active_count))
        .route("/api/virtual/:on", post(set_virtual))
        .route("/api/scroll/:direction", post(scroll))
        .route("/api/clear", post(clear_tile))
        .route("/api/fullscreen/close", post(close_fullscreen))
        .route("/api/fullscreen/:tile", post(open_fullscreen))
        .route("/api/views/:name", post(save_view).delete(delete_view))
        .route("/api/views/:name/apply", post(apply_view))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn send(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state.event_tx.send(CoreEvent::ClientCommand(cmd)).await.is_err() {
        error!("Failed to forward HTTP command");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::ACCEPTED
}

async fn get_state(State(state): State<HttpState>) -> Json<MatrixState> {
    Json(state.state_manager.get_state().await)
}

async fn list_views(State(state): State<HttpState>) -> Json<Vec<String>> {
    Json(state.state_manager.get_state().await.views)
}

async fn press_channel(State(state): State<HttpState>, Path(ch): Path<u8>) -> StatusCode {
    send(&state, Command::PressChannel { channel: ch }).await
}

/// Tiles are numbered from 1 in the API.
async fn focus_tile(State(state): State<HttpState>, Path(tile): Path<usize>) -> StatusCode {
    match tile.checked_sub(1) {
        Some(tile) => send(&state, Command::FocusTile { tile }).await,
        None => StatusCode::BAD_REQUEST,
    }
}

async fn set_tile_count(State(state): State<HttpState>, Path(n): Path<usize>) -> StatusCode {
    send(&state, Command::SetTileCount { count: n }).await
}

async fn set_active_count(State(state): State<HttpState>, Path(n): Path<usize>) -> StatusCode {
    send(&state, Command::SetActiveCount { count: n }).await
}

async fn set_virtual(State(state): State<HttpState>, Path(on): Path<String>) -> StatusCode {
    match parse_switch(&on) {
        Some(enabled) => send(&state, Command::SetVirtual { enabled }).await,
        None => StatusCode::BAD_REQUEST,
    }
}

async fn scroll(State(state): State<HttpState>, Path(direction): Path<String>) -> StatusCode {
    let cmd = match direction.as_str() {
        "left" => Command::ScrollLeft,
        "right" => Command::ScrollRight,
        other => match other.parse::<i32>() {
            Ok(columns) => Command::ScrollBy { columns },
            Err(_) => return StatusCode::BAD_REQUEST,
        },
    };
    send(&state, cmd).await
}

async fn clear_tile(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::ClearTile).await
}

async fn open_fullscreen(State(state): State<HttpState>, Path(tile): Path<usize>) -> StatusCode {
    match tile.checked_sub(1) {
        Some(tile) => send(&state, Command::OpenFullscreen { tile: Some(tile) }).await,
        None => StatusCode::BAD_REQUEST,
    }
}

async fn close_fullscreen(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::CloseFullscreen).await
}

async fn save_view(State(state): State<HttpState>, Path(name): Path<String>) -> StatusCode {
    send(&state, Command::SaveView { name }).await
}

async fn apply_view(State(state): State<HttpState>, Path(name): Path<String>) -> StatusCode {
    send(&state, Command::ApplyView { name }).await
}

async fn delete_view(State(state): State<HttpState>, Path(name): Path<String>) -> StatusCode {
    send(&state, Command::DeleteView { name }).await
}

fn parse_switch(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    fn app() -> (Router, Arc<StateManager>, mpsc::Receiver<CoreEvent>) {
        let state_manager = Arc::new(StateManager::new());
        let (event_tx, event_rx) = mpsc::channel(8);
        let app = router(HttpState {
            state_manager: state_manager.clone(),
            event_tx,
        });
        (app, state_manager, event_rx)
    }

    async fn call(app: &Router, method: Method, uri: &str) -> StatusCode {
        let req = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        app.clone().oneshot(req).await.unwrap().status()
    }

    async fn next_command(rx: &mut mpsc::Receiver<CoreEvent>) -> Command {
        match rx.recv().await {
            Some(CoreEvent::ClientCommand(cmd)) => cmd,
            other => panic!("expected command, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_routes_forward_commands() {
        let (app, _sm, mut rx) = app();

        assert_eq!(call(&app, Method::POST, "/api/channel/9").await, StatusCode::ACCEPTED);
        assert_eq!(next_command(&mut rx).await, Command::PressChannel { channel: 9 });

        assert_eq!(call(&app, Method::POST, "/api/focus/3").await, StatusCode::ACCEPTED);
        assert_eq!(next_command(&mut rx).await, Command::FocusTile { tile: 2 });

        assert_eq!(call(&app, Method::POST, "/api/virtual/on").await, StatusCode::ACCEPTED);
        assert_eq!(next_command(&mut rx).await, Command::SetVirtual { enabled: true });

        assert_eq!(call(&app, Method::POST, "/api/scroll/-2").await, StatusCode::ACCEPTED);
        assert_eq!(next_command(&mut rx).await, Command::ScrollBy { columns: -2 });

        assert_eq!(call(&app, Method::POST, "/api/fullscreen/close").await, StatusCode::ACCEPTED);
        assert_eq!(next_command(&mut rx).await, Command::CloseFullscreen);

        assert_eq!(call(&app, Method::POST, "/api/views/night/apply").await, StatusCode::ACCEPTED);
        assert_eq!(
            next_command(&mut rx).await,
            Command::ApplyView { name: "night".into() }
        );

        assert_eq!(call(&app, Method::DELETE, "/api/views/night").await, StatusCode::ACCEPTED);
        assert_eq!(
            next_command(&mut rx).await,
            Command::DeleteView { name: "night".into() }
        );
    }

    #[tokio::test]
    async fn test_bad_input_is_rejected() {
        let (app, _sm, mut rx) = app();
        assert_eq!(call(&app, Method::POST, "/api/virtual/maybe").await, StatusCode::BAD_REQUEST);
        assert_eq!(call(&app, Method::POST, "/api/scroll/up").await, StatusCode::BAD_REQUEST);
        assert_eq!(call(&app, Method::POST, "/api/focus/0").await, StatusCode::BAD_REQUEST);
        assert_eq!(call(&app, Method::POST, "/api/channel/x").await, StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_state_is_served_as_json() {
        let (app, sm, _rx) = app();
        sm.publish(MatrixState {
            tile_count: 6,
            views: vec!["a".into()],
            ..MatrixState::default()
        })
        .await;
        let req = Request::builder().uri("/api/state").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let state: MatrixState = serde_json::from_slice(&body).unwrap();
        assert_eq!(state.tile_count, 6);
        assert_eq!(state.rev, 1);
    }
}
