//! HTTP and WebSocket surface over the coordinator.

use std::future::Future;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use engine::{Color, GameMove, MoveOutcome, RollOutcome};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

use crate::coordinator::{Coordinator, GameView, MatchmakingOutcome, MoveInput};
use crate::error::SessionError;
use crate::store::{ChatMessage, GameStore, Seat};

type AppState<S> = Arc<Coordinator<S>>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeatRequest {
    player_id: String,
    rating: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerRequest {
    player_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveRequest {
    game_id: Option<String>,
    player_id: String,
    #[serde(rename = "move")]
    mv: MoveInput,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    player_id: String,
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsQuery {
    player_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct LegalMovesResponse {
    id: String,
    turn: Color,
    moves: Vec<GameMove>,
}

/// Actions a player can send over the socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientMessage {
    Roll,
    Move {
        #[serde(rename = "move")]
        mv: MoveInput,
    },
    Chat {
        text: String,
    },
}

/// Messages addressed to a single socket rather than the whole game.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
enum DirectReply {
    Snapshot(GameView),
    Ack { action: &'static str },
    Error { kind: &'static str, detail: String },
}

impl DirectReply {
    fn error(err: &SessionError) -> Self {
        DirectReply::Error {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }

    fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"event":"error"}"#.to_string())
    }
}

pub fn router<S: GameStore>(app: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/games", post(create_game::<S>))
        .route("/games/:id", get(get_game::<S>))
        .route("/games/:id/join", post(join_game::<S>))
        .route("/games/:id/legal", get(get_legal::<S>))
        .route("/games/:id/roll", post(roll_dice::<S>))
        .route("/games/:id/move", post(play_move::<S>))
        .route("/games/:id/spectate", post(spectate::<S>))
        .route("/games/:id/chat", post(chat::<S>))
        .route("/games/:id/resign", post(resign::<S>))
        .route("/matchmaking", post(find_match::<S>))
        .route("/matchmaking/:player", delete(leave_queue::<S>))
        .route("/ws/games/:id", get(ws_game::<S>))
        .with_state(app)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Runs a session operation on its own task so a dropped request cannot
/// cancel it between persisting and committing.
async fn detached<T, F>(op: F) -> Result<Json<T>, ApiError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, SessionError>> + Send + 'static,
{
    match tokio::spawn(op).await {
        Ok(result) => result.map(Json).map_err(ApiError::from),
        Err(err) => Err(ApiError::server(err.to_string())),
    }
}

fn seat<S: GameStore>(app: &Coordinator<S>, req: SeatRequest) -> Seat {
    Seat::new(
        req.player_id,
        req.rating.unwrap_or(app.config().default_rating),
    )
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn create_game<S: GameStore>(
    State(app): State<AppState<S>>,
    Json(req): Json<SeatRequest>,
) -> Result<Json<GameView>, ApiError> {
    let host = seat(&app, req);
    detached(async move { app.create_game(host).await }).await
}

async fn get_game<S: GameStore>(
    State(app): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<Json<GameView>, ApiError> {
    app.game_view(&id).await.map(Json).map_err(ApiError::from)
}

async fn join_game<S: GameStore>(
    State(app): State<AppState<S>>,
    Path(id): Path<String>,
    Json(req): Json<SeatRequest>,
) -> Result<Json<GameView>, ApiError> {
    let player = seat(&app, req);
    detached(async move { app.join_game(&id, player).await }).await
}

async fn get_legal<S: GameStore>(
    State(app): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<Json<LegalMovesResponse>, ApiError> {
    let (turn, moves) = app.legal_moves(&id).await?;
    Ok(Json(LegalMovesResponse { id, turn, moves }))
}

async fn roll_dice<S: GameStore>(
    State(app): State<AppState<S>>,
    Path(id): Path<String>,
    Json(req): Json<PlayerRequest>,
) -> Result<Json<RollOutcome>, ApiError> {
    detached(async move { app.roll_dice(&id, &req.player_id).await }).await
}

async fn play_move<S: GameStore>(
    State(app): State<AppState<S>>,
    Path(id): Path<String>,
    Json(req): Json<MoveRequest>,
) -> Result<Json<MoveOutcome>, ApiError> {
    if req.game_id.as_deref().is_some_and(|body_id| body_id != id) {
        return Err(ApiError::bad_request("gameId does not match the path"));
    }
    detached(async move { app.apply_move(&id, &req.player_id, req.mv).await }).await
}

async fn spectate<S: GameStore>(
    State(app): State<AppState<S>>,
    Path(id): Path<String>,
    Json(req): Json<PlayerRequest>,
) -> Result<Json<GameView>, ApiError> {
    detached(async move { app.join_spectator(&id, &req.player_id).await }).await
}

async fn chat<S: GameStore>(
    State(app): State<AppState<S>>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatMessage>, ApiError> {
    detached(async move { app.chat(&id, &req.player_id, &req.text).await }).await
}

async fn resign<S: GameStore>(
    State(app): State<AppState<S>>,
    Path(id): Path<String>,
    Json(req): Json<PlayerRequest>,
) -> Result<Json<GameView>, ApiError> {
    detached(async move { app.resign(&id, &req.player_id).await }).await
}

async fn find_match<S: GameStore>(
    State(app): State<AppState<S>>,
    Json(req): Json<SeatRequest>,
) -> Result<Json<MatchmakingOutcome>, ApiError> {
    let player = seat(&app, req);
    detached(async move { app.find_match(player).await }).await
}

async fn leave_queue<S: GameStore>(
    State(app): State<AppState<S>>,
    Path(player): Path<String>,
) -> impl IntoResponse {
    Json(serde_json::json!({ "removed": app.leave_queue(&player) }))
}

async fn ws_game<S: GameStore>(
    State(app): State<AppState<S>>,
    Path(id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(app, id, query.player_id, socket))
}

async fn handle_ws<S: GameStore>(
    app: AppState<S>,
    id: String,
    player_id: Option<String>,
    socket: WebSocket,
) {
    let (mut sender, mut receiver) = socket.split();
    let (view, mut events) = match app.subscribe(&id).await {
        Ok(pair) => pair,
        Err(err) => {
            let _ = sender
                .send(Message::Text(DirectReply::error(&err).to_text()))
                .await;
            return;
        }
    };
    if sender
        .send(Message::Text(DirectReply::Snapshot(view).to_text()))
        .await
        .is_err()
    {
        return;
    }

    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(16);
    let (action_tx, mut action_rx) = mpsc::channel::<ClientMessage>(16);

    // Actions from one socket run in order on a task that outlives the socket.
    {
        let app = Arc::clone(&app);
        let id = id.clone();
        let reply_tx = reply_tx.clone();
        tokio::spawn(async move {
            while let Some(action) = action_rx.recv().await {
                let reply = run_action(&app, &id, player_id.as_deref(), action).await;
                let _ = reply_tx.send(reply.to_text()).await;
            }
        });
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(error = %err, "failed to encode game event");
                            continue;
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "socket fell behind game events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(text) => text,
                    None => break,
                },
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(action) => {
                        if action_tx.send(action).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let reply = DirectReply::Error {
                            kind: "bad_request",
                            detail: err.to_string(),
                        };
                        let _ = reply_tx.send(reply.to_text()).await;
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }
    debug!(game_id = %id, "socket closed");
}

async fn run_action<S: GameStore>(
    app: &Coordinator<S>,
    game_id: &str,
    player_id: Option<&str>,
    action: ClientMessage,
) -> DirectReply {
    let Some(player_id) = player_id else {
        return DirectReply::Error {
            kind: "not_participant",
            detail: "connect with a playerId to act".into(),
        };
    };
    let result = match action {
        ClientMessage::Roll => app.roll_dice(game_id, player_id).await.map(|_| "roll"),
        ClientMessage::Move { mv } => app
            .apply_move(game_id, player_id, mv)
            .await
            .map(|_| "move"),
        ClientMessage::Chat { text } => app.chat(game_id, player_id, &text).await.map(|_| "chat"),
    };
    match result {
        Ok(action) => DirectReply::Ack { action },
        Err(err) => DirectReply::error(&err),
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "bad_request",
            message: msg.into(),
        }
    }

    fn server(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal",
            message: msg.into(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match err {
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::NotParticipant { .. } => StatusCode::FORBIDDEN,
            SessionError::IllegalMove(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SessionError::InvalidState(_) => StatusCode::CONFLICT,
            SessionError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "detail": self.message, "kind": self.kind });
        (self.status, Json(body)).into_response()
    }
}
