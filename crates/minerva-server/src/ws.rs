use crate::http::{ApiError, AppState};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use minerva_research_loop::SubscribeError;
use tracing::debug;

/// `GET /ws/progress/:id` — live progress events for one task.
pub async fn progress_upgrade(
    ws: WebSocketUpgrade,
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    // Unknown task ids fail before the upgrade.
    st.store
        .get_task(&id)
        .await?
        .ok_or_else(|| ApiError::TaskNotFound(id.clone()))?;

    Ok(ws.on_upgrade(move |socket| async move {
        handle_progress_socket(socket, st, id).await;
    }))
}

/// Forward bus events as JSON text frames until the terminal event, the
/// stream ends, or the client goes away. Client `ping` text frames are
/// answered with `pong`; other client frames are drained and ignored.
async fn handle_progress_socket(mut socket: WebSocket, st: AppState, task_id: String) {
    let mut rx = match st.bus.subscribe(&task_id) {
        Ok(rx) => rx,
        Err(SubscribeError::Closed(_)) => {
            // Task already reached its terminal event: close immediately.
            debug!(task_id = %task_id, "progress channel closed; refusing late observer");
            let _ = socket.close().await;
            return;
        }
    };

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let Ok(text) = serde_json::to_string(&event) else { break };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
                if event.kind.is_terminal() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) if text == "ping" => {
                        if socket.send(Message::Text("pong".to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = socket.close().await;
}
