use axum::{
    Extension,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use nodedeck_runner::LogHub;
use serde::Deserialize;
use tracing::Instrument;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsQuery {
    pub server_id: String,
}

/// `GET /ws?serverId=<id>`: live log envelopes of one owned server.
pub async fn logs_ws(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(q): Query<LogsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    state.lifecycle.get_owned(&user.user_id, &q.server_id).await?;
    let hub = state.hub.clone();
    Ok(ws
        .on_upgrade(move |socket| handle_log_socket(hub, q.server_id, socket))
        .into_response())
}

async fn handle_log_socket(hub: LogHub, topic: String, socket: WebSocket) {
    let span = tracing::info_span!("log_ws", server_id = %topic);
    async move {
        let (mut sender, mut receiver) = socket.split();
        let sub = hub.subscribe(&topic).await;
        let id = sub.id;
        let mut rx = sub.rx;

        let mut writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if sender.send(Message::Text(frame.to_string())).await.is_err() {
                    break;
                }
            }
        });

        // Inbound frames carry nothing; read only to notice the close.
        loop {
            tokio::select! {
                msg = receiver.next() => match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                _ = &mut writer => break,
            }
        }

        hub.unsubscribe(&topic, id).await;
        writer.abort();
    }
    .instrument(span)
    .await
}
