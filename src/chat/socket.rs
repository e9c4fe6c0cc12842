use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::{
    frames::{ClientFrame, ServerFrame},
    registry::{ChatIdentity, ConnId},
    repo::{ChatMessage, UserSocket},
};
use crate::state::AppState;

#[instrument(skip_all)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> impl IntoResponse {
    let addr = peer.map(|ConnectInfo(a)| a.to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: AppState, addr: Option<String>) {
    let conn = state.chat.next_conn_id();
    let socket_id = addr.unwrap_or_else(|| format!("conn-{conn}"));
    info!(conn, %socket_id, "chat connection opened");

    let (mut sink, mut stream) = socket.split();
    let (outbox, mut inbox) = mpsc::unbounded_channel::<String>();

    // Ends once every outbox sender is gone, which also covers the registry
    // dropping this peer after a failed delivery.
    tokio::spawn(async move {
        while let Some(text) = inbox.recv().await {
            if let Err(e) = sink.send(Message::Text(text)).await {
                debug!(conn, error = %e, "chat write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => on_text(&state, conn, &socket_id, &outbox, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(conn, error = %e, "chat read failed");
                break;
            }
        }
    }

    state.chat.leave(conn);
    info!(conn, "chat connection closed");
}

async fn on_text(
    state: &AppState,
    conn: ConnId,
    socket_id: &str,
    outbox: &mpsc::UnboundedSender<String>,
    text: &str,
) {
    let frame = match ClientFrame::decode(text) {
        Ok(f) => f,
        Err(e) => {
            debug!(conn, error = %e, "rejected chat frame");
            let _ = outbox.send(ServerFrame::error(e.to_string()).to_text());
            return;
        }
    };

    match frame {
        ClientFrame::Join { username, role } => {
            if let Err(e) = UserSocket::upsert(&state.db, &username, &role, socket_id).await {
                warn!(error = %e, %username, "user socket not saved");
            }
            state
                .chat
                .join(conn, ChatIdentity { username, role }, outbox.clone());
        }
        ClientFrame::SendMessage {
            from,
            role,
            content,
        } => {
            if let Err(e) = ChatMessage::insert(&state.db, &from, &role, &content).await {
                warn!(error = %e, %from, "chat message not saved");
            }
            match state.chat.relay(&from, &role, &content).await {
                Ok(report) => debug!(
                    conn,
                    delivered = report.delivered,
                    escalated = report.escalated,
                    "chat relayed"
                ),
                Err(e) => {
                    warn!(error = %e, "chat relay failed");
                    let _ = outbox.send(ServerFrame::error("message not delivered").to_text());
                }
            }
        }
    }
}
