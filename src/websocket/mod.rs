pub mod notify;
pub mod registry;

use crate::models::{Player, TickerSettings};
use crate::services::player_service;
use crate::AppState;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::Utc;
use futures::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::unbounded_channel;

pub use registry::{CloseReason, ConnectionId, Outbound, PlayerRegistry, Transport};

/// Application-level close code sent with every server-initiated close.
const POLICY_CLOSE_CODE: u16 = 4000;

// Server → player / console messages
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    ConnectionConfirmed { player_id: String },
    ConnectionRejected { reason: String },
    ConsoleConnected,
    TickerUpdated(TickerUpdate),
    ContentChanged { timestamp: String },
    Command {
        command: String,
        data: serde_json::Value,
        timestamp: String,
    },
    ConfigUpdate { config: serde_json::Value },
    PlayerDeleted { message: String },

    // Console-only events
    PlayerRegistered { player: Player },
    PlayerConnected { player: Player },
    PlayerDisconnected { player: Player },
    PlayerUpdated { player: Player },
    #[serde(rename_all = "camelCase")]
    PlayerRemoved { player_id: String },
    #[serde(rename_all = "camelCase")]
    PlayerStatus {
        player_id: String,
        status: serde_json::Value,
    },
    TickerSettingsUpdated { data: TickerUpdate },
    MediaUpdated { timestamp: String },
    PlaylistsUpdated { timestamp: String },
    SchedulesUpdated { timestamp: String },
    PlayersUpdated { timestamp: String },
}

/// Fully-populated marquee snapshot pushed to players.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerUpdate {
    pub ticker_text: String,
    pub ticker_enabled: bool,
    pub ticker_speed: f64,
    pub timestamp: String,
}

impl From<&TickerSettings> for TickerUpdate {
    fn from(settings: &TickerSettings) -> Self {
        Self {
            ticker_text: settings.ticker_text.clone(),
            ticker_enabled: settings.ticker_enabled,
            ticker_speed: settings.ticker_speed,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

// Player / console → server messages
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    PlayerConnect { player_id: String, token: String },
    #[serde(alias = "cms-connect")]
    ConsoleConnect {},
    PlayerHeartbeat {},
    PlayerStatus {
        #[serde(default)]
        status: serde_json::Value,
    },
}

/// What the connection has identified itself as.
#[derive(Debug)]
enum Session {
    Anonymous,
    Player(String),
    Console,
}

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = unbounded_channel::<Outbound>();
    let transport = Transport {
        connection_id: state.registry.next_connection_id(),
        sender: tx,
    };

    // Forward queued messages to the socket; a queued close ends the connection.
    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Message(msg) => match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!("Failed to encode websocket message: {}", e),
                },
                Outbound::Close(reason) => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: POLICY_CLOSE_CODE,
                            reason: reason.as_str().into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // Inbound messages are handled inline so one connection's handlers never overlap.
    let mut session = Session::Anonymous;
    loop {
        tokio::select! {
            _ = &mut send_task => break,
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) => handle_message(&state, &transport, &mut session, msg).await,
                        Err(e) => tracing::warn!(
                            "Dropping malformed message on connection {}: {}",
                            transport.connection_id,
                            e
                        ),
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
    send_task.abort();

    match session {
        Session::Player(player_id) => {
            player_service::on_disconnect(&state, &player_id, transport.connection_id).await;
        }
        Session::Console => {
            state.registry.remove_console(transport.connection_id).await;
            tracing::debug!("Console {} disconnected", transport.connection_id);
        }
        Session::Anonymous => {}
    }
}

async fn handle_message(
    state: &AppState,
    transport: &Transport,
    session: &mut Session,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::PlayerConnect { player_id, token } => {
            if !player_service::authenticate_connect(state, &player_id, &token).await {
                tracing::warn!("Rejected connect attempt for player {}", player_id);
                transport.send(ServerMessage::ConnectionRejected {
                    reason: "Invalid credentials".to_string(),
                });
                transport.close(CloseReason::InvalidCredentials);
                return;
            }

            match std::mem::replace(session, Session::Anonymous) {
                Session::Player(previous) if previous != player_id => {
                    player_service::on_disconnect(state, &previous, transport.connection_id)
                        .await;
                }
                Session::Console => {
                    state.registry.remove_console(transport.connection_id).await;
                }
                _ => {}
            }

            match player_service::on_connect(state, &player_id, &token, transport.clone()).await {
                Ok(()) => *session = Session::Player(player_id),
                Err(e) => {
                    tracing::warn!("Connect for player {} lost a race: {}", player_id, e);
                    transport.send(ServerMessage::ConnectionRejected {
                        reason: "Invalid credentials".to_string(),
                    });
                    transport.close(CloseReason::InvalidCredentials);
                }
            }
        }
        ClientMessage::ConsoleConnect {} => {
            if let Session::Player(previous) = std::mem::replace(session, Session::Console) {
                player_service::on_disconnect(state, &previous, transport.connection_id).await;
            }
            state.registry.add_console(transport.clone()).await;
            transport.send(ServerMessage::ConsoleConnected);
            tracing::info!("Console {} connected", transport.connection_id);
        }
        ClientMessage::PlayerHeartbeat {} => match session {
            Session::Player(player_id) => {
                player_service::on_heartbeat(state, player_id, transport.connection_id).await;
            }
            _ => tracing::debug!(
                "Ignoring heartbeat from unidentified connection {}",
                transport.connection_id
            ),
        },
        ClientMessage::PlayerStatus { status } => {
            if let Session::Player(player_id) = session {
                state
                    .registry
                    .broadcast_to_consoles(&ServerMessage::PlayerStatus {
                        player_id: player_id.clone(),
                        status,
                    })
                    .await;
            }
        }
    }
}
