//! WebSocket channel handler
//!
//! A channel authenticates with a bearer header on the upgrade request or
//! with an `auth` frame sent within the auth timeout. Until then it is not
//! registered and receives nothing.

use crate::auth::principal::PrincipalId;
use crate::events::Event;
use crate::server::app::AppState;
use crate::server::connections::LiveConnection;
use crate::server::http::bearer_token;
use crate::server::protocol::{ClientMessage, ServerMessage};
use crate::server::router::EventRouter;
use crate::topics::{Topic, TopicPattern};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long the writer may take to flush after the reader stops
const WRITER_DRAIN: Duration = Duration::from_secs(1);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let bearer = bearer_token(&headers).map(str::to_string);
    ws.on_upgrade(move |socket| handle_socket(socket, state.router, bearer))
}

async fn handle_socket(socket: WebSocket, router: Arc<EventRouter>, bearer: Option<String>) {
    let (sender, receiver) = socket.split();
    serve_channel(sender, receiver, router, bearer).await
}

/// Drive one channel from authentication to close over any frame transport
pub async fn serve_channel<W, R>(
    mut sender: W,
    mut receiver: R,
    router: Arc<EventRouter>,
    bearer: Option<String>,
) where
    W: Sink<Message> + Send + Unpin + 'static,
    R: Stream<Item = Result<Message, axum::Error>> + Send + Unpin,
{
    let token = match bearer {
        Some(token) => Ok(token),
        None => {
            let timeout = router.config().auth_timeout;
            match tokio::time::timeout(timeout, first_auth_frame(&mut receiver)).await {
                Ok(Some(result)) => result,
                // Peer left before authenticating
                Ok(None) => return,
                Err(_) => Err("authentication timed out"),
            }
        }
    };

    let principal = token.and_then(|token| {
        router.authenticate(&token).map_err(|e| {
            debug!(error = %e, "Channel authentication rejected");
            "authentication failed"
        })
    });

    let principal: PrincipalId = match principal {
        Ok(principal) => principal,
        Err(message) => {
            let frame = ServerMessage::AuthError {
                message: message.to_string(),
            };
            if let Some(text) = frame.to_text() {
                let _ = sender.send(Message::Text(text.into())).await;
            }
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let (conn, mut rx) = router.register(principal);
    let conn_id = conn.id;
    info!(conn_id = %conn_id, principal_id = %principal, "Channel authenticated");

    reply(&conn, ServerMessage::AuthOk {
        principal_id: principal,
    })
    .await;

    // Drain the outbound queue until the connection closes
    let writer_conn = conn.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    let text = String::from_utf8_lossy(&msg.payload).into_owned();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        writer_conn.close();
                        break;
                    }
                }
                _ = writer_conn.closed() => break,
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    loop {
        let frame = tokio::select! {
            frame = receiver.next() => frame,
            _ = conn.closed() => break,
        };

        let parsed = match frame {
            Some(Ok(Message::Text(text))) => serde_json::from_str::<ClientMessage>(&text),
            Some(Ok(Message::Binary(data))) => serde_json::from_slice::<ClientMessage>(&data),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                warn!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        };

        match parsed {
            Ok(msg) => handle_client_message(msg, &conn, &router).await,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "Unparseable frame");
                reply(&conn, ServerMessage::Error {
                    message: "invalid frame".to_string(),
                })
                .await;
            }
        }
    }

    router.disconnect(&conn);
    if tokio::time::timeout(WRITER_DRAIN, &mut send_task).await.is_err() {
        send_task.abort();
    }
    debug!(conn_id = %conn_id, "Channel closed");
}

/// Wait for the client's `auth` frame
///
/// `None` when the peer goes away first.
async fn first_auth_frame<R>(receiver: &mut R) -> Option<Result<String, &'static str>>
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let parsed = match receiver.next().await? {
            Ok(Message::Text(text)) => serde_json::from_str::<ClientMessage>(&text),
            Ok(Message::Binary(data)) => serde_json::from_slice::<ClientMessage>(&data),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) | Err(_) => return None,
        };

        return Some(match parsed {
            Ok(ClientMessage::Auth { token }) => Ok(token),
            Ok(_) => Err("must authenticate first"),
            Err(_) => Err("invalid frame"),
        });
    }
}

async fn reply(conn: &LiveConnection, msg: ServerMessage) {
    if let Some(out) = msg.to_outbound() {
        if conn.send(out).await.is_err() {
            debug!(conn_id = %conn.id, "Reply dropped, connection closed");
        }
    }
}

async fn handle_client_message(msg: ClientMessage, conn: &LiveConnection, router: &EventRouter) {
    let response = match msg {
        ClientMessage::Auth { .. } => {
            debug!(conn_id = %conn.id, "Ignoring auth frame on authenticated channel");
            return;
        }
        ClientMessage::Subscribe { topic } => match TopicPattern::parse(&topic) {
            Ok(pattern) => {
                conn.subscribe(pattern);
                ServerMessage::Subscribed { topic }
            }
            Err(e) => ServerMessage::SubscribeError {
                topic,
                message: e.to_string(),
            },
        },
        ClientMessage::Unsubscribe { topic } => {
            if let Ok(pattern) = TopicPattern::parse(&topic) {
                conn.unsubscribe(&pattern);
            }
            ServerMessage::Unsubscribed { topic }
        }
        ClientMessage::Publish { topic, payload } => publish(conn, router, topic, payload).await,
        ClientMessage::Ping { seq } => ServerMessage::Pong { seq },
    };

    reply(conn, response).await;
}

async fn publish(
    conn: &LiveConnection,
    router: &EventRouter,
    topic: String,
    payload: serde_json::Value,
) -> ServerMessage {
    let address = match Topic::parse(&topic) {
        Ok(parsed) => parsed.event_address(),
        Err(e) => {
            return ServerMessage::PublishError {
                topic,
                message: e.to_string(),
            }
        }
    };

    let (owner, class) = match address {
        Some((owner, class)) if owner == conn.principal => (owner, class),
        Some(_) => {
            return ServerMessage::PublishError {
                topic,
                message: "permission denied".to_string(),
            }
        }
        None => {
            return ServerMessage::PublishError {
                topic,
                message: "not an event topic".to_string(),
            }
        }
    };

    match router.publish(&Event::new(owner, class, payload)).await {
        Ok(report) => ServerMessage::Published {
            topic,
            delivered: report.delivered,
        },
        Err(e) => {
            warn!(conn_id = %conn.id, topic = %topic, error = %e, "Publish failed");
            ServerMessage::PublishError {
                topic,
                message: "temporarily unavailable".to_string(),
            }
        }
    }
}
