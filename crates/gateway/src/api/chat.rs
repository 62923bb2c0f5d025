//! The chat channel: a persistent authenticated WebSocket that pipes
//! orchestration events to the client.
//!
//! Flow:
//! 1. Client connects to `/ws/chat`
//! 2. First frame must be `{type:"auth", token}` within 10 seconds
//!    (the token may instead ride in a `session` cookie)
//! 3. On success the gateway acquires the per-user request lock and
//!    enters the message loop
//! 4. Each `{type:"message"}` runs one orchestrated turn; events stream
//!    back in emission order, ending with `{type:"complete"}`

use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use base64::Engine;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use mnemon_continuum::UnitOfWork;
use mnemon_domain::error::{Error, Result};
use mnemon_domain::message::{ContentBlock, MessageContent};

use crate::api::protocol::{ClientFrame, CompleteMetadata, ServerFrame};
use crate::state::AppState;

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const SUPPORTED_IMAGE_FORMATS: [&str; 4] =
    ["image/jpeg", "image/png", "image/gif", "image/webp"];
const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /ws/chat — upgrade to WebSocket.
pub async fn chat_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let cookie_token = session_cookie(&headers);
    ws.on_upgrade(move |socket| handle_socket(socket, state, cookie_token))
}

/// Extract the `session` cookie value, if present.
fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("cookie")?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "session").then(|| value.to_string())
    })
}

async fn handle_socket(socket: WebSocket, state: AppState, cookie_token: Option<String>) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Writer task: serialize outbound frames onto the socket.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&frame) else {
                continue;
            };
            if ws_sink.send(WsMessage::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    // ── Awaiting-Auth → Authenticated ──────────────────────────────
    let Some(user_id) = authenticate(&state, &mut ws_stream, &tx, cookie_token).await else {
        drop(tx);
        let _ = writer.await;
        return;
    };

    let connection_id = Uuid::new_v4();
    state.connections.register(connection_id, tx.clone());

    // Per-user request lock: a stale lock from a previous connection
    // means the user must wait out the TTL, not queue behind it.
    match state
        .user_lock
        .acquire(&user_id, &connection_id.to_string())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            let _ = tx.send(ServerFrame::Error {
                message: "Another connection holds your session lock. It did not release \
                          cleanly last time; it will expire within 60 seconds. Please \
                          reconnect in a minute."
                    .into(),
            });
            state.connections.remove(connection_id);
            drop(tx);
            let _ = writer.await;
            return;
        }
        Err(e) => {
            tracing::error!(user_id, error = %e, "lock acquisition failed");
            let _ = tx.send(ServerFrame::Error {
                message: friendly_error(&e),
            });
            state.connections.remove(connection_id);
            drop(tx);
            let _ = writer.await;
            return;
        }
    }

    tracing::info!(user_id, %connection_id, "chat session authenticated");

    // ── Message loop ───────────────────────────────────────────────
    while let Some(Ok(message)) = ws_stream.next().await {
        let text = match message {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let frame = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => frame,
            Err(_) => {
                let _ = tx.send(ServerFrame::Error {
                    message: "Unrecognized message".into(),
                });
                continue;
            }
        };

        match frame {
            ClientFrame::Ping => {
                let _ = tx.send(ServerFrame::Pong);
            }
            ClientFrame::Auth { .. } => {
                // Already authenticated; ignore.
            }
            ClientFrame::Message {
                content,
                image,
                image_type,
            } => {
                process_turn(&state, &user_id, content, image, image_type, &tx).await;
            }
        }
    }

    // ── Closed: release the lock, drop refs ────────────────────────
    state.user_lock.release(&user_id).await;
    state.connections.remove(connection_id);
    drop(tx);
    let _ = writer.await;
    tracing::info!(user_id, %connection_id, "chat session closed");
}

async fn authenticate(
    state: &AppState,
    ws_stream: &mut SplitStream<WebSocket>,
    tx: &mpsc::UnboundedSender<ServerFrame>,
    cookie_token: Option<String>,
) -> Option<String> {
    let first = tokio::time::timeout(AUTH_TIMEOUT, ws_stream.next()).await;
    let frame = match first {
        Err(_) => {
            let _ = tx.send(ServerFrame::Error {
                message: "Authentication timeout".into(),
            });
            return None;
        }
        Ok(Some(Ok(WsMessage::Text(text)))) => match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => frame,
            Err(_) => {
                let _ = tx.send(ServerFrame::Error {
                    message: "First message must be authentication".into(),
                });
                return None;
            }
        },
        _ => return None,
    };

    let ClientFrame::Auth { token } = frame else {
        let _ = tx.send(ServerFrame::Error {
            message: "First message must be authentication".into(),
        });
        return None;
    };

    let Some(token) = token.or(cookie_token) else {
        let _ = tx.send(ServerFrame::Error {
            message: "Missing authentication token".into(),
        });
        return None;
    };

    match state.auth.verify(&token) {
        Ok(user_id) => {
            let _ = tx.send(ServerFrame::AuthSuccess {
                user_id: user_id.clone(),
            });
            Some(user_id)
        }
        Err(_) => {
            let _ = tx.send(ServerFrame::Error {
                message: "Invalid or expired session".into(),
            });
            None
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn processing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn process_turn(
    state: &AppState,
    user_id: &str,
    content: String,
    image: Option<String>,
    image_type: Option<String>,
    tx: &mpsc::UnboundedSender<ServerFrame>,
) {
    let content = sanitize_content(&content);
    if content.is_empty() {
        let _ = tx.send(ServerFrame::Error {
            message: "Message cannot be empty".into(),
        });
        return;
    }

    let user_content = match build_content(content, image, image_type) {
        Ok(content) => content,
        Err(e) => {
            let _ = tx.send(ServerFrame::Error {
                message: e.to_string(),
            });
            return;
        }
    };

    let started = Instant::now();
    let continuum = match state.pool.get_or_load(user_id).await {
        Ok(continuum) => continuum,
        Err(e) => {
            tracing::error!(user_id, error = %e, "continuum load failed");
            let _ = tx.send(ServerFrame::Error {
                message: friendly_error(&e),
            });
            return;
        }
    };

    let mut continuum = continuum.lock().await;
    let snapshot = continuum.snapshot();
    let mut uow = UnitOfWork::new(state.db.clone());

    let result = state
        .orchestrator
        .process_message(
            &mut continuum,
            user_content,
            &state.system_prompt,
            Some(tx),
            &mut uow,
        )
        .await;

    let outcome = match result {
        Ok((response, metadata)) => uow.commit(&continuum).map(|_| (response, metadata)),
        Err(e) => Err(e),
    };

    match outcome {
        Ok((response, metadata)) => {
            let _ = tx.send(ServerFrame::Complete {
                continuum_id: continuum.id,
                response,
                metadata: CompleteMetadata {
                    tools_used: metadata.tools_used,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                },
            });
        }
        Err(e) => {
            // The store is untouched; roll the cache back to match.
            continuum.restore(snapshot);
            tracing::error!(user_id, error = %e, "turn failed");
            let _ = tx.send(ServerFrame::Error {
                message: friendly_error(&e),
            });
        }
    }
}

/// Assemble message content, validating any attached image.
fn build_content(
    content: String,
    image: Option<String>,
    image_type: Option<String>,
) -> Result<MessageContent> {
    let Some(image) = image else {
        return Ok(MessageContent::Text(content));
    };

    let Some(image_type) = image_type else {
        return Err(Error::Validation(
            "image_type is required when image is provided".into(),
        ));
    };
    if !SUPPORTED_IMAGE_FORMATS.contains(&image_type.as_str()) {
        return Err(Error::Validation(format!(
            "Unsupported image format. Supported: {}",
            SUPPORTED_IMAGE_FORMATS.join(", ")
        )));
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(image.as_bytes())
        .map_err(|e| Error::Validation(format!("Invalid base64 image: {e}")))?;
    if decoded.len() > MAX_IMAGE_BYTES {
        return Err(Error::Validation(format!(
            "Image exceeds maximum size of {}MB",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }

    Ok(MessageContent::Blocks(vec![
        ContentBlock::Text { text: content },
        ContentBlock::Image {
            media_type: image_type,
            data: image,
        },
    ]))
}

/// Strip control characters (keeping newlines and tabs) and trim.
fn sanitize_content(content: &str) -> String {
    content
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Translate internal failures into something a person can act on.
/// Details stay in the logs.
pub(crate) fn friendly_error(error: &Error) -> String {
    let detail = error.to_string().to_lowercase();
    match error {
        Error::RateLimited(_) => "I'm currently rate limited. Please try again in a few \
                                  moments."
            .into(),
        Error::Auth(_) => "There's an issue with my API authentication. Please contact \
                           support to resolve this."
            .into(),
        Error::ContextLength(_) => "That conversation has grown too large for me to process \
                                    in one go. Try a shorter message."
            .into(),
        Error::Timeout(_) => "The request took too long to process. Please try again with a \
                              simpler message."
            .into(),
        Error::Upstream { .. } => "The AI service is experiencing technical difficulties. \
                                   Please try again in a few moments."
            .into(),
        Error::Validation(message) => message.clone(),
        _ if detail.contains("rate limit") || detail.contains("usage limit") => {
            "I'm currently rate limited. Please try again in a few moments.".into()
        }
        _ if detail.contains("timeout") || detail.contains("took too long") => {
            "The request took too long to process. Please try again with a simpler message."
                .into()
        }
        _ if detail.contains("connection") || detail.contains("network") => {
            "I'm having trouble connecting to the AI service. Please check your connection \
             and try again."
                .into()
        }
        _ if detail.contains("500") || detail.contains("502") || detail.contains("503") => {
            "The AI service is experiencing technical difficulties. Please try again in a \
             few moments."
                .into()
        }
        _ => "I encountered an unexpected error while processing your message. Please try \
              again, and if the problem persists, contact support."
            .into(),
    }
}
