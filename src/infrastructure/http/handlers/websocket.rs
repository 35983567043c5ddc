//! WebSocket Handler
//!
//! 每本书一个事件流：连接时先推送当前状态，之后转发 BookEvent，绘本结束后关闭

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::application::GetFullState;
use crate::domain::book::{BookCreationState, BookId};
use crate::infrastructure::events::BookEvent;
use crate::infrastructure::http::state::AppState;

/// 绘本 WebSocket 连接处理
pub async fn book_websocket_handler(
    ws: WebSocketUpgrade,
    Path(book_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let book_id = BookId::from_uuid(book_id);
    ws.on_upgrade(move |socket| handle_book_socket(socket, book_id, state))
}

fn to_message(event: &BookEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize event");
            None
        }
    }
}

/// 推送当前状态，发送失败返回 false
async fn send_status(
    sender: &mut SplitSink<WebSocket, Message>,
    snapshot: &BookCreationState,
) -> bool {
    let current = BookEvent::StatusChanged {
        book_id: snapshot.book_id(),
        status: snapshot.status(),
        stage: snapshot.stage().as_str().to_string(),
        error: snapshot.failure().map(str::to_string),
    };
    match to_message(&current) {
        Some(msg) => sender.send(msg).await.is_ok(),
        None => true,
    }
}

async fn handle_book_socket(socket: WebSocket, book_id: BookId, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let load = || state.full_state_handler.handle(GetFullState { book_id });

    match load().await {
        Ok(snapshot) if !snapshot.is_terminal() => {}
        Ok(snapshot) => {
            send_status(&mut sender, &snapshot).await;
            let _ = sender.close().await;
            return;
        }
        Err(e) => {
            tracing::warn!(book_id = %book_id, error = %e, "WebSocket connection rejected");
            let _ = sender.close().await;
            return;
        }
    }

    // 订阅后重新读取快照，避免漏掉两者之间的事件
    let mut event_rx = state.event_publisher.subscribe(book_id);
    let snapshot = match load().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(book_id = %book_id, error = %e, "Failed to load book state");
            let _ = sender.close().await;
            return;
        }
    };
    if !send_status(&mut sender, &snapshot).await {
        return;
    }
    if snapshot.is_terminal() {
        // 编排器已在订阅前关闭频道，这里创建的频道不会再有事件
        state.event_publisher.close(book_id);
        let _ = sender.close().await;
        return;
    }

    tracing::info!(book_id = %book_id, "WebSocket connected");

    // 事件转发任务
    let forward_task = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    let Some(msg) = to_message(&event) else {
                        continue;
                    };
                    if let Err(e) = sender.send(msg).await {
                        tracing::debug!(book_id = %book_id, error = %e, "Failed to send WebSocket message");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(book_id = %book_id, skipped, "WebSocket subscriber lagging, events dropped");
                }
                // 编排器结束后关闭了频道
                Err(RecvError::Closed) => {
                    let _ = sender.close().await;
                    break;
                }
            }
        }
    });

    // 接收客户端消息（心跳）
    let receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => {
                    tracing::info!(book_id = %book_id, "WebSocket closed by client");
                    break;
                }
                Err(e) => {
                    tracing::debug!(book_id = %book_id, error = %e, "WebSocket error");
                    break;
                }
                // Ping 由 axum 自动回复 Pong
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = forward_task => {}
        _ = receive_task => {}
    }

    tracing::info!(book_id = %book_id, "WebSocket disconnected");
}
