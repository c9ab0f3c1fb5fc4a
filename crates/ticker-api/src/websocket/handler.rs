//! WebSocket 연결 handler.
//!
//! Axum WebSocket 엔드포인트 및 연결별 reader/writer 태스크.
//!
//! - writer: 연결의 송신 큐를 비우며 텍스트/ping 프레임을 씁니다.
//!   레지스트리에서 제거되면(종료 토큰 취소) 남은 큐를 버리고 Close 프레임을 보낸 뒤 종료합니다.
//! - reader: 수신 프레임을 레지스트리로 넘깁니다. 전송 오류나 Close 프레임에서 종료합니다.
//!
//! 둘 중 하나가 끝나면 연결을 레지스트리에서 제거합니다.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use super::connection::{ConnectionHandle, ConnectionId, InboundOutcome, Outbound, SharedRegistry};
use super::messages::WsError;
use crate::metrics::{decrement_websocket_connections, increment_websocket_connections};

/// WebSocket 상태.
#[derive(Clone)]
pub struct WsState {
    /// 연결 레지스트리
    pub registry: SharedRegistry,
    /// 연결별 송신 큐 크기
    pub outbound_buffer: usize,
}

impl WsState {
    /// 새로운 WebSocket 상태 생성.
    pub fn new(registry: SharedRegistry, outbound_buffer: usize) -> Self {
        Self {
            registry,
            outbound_buffer,
        }
    }
}

/// WebSocket 업그레이드 핸들러.
///
/// # 엔드포인트
///
/// `GET /ws`
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(ws_state): State<WsState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ws_state))
}

/// WebSocket 연결 처리.
async fn handle_socket(socket: WebSocket, state: WsState) {
    let (handle, mut outbound) = ConnectionHandle::channel(state.outbound_buffer);
    let closing = handle.closing_token();
    let connection_id = state.registry.admit(handle).await;

    increment_websocket_connections();
    info!(connection_id = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // 송신 큐 → 소켓
    let mut send_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                biased;

                _ = closing.cancelled() => {
                    debug!(connection_id = %connection_id, "Connection closed by server");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }

                frame = outbound.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let message = match frame {
                Outbound::Text(text) => Message::Text(text.to_string().into()),
                Outbound::Ping => Message::Ping(Default::default()),
            };
            if let Err(e) = sender.send(message).await {
                debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // 소켓 → 레지스트리
    let registry = state.registry.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(message) => {
                    if !handle_client_frame(&registry, connection_id, message).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // 하나의 태스크가 종료되면 다른 것도 종료
    tokio::select! {
        _ = &mut receive_task => {
            debug!(connection_id = %connection_id, "Receive task ended");
            send_task.abort();
        }
        _ = &mut send_task => {
            debug!(connection_id = %connection_id, "Send task ended");
            receive_task.abort();
        }
    }

    let symbols = state.registry.remove(connection_id).await;

    decrement_websocket_connections();
    info!(
        connection_id = %connection_id,
        symbols = symbols.map_or(0, |s| s.len()),
        "WebSocket disconnected"
    );
}

/// 수신 프레임 처리.
///
/// # Returns
///
/// `true`면 연결 유지, `false`면 연결 종료
async fn handle_client_frame(
    registry: &SharedRegistry,
    connection_id: ConnectionId,
    message: Message,
) -> bool {
    let outcome = match message {
        Message::Text(text) => registry.handle_inbound(connection_id, text.as_str()).await,
        Message::Binary(_) => {
            let error = WsError::InvalidMessage("binary frames are not supported".to_string());
            registry.reject(connection_id, &error).await
        }
        Message::Pong(_) => return registry.mark_alive(connection_id).await,
        // axum이 자동으로 pong 응답
        Message::Ping(_) => return true,
        Message::Close(_) => {
            debug!(connection_id = %connection_id, "Close frame received");
            return false;
        }
    };

    match outcome {
        InboundOutcome::UnknownConnection => {
            // 하트비트로 이미 퇴출됨
            debug!(connection_id = %connection_id, "Frame from evicted connection");
            false
        }
        outcome => {
            debug!(connection_id = %connection_id, ?outcome, "Client message handled");
            true
        }
    }
}

/// WebSocket 라우터 생성.
///
/// WsState를 자체적으로 보유하므로 어떤 상위 라우터에도 병합할 수 있습니다.
pub fn websocket_router<S>(ws_state: WsState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(ws_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::{create_registry, RegistryLimits};

    fn text(raw: &str) -> Message {
        Message::Text(raw.to_string().into())
    }

    #[test]
    fn test_ws_state_creation() {
        let registry = create_registry(RegistryLimits::default());
        let state = WsState::new(registry, 64);

        assert_eq!(state.outbound_buffer, 64);
    }

    #[tokio::test]
    async fn test_frame_dispatch() {
        let registry = create_registry(RegistryLimits::default());
        let (handle, mut rx) = ConnectionHandle::channel(8);
        let id = registry.admit(handle).await;

        let keep =
            handle_client_frame(&registry, id, text(r#"{"type":"subscribe","symbol":"AAPL"}"#))
                .await;
        assert!(keep);
        assert_eq!(registry.subscriber_count("AAPL").await, 1);

        assert!(handle_client_frame(&registry, id, Message::Binary(vec![1, 2, 3].into())).await);
        let Ok(Outbound::Text(reply)) = rx.try_recv() else {
            panic!("expected error reply");
        };
        assert!(reply.contains("malformed message"));

        assert!(!handle_client_frame(&registry, id, Message::Close(None)).await);

        registry.remove(id).await;
        assert!(!handle_client_frame(&registry, id, text(r#"{"type":"pong"}"#)).await);
    }

    #[tokio::test]
    async fn test_transport_pong_marks_alive() {
        let registry = create_registry(RegistryLimits::default());
        let (handle, _rx) = ConnectionHandle::channel(8);
        let id = registry.admit(handle).await;

        registry
            .retain_with(|_, connection| {
                connection.alive = false;
                true
            })
            .await;

        assert!(handle_client_frame(&registry, id, Message::Pong(Default::default())).await);
        assert_eq!(registry.is_alive(id).await, Some(true));
    }
}
