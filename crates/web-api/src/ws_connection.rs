use application::{
    ApplicationError, ClientEvent, ConnectionHandle, EvictionReason, LivenessExit,
    LivenessMonitor, OutboundFrame, PongSignal, RelayHub, ServerEvent,
};
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, Utf8Bytes, WebSocket};
use domain::{ConnectionId, Principal};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// 单个已认证 WebSocket 连接
///
/// 连接由四个任务组成，共享同一个取消令牌：
/// - 发送任务独占 socket 写端，按序写出出站队列中的帧
/// - 接收任务持续读取 socket，处理控制帧并把文本帧放入入站队列
/// - 分发任务按到达顺序逐个解析事件并交给中枢
/// - 心跳任务周期性发送 ping 并在超时后宣告死亡
///
/// 分发可能因持久化而变慢，但接收任务不等待它，pong 总能及时被读到。
/// 任一任务结束即驱逐该连接，其余任务随令牌取消而退出。
pub struct WebSocketConnection {
    state: AppState,
    principal: Principal,
}

impl WebSocketConnection {
    pub fn new(state: AppState, principal: Principal) -> Self {
        Self { state, principal }
    }

    pub async fn run(self, socket: WebSocket) {
        let settings = self.state.connection;
        let hub = self.state.hub.clone();

        let (outbound_tx, outbound_rx) = mpsc::channel(settings.outbound_buffer);
        let cancel = CancellationToken::new();
        let handle = ConnectionHandle::new(
            ConnectionId::generate(),
            self.principal.clone(),
            outbound_tx,
            cancel.clone(),
        );
        let connection_id = handle.id();

        let (inbound_tx, inbound_rx) = mpsc::channel(settings.outbound_buffer);
        let (sender, incoming) = socket.split();
        let (monitor, pong) = LivenessMonitor::new(settings.heartbeat, cancel.clone());

        // 先准入再启动任务，准入时的名单广播已在出站队列中
        hub.join(handle.clone()).await;

        let mut tasks = JoinSet::new();
        tasks.spawn(write_loop(sender, outbound_rx, cancel.clone()));
        tasks.spawn(read_loop(
            incoming,
            inbound_tx,
            handle.clone(),
            pong,
            cancel.clone(),
        ));
        tasks.spawn(dispatch_loop(
            inbound_rx,
            hub.clone(),
            handle.clone(),
            cancel.clone(),
        ));
        tasks.spawn({
            let ping_target = handle.clone();
            async move {
                let exit = monitor
                    .run(move || ping_target.try_send(OutboundFrame::Ping).is_ok())
                    .await;
                match exit {
                    LivenessExit::Dead => Some(EvictionReason::LivenessTimeout),
                    LivenessExit::PingFailed => Some(EvictionReason::TransportFailure),
                    LivenessExit::Cancelled => None,
                }
            }
        });
        drop(handle);

        let reason = match tasks.join_next().await {
            Some(Ok(reason)) => reason,
            Some(Err(err)) => {
                tracing::error!(connection_id = %connection_id, error = %err, "connection task failed");
                Some(EvictionReason::Closed)
            }
            None => None,
        };

        // 没有原因说明已被其他路径驱逐，leave 此时是空操作
        hub.leave(connection_id, reason.unwrap_or(EvictionReason::Closed))
            .await;
        cancel.cancel();
        while tasks.join_next().await.is_some() {}

        tracing::info!(
            connection_id = %connection_id,
            user_id = %self.principal.user_id,
            "websocket connection finished"
        );
    }
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    cancel: CancellationToken,
) -> Option<EvictionReason> {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let message = match frame {
            OutboundFrame::Text(text) => WsMessage::Text(text.as_ref().into()),
            OutboundFrame::Ping => WsMessage::Ping(Bytes::new()),
            OutboundFrame::Pong(data) => WsMessage::Pong(data.into()),
        };

        if let Err(err) = sender.send(message).await {
            tracing::warn!(error = %err, "failed to write websocket frame");
            return Some(EvictionReason::TransportFailure);
        }
    }

    let _ = sender.close().await;
    None
}

async fn read_loop(
    mut incoming: SplitStream<WebSocket>,
    inbound: mpsc::Sender<Utf8Bytes>,
    handle: ConnectionHandle,
    pong: PongSignal,
    cancel: CancellationToken,
) -> Option<EvictionReason> {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            message = incoming.next() => message,
        };

        match message {
            Some(Ok(WsMessage::Text(text))) => {
                if let Err(err) = inbound.try_send(text) {
                    if matches!(err, mpsc::error::TrySendError::Closed(_)) {
                        return None;
                    }
                    tracing::warn!(connection_id = %handle.id(), "inbound queue full, dropping event");
                    report_error(&handle, &ApplicationError::Transport("inbound queue full".into()));
                }
            }
            Some(Ok(WsMessage::Pong(_))) => pong.notify(),
            Some(Ok(WsMessage::Ping(data))) => {
                if handle.try_send(OutboundFrame::Pong(data.to_vec())).is_err() {
                    return Some(EvictionReason::TransportFailure);
                }
            }
            Some(Ok(WsMessage::Binary(_))) => {
                tracing::debug!(connection_id = %handle.id(), "ignoring binary frame");
            }
            Some(Ok(WsMessage::Close(_))) | None => return Some(EvictionReason::Closed),
            Some(Err(err)) => {
                tracing::debug!(connection_id = %handle.id(), error = %err, "websocket read failed");
                return Some(EvictionReason::Closed);
            }
        }
    }
}

// 同一连接的事件严格按到达顺序处理
async fn dispatch_loop(
    mut inbound: mpsc::Receiver<Utf8Bytes>,
    hub: Arc<RelayHub>,
    handle: ConnectionHandle,
    cancel: CancellationToken,
) -> Option<EvictionReason> {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            frame = inbound.recv() => match frame {
                Some(frame) => frame,
                None => return None,
            },
        };

        handle_event(&hub, &handle, frame.as_str()).await;
    }
}

async fn handle_event(hub: &RelayHub, handle: &ConnectionHandle, frame: &str) {
    let result = match ClientEvent::parse(frame) {
        Ok(Some(event)) => hub.dispatch(handle.principal(), event).await,
        Ok(None) => {
            tracing::debug!(connection_id = %handle.id(), "ignoring event without recipient");
            Ok(())
        }
        Err(err) => Err(err),
    };

    if let Err(err) = result {
        tracing::warn!(
            connection_id = %handle.id(),
            user_id = %handle.user_id(),
            code = err.code(),
            error = %err,
            "event rejected"
        );
        report_error(handle, &err);
    }
}

// 错误只回给发起事件的连接
fn report_error(handle: &ConnectionHandle, err: &ApplicationError) {
    match ServerEvent::error(err).encode() {
        Ok(payload) => {
            if handle.try_deliver(payload).is_err() {
                tracing::debug!(connection_id = %handle.id(), "could not deliver error frame");
            }
        }
        Err(encode_err) => {
            tracing::error!(error = %encode_err, "failed to encode error frame");
        }
    }
}
