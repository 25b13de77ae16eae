#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use application::attachments::memory::MemoryAttachmentStore;
use application::repository::memory::MemoryMessageRepository;
use application::{
    HeartbeatSettings, MessageRepository, RelayHub, RelayHubDependencies, SystemClock,
};
use domain::{Principal, UserId};
use futures_util::StreamExt;
use infrastructure::LocalAttachmentStore;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;
use web_api::{router, AppState, ConnectionSettings, JwtConfig, JwtService, RouterOptions};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub jwt: Arc<JwtService>,
    pub hub: Arc<RelayHub>,
    pub uploads_dir: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(HeartbeatSettings::default()).await
    }

    pub async fn spawn_with(heartbeat: HeartbeatSettings) -> Self {
        Self::spawn_with_repository(heartbeat, Arc::new(MemoryMessageRepository::new())).await
    }

    pub async fn spawn_with_repository(
        heartbeat: HeartbeatSettings,
        message_repository: Arc<dyn MessageRepository>,
    ) -> Self {
        let uploads_dir = std::env::temp_dir().join(format!("relay-web-{}", Uuid::new_v4()));
        let hub = Arc::new(RelayHub::new(RelayHubDependencies {
            message_repository,
            attachment_store: Arc::new(LocalAttachmentStore::new(
                &uploads_dir,
                Arc::new(SystemClock),
            )),
            clock: Arc::new(SystemClock),
        }));
        let jwt = Arc::new(JwtService::new(JwtConfig {
            secret: "test-secret-key".to_string(),
            expiration_hours: 24,
        }));

        let state = AppState::new(
            hub.clone(),
            jwt.clone(),
            ConnectionSettings {
                heartbeat,
                outbound_buffer: 64,
            },
        );
        let app = router(
            state,
            RouterOptions {
                uploads_dir: uploads_dir.clone(),
                client_origin: None,
            },
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            jwt,
            hub,
            uploads_dir,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn token_for(&self, principal: &Principal) -> String {
        self.jwt.generate_token(principal).expect("token")
    }

    /// 以 cookie 携带 token 建立 WebSocket 连接
    pub async fn connect(&self, principal: &Principal) -> WsClient {
        let mut request = format!("ws://{}/ws", self.addr)
            .into_client_request()
            .expect("ws request");
        request.headers_mut().insert(
            COOKIE,
            format!("token={}", self.token_for(principal))
                .parse()
                .expect("cookie header"),
        );

        let (stream, _) = connect_async(request).await.expect("ws connect");
        stream
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = std::fs::remove_dir_all(&self.uploads_dir);
    }
}

pub fn principal(name: &str) -> Principal {
    Principal::new(UserId::from(Uuid::new_v4()), name)
}

/// 读取下一个 JSON 文本帧，跳过控制帧
pub async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("ws error");
        if let TungsteniteMessage::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("json frame");
        }
    }
}

/// 跳过名单帧，返回下一个消息类事件
pub async fn next_event(ws: &mut WsClient) -> Value {
    loop {
        let frame = next_json(ws).await;
        if frame.get("online").is_none() {
            return frame;
        }
    }
}

/// 等待满足条件的名单帧
pub async fn wait_for_roster<F>(ws: &mut WsClient, mut predicate: F) -> Vec<String>
where
    F: FnMut(&[String]) -> bool,
{
    loop {
        let frame = next_json(ws).await;
        let Some(online) = frame.get("online").and_then(Value::as_array) else {
            continue;
        };
        let ids: Vec<String> = online
            .iter()
            .filter_map(|entry| entry["userId"].as_str().map(str::to_string))
            .collect();
        if predicate(&ids) {
            return ids;
        }
    }
}

/// 断言一段时间内没有消息类事件到达
pub async fn assert_no_event(ws: &mut WsClient, within: Duration) {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match tokio::time::timeout(remaining, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(TungsteniteMessage::Text(text)))) => {
                let frame: Value = serde_json::from_str(text.as_str()).expect("json frame");
                assert!(frame.get("online").is_some(), "unexpected event: {frame}");
            }
            Ok(Some(Ok(_))) => {}
            Ok(other) => panic!("connection ended unexpectedly: {other:?}"),
        }
    }
}
