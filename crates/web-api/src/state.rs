use std::sync::Arc;

use application::{HeartbeatSettings, PrincipalVerifier, RelayHub};

/// 每个 WebSocket 连接共用的参数
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub heartbeat: HeartbeatSettings,
    /// 单个连接出站队列的容量，入站队列沿用同一值
    pub outbound_buffer: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatSettings::default(),
            outbound_buffer: 256,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RelayHub>,
    pub verifier: Arc<dyn PrincipalVerifier>,
    pub connection: ConnectionSettings,
}

impl AppState {
    pub fn new(
        hub: Arc<RelayHub>,
        verifier: Arc<dyn PrincipalVerifier>,
        connection: ConnectionSettings,
    ) -> Self {
        Self {
            hub,
            verifier,
            connection,
        }
    }
}
