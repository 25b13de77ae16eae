//! 在线名单广播
//!
//! 每次准入或驱逐后，把注册表的完整名单推送给所有存活连接，包括刚加入的连接。
//! 每次都是整体替换而非增量，不保留历史名单。

use std::sync::Arc;

use domain::ConnectionId;

use crate::events::ServerEvent;
use crate::fanout::fan_out;
use crate::registry::ConnectionRegistry;

pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// 推送当前名单，返回写入失败的连接
    pub async fn announce(&self) -> Vec<ConnectionId> {
        let (roster, connections) = self.registry.snapshot_with_connections().await;
        let online = roster.len();

        let payload = match ServerEvent::roster(roster).encode() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode roster");
                return Vec::new();
            }
        };

        let failed = fan_out(&connections, &payload);
        tracing::debug!(
            online,
            connections = connections.len(),
            failed = failed.len(),
            "roster announced"
        );
        failed
    }
}
