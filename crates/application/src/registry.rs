//! 连接注册表
//!
//! 所有存活连接及其身份的共享表，是"在线"的唯一事实来源。
//! 维护 用户 -> 连接集合 的索引，使路由只需访问目标用户自己的连接。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use domain::{ConnectionId, Principal, RosterEntry, UserId};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::ApplicationError;
use crate::events::OutboundFrame;

/// 已认证连接的句柄：身份在准入时确定，之后不可变
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    principal: Principal,
    outbound: mpsc::Sender<OutboundFrame>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        principal: Principal,
        outbound: mpsc::Sender<OutboundFrame>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            principal,
            outbound,
            cancel,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn user_id(&self) -> UserId {
        self.principal.user_id
    }

    /// 连接被驱逐时触发
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 非阻塞投递；队列满或已关闭都视为传输失败
    pub fn try_deliver(&self, payload: Arc<str>) -> Result<(), ApplicationError> {
        self.try_send(OutboundFrame::Text(payload))
    }

    pub fn try_send(&self, frame: OutboundFrame) -> Result<(), ApplicationError> {
        self.outbound.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                ApplicationError::Transport("outbound queue full".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                ApplicationError::Transport("connection closed".into())
            }
        })
    }
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    by_principal: HashMap<UserId, HashSet<ConnectionId>>,
}

impl RegistryState {
    fn roster(&self) -> Vec<RosterEntry> {
        let mut roster: Vec<RosterEntry> = self
            .by_principal
            .values()
            .filter_map(|ids| ids.iter().next())
            .filter_map(|id| self.connections.get(id))
            .map(|handle| RosterEntry::from(handle.principal()))
            .collect();
        roster.sort_by(|a, b| {
            a.username
                .cmp(&b.username)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        roster
    }

    fn unlink(&mut self, handle: &ConnectionHandle) {
        if let Some(ids) = self.by_principal.get_mut(&handle.user_id()) {
            ids.remove(&handle.id);
            if ids.is_empty() {
                self.by_principal.remove(&handle.user_id());
            }
        }
    }
}

/// 内存中的连接注册表
#[derive(Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接；同一句柄重复注册时替换旧记录并返回它
    pub async fn admit(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut state = self.state.write().await;
        let id = handle.id;
        let user_id = handle.user_id();

        let replaced = state.connections.insert(id, handle);
        if let Some(previous) = &replaced {
            state.unlink(previous);
        }
        state.by_principal.entry(user_id).or_default().insert(id);

        tracing::debug!(connection_id = %id, user_id = %user_id, "connection admitted");
        replaced
    }

    /// 无条件移除连接并取消其计时器；只有第一次移除会返回记录
    pub async fn evict(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let removed = {
            let mut state = self.state.write().await;
            let removed = state.connections.remove(&id)?;
            state.unlink(&removed);
            removed
        };

        removed.cancel.cancel();
        tracing::debug!(connection_id = %id, user_id = %removed.user_id(), "connection evicted");
        Some(removed)
    }

    /// 某用户的全部存活连接（多设备）
    pub async fn find_by_principal(&self, user_id: UserId) -> Vec<ConnectionHandle> {
        let state = self.state.read().await;
        state
            .by_principal
            .get(&user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.connections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 多个用户的连接，去重
    pub async fn find_by_principals(&self, user_ids: &[UserId]) -> Vec<ConnectionHandle> {
        let state = self.state.read().await;
        let unique: HashSet<&UserId> = user_ids.iter().collect();
        unique
            .into_iter()
            .filter_map(|user_id| state.by_principal.get(user_id))
            .flat_map(|ids| ids.iter())
            .filter_map(|id| state.connections.get(id).cloned())
            .collect()
    }

    /// 当前在线名单的拷贝，每个用户只出现一次
    pub async fn snapshot(&self) -> Vec<RosterEntry> {
        self.state.read().await.roster()
    }

    pub async fn connections(&self) -> Vec<ConnectionHandle> {
        let state = self.state.read().await;
        state.connections.values().cloned().collect()
    }

    /// 同一时刻的名单与全部连接，用于广播
    pub async fn snapshot_with_connections(&self) -> (Vec<RosterEntry>, Vec<ConnectionHandle>) {
        let state = self.state.read().await;
        let connections = state.connections.values().cloned().collect();
        (state.roster(), connections)
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.state.read().await.connections.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.connections.is_empty()
    }
}
