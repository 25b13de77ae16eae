//! 中继中枢
//!
//! 显式持有注册表、在线广播与路由，交给每个连接任务共享使用。
//! 准入与驱逐之后都会同步重新广播名单；扇出失败的连接被视为隐式心跳失败而驱逐。

use std::fmt;
use std::sync::Arc;

use domain::{ConnectionId, Message, MessageId, Principal, UserId};

use crate::attachments::AttachmentStore;
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::events::ClientEvent;
use crate::presence::PresenceBroadcaster;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::repository::MessageRepository;
use crate::router::{MessageRouter, MessageRouterDependencies};

/// 连接被移出注册表的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// 对端关闭或读取失败
    Closed,
    /// 心跳超时
    LivenessTimeout,
    /// 向该连接写入失败
    TransportFailure,
    /// 服务关闭
    Shutdown,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            EvictionReason::Closed => "closed",
            EvictionReason::LivenessTimeout => "liveness_timeout",
            EvictionReason::TransportFailure => "transport_failure",
            EvictionReason::Shutdown => "shutdown",
        };
        f.write_str(reason)
    }
}

pub struct RelayHubDependencies {
    pub message_repository: Arc<dyn MessageRepository>,
    pub attachment_store: Arc<dyn AttachmentStore>,
    pub clock: Arc<dyn Clock>,
}

pub struct RelayHub {
    registry: Arc<ConnectionRegistry>,
    presence: PresenceBroadcaster,
    router: MessageRouter,
}

impl RelayHub {
    pub fn new(deps: RelayHubDependencies) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(MessageRouterDependencies {
            registry: registry.clone(),
            message_repository: deps.message_repository,
            attachment_store: deps.attachment_store,
            clock: deps.clock,
        });

        Self {
            presence: PresenceBroadcaster::new(registry.clone()),
            registry,
            router,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// 准入已认证的连接并广播新名单
    pub async fn join(&self, handle: ConnectionHandle) {
        let id = handle.id();
        let principal = handle.principal().clone();

        if self.registry.admit(handle).await.is_some() {
            tracing::warn!(connection_id = %id, "replaced stale registration for connection");
        }
        tracing::info!(
            connection_id = %id,
            user_id = %principal.user_id,
            username = %principal.username,
            "user connected"
        );

        let failed = self.presence.announce().await;
        self.evict_failed(failed).await;
    }

    /// 驱逐连接；只有真正移除时才会重新广播并返回 true
    pub async fn leave(&self, id: ConnectionId, reason: EvictionReason) -> bool {
        let Some(removed) = self.registry.evict(id).await else {
            return false;
        };

        tracing::info!(
            connection_id = %id,
            user_id = %removed.user_id(),
            reason = %reason,
            "connection evicted"
        );

        let failed = self.presence.announce().await;
        self.evict_failed(failed).await;
        true
    }

    /// 处理来自某个连接的流式事件；错误只返回给该连接
    pub async fn dispatch(
        &self,
        sender: &Principal,
        event: ClientEvent,
    ) -> Result<(), ApplicationError> {
        let outcome = self.router.route(sender, event).await?;
        self.evict_failed(outcome.failed).await;
        Ok(())
    }

    pub async fn edit_message(
        &self,
        requester: &Principal,
        message_id: MessageId,
        text: String,
    ) -> Result<Message, ApplicationError> {
        let (message, outcome) = self
            .router
            .edit_message(requester, message_id, text)
            .await?;
        self.evict_failed(outcome.failed).await;
        Ok(message)
    }

    pub async fn delete_message(
        &self,
        requester: &Principal,
        message_id: MessageId,
    ) -> Result<Message, ApplicationError> {
        let (message, outcome) = self.router.delete_message(requester, message_id).await?;
        self.evict_failed(outcome.failed).await;
        Ok(message)
    }

    pub async fn history(
        &self,
        requester: &Principal,
        peer: UserId,
    ) -> Result<Vec<Message>, ApplicationError> {
        self.router.history(requester, peer).await
    }

    /// 关闭时驱逐全部连接
    pub async fn shutdown(&self) {
        let connections = self.registry.connections().await;
        for handle in connections {
            self.registry.evict(handle.id()).await;
        }
        tracing::info!("all connections evicted for shutdown");
    }

    // 广播本身也可能写入失败，循环直到名单稳定
    async fn evict_failed(&self, mut pending: Vec<ConnectionId>) {
        while !pending.is_empty() {
            let mut changed = false;
            for id in pending.drain(..) {
                if let Some(removed) = self.registry.evict(id).await {
                    tracing::info!(
                        connection_id = %id,
                        user_id = %removed.user_id(),
                        reason = %EvictionReason::TransportFailure,
                        "connection evicted"
                    );
                    changed = true;
                }
            }
            if !changed {
                break;
            }
            pending = self.presence.announce().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachments::memory::MemoryAttachmentStore;
    use crate::clock::SystemClock;
    use crate::events::OutboundFrame;
    use crate::repository::MockMessageRepository;
    use domain::RepositoryError;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn connect(principal: &Principal) -> (ConnectionHandle, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(16);
        (
            ConnectionHandle::new(
                ConnectionId::generate(),
                principal.clone(),
                tx,
                CancellationToken::new(),
            ),
            rx,
        )
    }

    #[tokio::test]
    async fn persistence_failure_leaves_other_connections_untouched() {
        let mut repository = MockMessageRepository::new();
        repository
            .expect_create()
            .returning(|_| Err(RepositoryError::storage("connection refused")));

        let hub = RelayHub::new(RelayHubDependencies {
            message_repository: Arc::new(repository),
            attachment_store: Arc::new(MemoryAttachmentStore::default()),
            clock: Arc::new(SystemClock),
        });

        let alice = Principal::new(UserId::from(Uuid::new_v4()), "alice");
        let bob = Principal::new(UserId::from(Uuid::new_v4()), "bob");
        let (alice_conn, _alice_rx) = connect(&alice);
        let (bob_conn, mut bob_rx) = connect(&bob);
        hub.join(alice_conn).await;
        hub.join(bob_conn.clone()).await;
        while bob_rx.try_recv().is_ok() {}

        let result = hub
            .dispatch(
                &alice,
                ClientEvent::Send {
                    recipient: bob.user_id,
                    text: Some("hi".into()),
                    file: None,
                },
            )
            .await;

        assert!(matches!(result, Err(ApplicationError::Persistence(_))));
        assert!(bob_rx.try_recv().is_err());
        assert!(hub.registry().contains(bob_conn.id()).await);
        assert_eq!(hub.registry().len().await, 2);
    }

    #[test]
    fn eviction_reason_display() {
        assert_eq!(EvictionReason::LivenessTimeout.to_string(), "liveness_timeout");
    }
}
