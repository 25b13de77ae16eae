//! 消息路由
//!
//! 针对每个入站事件决定哪些存活连接收到什么负载，并对需要持久化的事件调用存储。
//! 路由本身不持有状态：接收者总是实时从注册表解析。

use std::sync::Arc;

use domain::{ConnectionId, DomainError, Message, MessageId, Principal, UserId};
use uuid::Uuid;

use crate::attachments::{AttachmentStore, FileUpload};
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::events::{ClientEvent, ServerEvent};
use crate::fanout::fan_out;
use crate::registry::ConnectionRegistry;
use crate::repository::MessageRepository;

pub struct MessageRouterDependencies {
    pub registry: Arc<ConnectionRegistry>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub attachment_store: Arc<dyn AttachmentStore>,
    pub clock: Arc<dyn Clock>,
}

/// 一次扇出的结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    pub delivered: usize,
    pub failed: Vec<ConnectionId>,
}

pub struct MessageRouter {
    deps: MessageRouterDependencies,
}

impl MessageRouter {
    pub fn new(deps: MessageRouterDependencies) -> Self {
        Self { deps }
    }

    pub async fn route(
        &self,
        sender: &Principal,
        event: ClientEvent,
    ) -> Result<RouteOutcome, ApplicationError> {
        match event {
            ClientEvent::Send {
                recipient,
                text,
                file,
            } => self.send(sender, recipient, text, file).await,
            ClientEvent::Typing { recipient, typing } => {
                self.typing(sender, recipient, typing).await
            }
        }
    }

    /// 持久化后投递给接收者的全部连接；发送者不会收到回显
    async fn send(
        &self,
        sender: &Principal,
        recipient: UserId,
        text: Option<String>,
        file: Option<FileUpload>,
    ) -> Result<RouteOutcome, ApplicationError> {
        let text = text.filter(|value| !value.is_empty());
        if text.is_none() && file.is_none() {
            tracing::debug!(sender = %sender.user_id, "dropping send without text or file");
            return Ok(RouteOutcome::default());
        }

        let file = match file {
            Some(upload) => Some(self.deps.attachment_store.store(&upload).await?),
            None => None,
        };

        let stored = match self.persist(sender, recipient, text, file.clone()).await {
            Ok(stored) => stored,
            Err(err) => {
                if let Some(name) = file {
                    self.discard_attachment(&name).await;
                }
                return Err(err);
            }
        };

        tracing::info!(
            message_id = %stored.id,
            sender = %stored.sender_id,
            recipient = %stored.recipient_id,
            has_file = stored.file.is_some(),
            "message created"
        );

        self.push_to(&[recipient], ServerEvent::delivery(&stored))
            .await
    }

    async fn persist(
        &self,
        sender: &Principal,
        recipient: UserId,
        text: Option<String>,
        file: Option<String>,
    ) -> Result<Message, ApplicationError> {
        let message = Message::new(
            MessageId::from(Uuid::new_v4()),
            sender.user_id,
            recipient,
            text,
            file,
            self.deps.clock.now(),
        )?;
        Ok(self.deps.message_repository.create(message).await?)
    }

    // 消息没有落库时附件不应残留
    async fn discard_attachment(&self, name: &str) {
        if let Err(err) = self.deps.attachment_store.remove(name).await {
            tracing::warn!(file = %name, error = %err, "failed to remove orphaned attachment");
        }
    }

    /// 输入提示不持久化，也不记录状态
    async fn typing(
        &self,
        sender: &Principal,
        recipient: UserId,
        typing: bool,
    ) -> Result<RouteOutcome, ApplicationError> {
        self.push_to(
            &[recipient],
            ServerEvent::Typing {
                typing,
                sender: sender.user_id,
            },
        )
        .await
    }

    /// 仅原发送者可编辑，成功后通知双方的所有连接
    pub async fn edit_message(
        &self,
        requester: &Principal,
        message_id: MessageId,
        text: String,
    ) -> Result<(Message, RouteOutcome), ApplicationError> {
        if text.trim().is_empty() {
            return Err(DomainError::invalid_argument("text", "cannot be empty").into());
        }

        let updated = self
            .deps
            .message_repository
            .update_text(message_id, requester.user_id, text)
            .await?;

        tracing::info!(message_id = %updated.id, editor = %requester.user_id, "message edited");

        let outcome = self
            .push_to(&updated.participants(), ServerEvent::message_edited(&updated))
            .await?;
        Ok((updated, outcome))
    }

    /// 删除后通知双方的所有连接，以便各自撤回本地消息
    pub async fn delete_message(
        &self,
        requester: &Principal,
        message_id: MessageId,
    ) -> Result<(Message, RouteOutcome), ApplicationError> {
        let deleted = self.deps.message_repository.delete(message_id).await?;

        tracing::info!(message_id = %deleted.id, requester = %requester.user_id, "message deleted");

        let outcome = self
            .push_to(&deleted.participants(), ServerEvent::message_deleted(deleted.id))
            .await?;
        Ok((deleted, outcome))
    }

    /// 两人之间的历史消息，按创建时间升序
    pub async fn history(
        &self,
        requester: &Principal,
        peer: UserId,
    ) -> Result<Vec<Message>, ApplicationError> {
        let messages = self
            .deps
            .message_repository
            .find_between(requester.user_id, peer)
            .await?;
        Ok(messages)
    }

    async fn push_to(
        &self,
        users: &[UserId],
        event: ServerEvent,
    ) -> Result<RouteOutcome, ApplicationError> {
        let targets = self.deps.registry.find_by_principals(users).await;
        if targets.is_empty() {
            return Ok(RouteOutcome::default());
        }

        let payload = event.encode()?;
        let failed = fan_out(&targets, &payload);
        Ok(RouteOutcome {
            delivered: targets.len() - failed.len(),
            failed,
        })
    }
}
