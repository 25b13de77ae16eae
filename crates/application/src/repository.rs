use async_trait::async_trait;
use domain::{Message, MessageId, RepositoryError, UserId};

/// 消息持久化存储，每条记录的写操作各自原子
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    // 保存新消息并返回持久化后的记录
    async fn create(&self, message: Message) -> Result<Message, RepositoryError>;

    // 两个用户之间的全部消息，按创建时间升序
    async fn find_between(
        &self,
        participant_a: UserId,
        participant_b: UserId,
    ) -> Result<Vec<Message>, RepositoryError>;

    // 仅原发送者可改；记录不存在返回 NotFound，非发送者返回 Forbidden
    async fn update_text(
        &self,
        id: MessageId,
        requester: UserId,
        text: String,
    ) -> Result<Message, RepositoryError>;

    async fn delete(&self, id: MessageId) -> Result<Message, RepositoryError>;
}

/// 内存实现的消息存储（用于测试和无数据库运行）
pub mod memory {
    use super::*;
    use domain::DomainError;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct MemoryMessageRepository {
        messages: RwLock<Vec<Message>>,
    }

    impl MemoryMessageRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn len(&self) -> usize {
            self.messages.read().await.len()
        }

        pub async fn is_empty(&self) -> bool {
            self.messages.read().await.is_empty()
        }
    }

    #[async_trait]
    impl MessageRepository for MemoryMessageRepository {
        async fn create(&self, message: Message) -> Result<Message, RepositoryError> {
            let mut messages = self.messages.write().await;
            messages.push(message.clone());
            Ok(message)
        }

        async fn find_between(
            &self,
            participant_a: UserId,
            participant_b: UserId,
        ) -> Result<Vec<Message>, RepositoryError> {
            let messages = self.messages.read().await;
            let mut found: Vec<Message> = messages
                .iter()
                .filter(|message| message.is_between(participant_a, participant_b))
                .cloned()
                .collect();
            // 稳定排序，同一时间戳保持写入顺序
            found.sort_by_key(|message| message.created_at);
            Ok(found)
        }

        async fn update_text(
            &self,
            id: MessageId,
            requester: UserId,
            text: String,
        ) -> Result<Message, RepositoryError> {
            let mut messages = self.messages.write().await;
            let message = messages
                .iter_mut()
                .find(|message| message.id == id)
                .ok_or(RepositoryError::NotFound)?;

            message.edit(requester, text).map_err(|err| match err {
                DomainError::Forbidden => RepositoryError::Forbidden,
                other => RepositoryError::storage(other.to_string()),
            })?;
            Ok(message.clone())
        }

        async fn delete(&self, id: MessageId) -> Result<Message, RepositoryError> {
            let mut messages = self.messages.write().await;
            let index = messages
                .iter()
                .position(|message| message.id == id)
                .ok_or(RepositoryError::NotFound)?;
            Ok(messages.remove(index))
        }
    }

}
