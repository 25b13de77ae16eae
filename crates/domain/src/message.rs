use crate::errors::DomainError;
use crate::value_objects::{MessageId, Timestamp, UserId};

/// 一对一私信。发送者与接收者创建后不可变，编辑只触及正文与编辑标记。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub text: Option<String>,
    /// 附件的存储名，可通过 `/uploads/{file}` 取回
    pub file: Option<String>,
    pub edited: bool,
    pub created_at: Timestamp,
}

impl Message {
    pub fn new(
        id: MessageId,
        sender_id: UserId,
        recipient_id: UserId,
        text: Option<String>,
        file: Option<String>,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let text = text.filter(|value| !value.is_empty());
        if text.is_none() && file.is_none() {
            return Err(DomainError::invalid_argument(
                "message",
                "either text or file is required",
            ));
        }

        Ok(Self {
            id,
            sender_id,
            recipient_id,
            text,
            file,
            edited: false,
            created_at,
        })
    }

    /// 只有原发送者可以编辑
    pub fn edit(&mut self, requester: UserId, new_text: impl Into<String>) -> Result<(), DomainError> {
        if requester != self.sender_id {
            return Err(DomainError::Forbidden);
        }
        self.text = Some(new_text.into());
        self.edited = true;
        Ok(())
    }

    /// 恰好是 a 与 b 之间的消息，不区分方向；a == b 时只匹配发给自己的消息
    pub fn is_between(&self, a: UserId, b: UserId) -> bool {
        (self.sender_id == a && self.recipient_id == b)
            || (self.sender_id == b && self.recipient_id == a)
    }

    /// 消息双方，发送者在前
    pub fn participants(&self) -> [UserId; 2] {
        [self.sender_id, self.recipient_id]
    }
}
