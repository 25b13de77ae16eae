//! 线上事件格式
//!
//! 契约是字段是否存在，而不是类型名：
//! - 入站：`{recipient, text?, file?}` 发送消息，`{recipient, typing}` 输入提示
//! - 出站：在线名单、消息投递、输入提示、编辑/删除通知、错误

use std::sync::Arc;

use domain::{Message, MessageId, RosterEntry, Timestamp, UserId};
use serde::{Deserialize, Serialize};

use crate::attachments::FileUpload;
use crate::error::ApplicationError;

/// 客户端经由长连接发来的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Send {
        recipient: UserId,
        text: Option<String>,
        file: Option<FileUpload>,
    },
    Typing {
        recipient: UserId,
        typing: bool,
    },
}

#[derive(Debug, Deserialize)]
struct RawClientEvent {
    recipient: Option<UserId>,
    text: Option<String>,
    file: Option<FileUpload>,
    typing: Option<bool>,
}

impl ClientEvent {
    /// 解析入站文本帧；没有接收者的事件被忽略，返回 `None`
    pub fn parse(frame: &str) -> Result<Option<Self>, ApplicationError> {
        let raw: RawClientEvent = serde_json::from_str(frame)
            .map_err(|err| ApplicationError::invalid_event(err.to_string()))?;

        let Some(recipient) = raw.recipient else {
            return Ok(None);
        };

        let event = match raw.typing {
            Some(typing) => ClientEvent::Typing { recipient, typing },
            None => ClientEvent::Send {
                recipient,
                text: raw.text,
                file: raw.file,
            },
        };
        Ok(Some(event))
    }
}

/// 对外暴露的消息结构
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: MessageId,
    pub sender: UserId,
    pub recipient: UserId,
    pub text: Option<String>,
    pub file: Option<String>,
    pub edited: bool,
    pub created_at: Timestamp,
}

impl From<&Message> for MessageDto {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            sender: message.sender_id,
            recipient: message.recipient_id,
            text: message.text.clone(),
            file: message.file.clone(),
            edited: message.edited,
            created_at: message.created_at,
        }
    }
}

/// 服务器推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ServerEvent {
    /// `{online: [{userId, username}]}`
    Roster { online: Vec<RosterEntry> },
    /// `{id, sender, recipient, text, file, ...}`
    Delivery(MessageDto),
    /// `{typing, sender}`
    Typing { typing: bool, sender: UserId },
    /// 带 `type` 字段的通知
    Notice(Notice),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notice {
    MessageEdited {
        message: MessageDto,
    },
    MessageDeleted {
        #[serde(rename = "messageId")]
        message_id: MessageId,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn roster(online: Vec<RosterEntry>) -> Self {
        ServerEvent::Roster { online }
    }

    pub fn delivery(message: &Message) -> Self {
        ServerEvent::Delivery(MessageDto::from(message))
    }

    pub fn message_edited(message: &Message) -> Self {
        ServerEvent::Notice(Notice::MessageEdited {
            message: MessageDto::from(message),
        })
    }

    pub fn message_deleted(message_id: MessageId) -> Self {
        ServerEvent::Notice(Notice::MessageDeleted { message_id })
    }

    pub fn error(err: &ApplicationError) -> Self {
        ServerEvent::Notice(Notice::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        })
    }

    /// 序列化一次，扇出时共享
    pub fn encode(&self) -> Result<Arc<str>, ApplicationError> {
        serde_json::to_string(self)
            .map(Arc::from)
            .map_err(|err| ApplicationError::Transport(format!("failed to encode event: {err}")))
    }
}

/// 写入单个连接的帧，由该连接的发送任务统一写出
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(Arc<str>),
    Ping,
    Pong(Vec<u8>),
}
