use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 认证后的用户身份。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub username: String,
}

impl Principal {
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }
}

/// 在线名单条目，由连接注册表派生，不持久化。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub user_id: UserId,
    pub username: String,
}

impl From<&Principal> for RosterEntry {
    fn from(principal: &Principal) -> Self {
        Self {
            user_id: principal.user_id,
            username: principal.username.clone(),
        }
    }
}
