//! 附件处理
//!
//! 客户端以 data URL 形式上传附件，这里负责解码、命名，并交给具体的存储实现。

use async_trait::async_trait;
use data_encoding::BASE64;
use domain::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::ApplicationError;

/// 入站附件 `{name, data}`，`data` 为 data URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpload {
    pub name: String,
    pub data: String,
}

impl FileUpload {
    pub fn decode(&self) -> Result<Vec<u8>, ApplicationError> {
        decode_payload(&self.data)
    }
}

/// 附件存储，返回可检索的存储名
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    // 不覆盖已有文件；同名时改用带序号的名字
    async fn store(&self, upload: &FileUpload) -> Result<String, ApplicationError>;

    // 撤销一次 store，名字不存在时不报错
    async fn remove(&self, name: &str) -> Result<(), ApplicationError>;
}

/// 同名冲突时的最大重试次数
pub const MAX_NAME_ATTEMPTS: u32 = 16;

/// 时间戳加原扩展名，不保证密码学唯一
pub fn storage_name(original_name: &str, at: Timestamp) -> String {
    let extension = original_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    let extension = if extension.is_empty() {
        "bin".to_string()
    } else {
        extension
    };

    format!("{}.{}", at.timestamp_millis(), extension)
}

/// 第 n 次冲突后的候选名：`1700000000123.png` -> `1700000000123-n.png`
pub fn disambiguate(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}-{attempt}.{ext}"),
        None => format!("{name}-{attempt}"),
    }
}

/// 解码 data URL 中第一个逗号之后的 base64 负载
pub fn decode_payload(data: &str) -> Result<Vec<u8>, ApplicationError> {
    let encoded = data
        .split_once(',')
        .map(|(_, payload)| payload)
        .unwrap_or(data)
        .trim();

    BASE64
        .decode(encoded.as_bytes())
        .map_err(|err| ApplicationError::attachment(format!("invalid attachment encoding: {err}")))
}

/// 内存实现的附件存储（用于测试）
pub mod memory {
    use super::*;
    use crate::clock::{Clock, SystemClock};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    pub struct MemoryAttachmentStore {
        files: RwLock<HashMap<String, Vec<u8>>>,
        clock: Arc<dyn Clock>,
    }

    impl Default for MemoryAttachmentStore {
        fn default() -> Self {
            Self::new(Arc::new(SystemClock))
        }
    }

    impl MemoryAttachmentStore {
        pub fn new(clock: Arc<dyn Clock>) -> Self {
            Self {
                files: RwLock::new(HashMap::new()),
                clock,
            }
        }
    }

    #[async_trait]
    impl AttachmentStore for MemoryAttachmentStore {
        async fn store(&self, upload: &FileUpload) -> Result<String, ApplicationError> {
            let bytes = upload.decode()?;
            let base = storage_name(&upload.name, self.clock.now());

            let mut files = self.files.write().await;
            let name = (0..MAX_NAME_ATTEMPTS)
                .map(|attempt| disambiguate(&base, attempt))
                .find(|candidate| !files.contains_key(candidate))
                .ok_or_else(|| ApplicationError::attachment(format!("no free name for {base}")))?;
            files.insert(name.clone(), bytes);
            Ok(name)
        }

        async fn remove(&self, name: &str) -> Result<(), ApplicationError> {
            self.files.write().await.remove(name);
            Ok(())
        }
    }
}
