//! 本地磁盘上的附件存储

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use application::attachments::{disambiguate, storage_name, MAX_NAME_ATTEMPTS};
use application::{ApplicationError, AttachmentStore, Clock, FileUpload};
use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

pub struct LocalAttachmentStore {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl LocalAttachmentStore {
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            clock,
        }
    }

    // create_new 保证不会覆盖同一毫秒内已写入的文件
    async fn create_unique(
        &self,
        base: &str,
    ) -> Result<(String, tokio::fs::File), ApplicationError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = disambiguate(base, attempt);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.dir.join(&name))
                .await
            {
                Ok(file) => return Ok((name, file)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(ApplicationError::attachment(format!("create {name}: {err}")))
                }
            }
        }
        Err(ApplicationError::attachment(format!("no free name for {base}")))
    }
}

#[async_trait]
impl AttachmentStore for LocalAttachmentStore {
    async fn store(&self, upload: &FileUpload) -> Result<String, ApplicationError> {
        let bytes = upload.decode()?;
        let base = storage_name(&upload.name, self.clock.now());

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| ApplicationError::attachment(format!("create upload dir: {err}")))?;

        let (name, mut file) = self.create_unique(&base).await?;
        let written = async {
            file.write_all(&bytes).await?;
            file.flush().await
        }
        .await;
        if let Err(err) = written {
            drop(file);
            self.remove(&name).await?;
            return Err(ApplicationError::attachment(format!("write {name}: {err}")));
        }

        tracing::debug!(file = %name, size = bytes.len(), "attachment stored");
        Ok(name)
    }

    async fn remove(&self, name: &str) -> Result<(), ApplicationError> {
        match tokio::fs::remove_file(self.dir.join(name)).await {
            Ok(()) => {
                tracing::debug!(file = %name, "attachment removed");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ApplicationError::attachment(format!("remove {name}: {err}"))),
        }
    }
}
