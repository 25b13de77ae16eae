//! 基础设施层实现。
//!
//! 提供 PostgreSQL 消息仓储与本地附件存储，实现应用层定义的接口。

pub mod attachments;
pub mod migrations;
pub mod repository;

pub use attachments::LocalAttachmentStore;
pub use migrations::MIGRATOR;
pub use repository::{create_pg_pool, PgMessageRepository};
