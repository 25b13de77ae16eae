use sqlx::migrate::Migrator;

/// 嵌入工作区根目录下的迁移脚本
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");
