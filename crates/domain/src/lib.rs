//! 私信中继系统核心领域模型
//!
//! 包含用户身份、连接标识、消息实体等核心类型，以及相关的错误定义和业务规则。

pub mod errors;
pub mod message;
pub mod principal;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use message::*;
pub use principal::*;
pub use value_objects::*;
