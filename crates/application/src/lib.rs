//! 应用层实现。
//!
//! 连接注册、心跳检测、消息路由和在线广播构成的中继核心，
//! 以及对外部协作者（消息存储、身份校验、附件存储）的抽象。

pub mod attachments;
pub mod auth;
pub mod clock;
pub mod error;
pub mod events;
pub mod fanout;
pub mod hub;
pub mod liveness;
pub mod presence;
pub mod registry;
pub mod repository;
pub mod router;

pub use attachments::{AttachmentStore, FileUpload};
pub use auth::{AuthError, PrincipalVerifier};
pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use events::{ClientEvent, MessageDto, Notice, OutboundFrame, ServerEvent};
pub use hub::{EvictionReason, RelayHub, RelayHubDependencies};
pub use liveness::{
    HeartbeatSettings, Liveness, LivenessExit, LivenessMonitor, LivenessState, PongSignal,
};
pub use presence::PresenceBroadcaster;
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use repository::MessageRepository;
pub use router::{MessageRouter, MessageRouterDependencies, RouteOutcome};
