//! 应用层实现。
//!
//! 这里提供会话核心的用例服务和在线状态清扫器，处理输入校验、
//! 按名称串行化，以及对存储适配器（注册表、消息日志）和时钟的抽象。

pub mod clock;
pub mod error;
pub mod memory;
pub mod name_lock;
pub mod repository;
pub mod services;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ApplicationError;
pub use memory::{InMemoryMessageLog, InMemoryParticipantRegistry};
pub use name_lock::NameLocks;
pub use repository::{MessageFilter, MessageLog, ParticipantRegistry};
pub use services::{
    EvictionOutcome, PostMessageRequest, SessionService, SessionServiceDependencies,
};
pub use sweeper::{PresenceSweeper, SweepReport, SweeperHandle, SweeperSettings};
