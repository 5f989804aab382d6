//! 共享库
//!
//! 包含推送链路共用的事件模型、配置、错误处理、存储接口、富文本渲染与可观测性基础设施。

pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod richtext;
pub mod store;
pub mod test_utils;
