//! 推送 worker
//!
//! 把聊天事件（回执）转换为各推送服务的通知：负载转换、接收者与设备解析、
//! 通知构建、并发发送以及响应分类。APNs 与飞书两个适配器实现同一个
//! `PushProvider` 接口，由 `PushWorker` 调度，`PushHub` 统一分发。

pub mod apns;
pub mod dispatcher;
pub mod error;
pub mod feishu;
pub mod hub;
pub mod payload;
pub mod provider;
pub mod templates;

pub use dispatcher::{PushWorker, WorkerState};
pub use error::WorkerError;
pub use hub::{PushHandler, PushHub};
pub use provider::{AbortReason, BatchSummary, DeliveryReport, Outcome, PushProvider};
