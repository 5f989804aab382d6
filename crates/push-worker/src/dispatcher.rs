//! 推送调度循环
//!
//! 每个适配器一个 `PushWorker`：两条有界队列（回执、频道请求）加一个关闭信号。
//! 调度循环只负责接收和派发，每张回执在独立任务中发送，慢速的推送服务不会
//! 阻塞后续回执的接收。
//!
//! 生命周期：`Idle → Running → Stopping → Stopped`。停止时先停止接收，再在
//! `drain_timeout` 内等待进行中的任务完成，超时后取消剩余任务。
//! 在途批次只统计回执发送任务，频道记录任务单独跟踪。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use push_shared::config::DispatchConfig;
use push_shared::events::{ChannelReq, Receipt};
use push_shared::observability::metrics;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::provider::{PushProvider, deliver_receipt};

/// worker 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

struct Inbox {
    receipts: mpsc::Receiver<Receipt>,
    channels: mpsc::Receiver<ChannelReq>,
}

/// 单个适配器的调度 worker
pub struct PushWorker<P: PushProvider> {
    provider: Arc<P>,
    receipts: mpsc::Sender<Receipt>,
    channels: mpsc::Sender<ChannelReq>,
    /// 启动前持有接收端，启动时移交给调度循环
    inbox: Mutex<Option<Inbox>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    state: watch::Sender<WorkerState>,
    inflight: Arc<AtomicUsize>,
    drain_timeout: Duration,
}

impl<P: PushProvider> PushWorker<P> {
    pub fn new(provider: P, config: &DispatchConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (receipts, receipt_rx) = mpsc::channel(capacity);
        let (channels, channel_rx) = mpsc::channel(capacity);

        Self {
            provider: Arc::new(provider),
            receipts,
            channels,
            inbox: Mutex::new(Some(Inbox {
                receipts: receipt_rx,
                channels: channel_rx,
            })),
            handle: Mutex::new(None),
            shutdown: watch::Sender::new(false),
            state: watch::Sender::new(WorkerState::Idle),
            inflight: Arc::new(AtomicUsize::new(0)),
            drain_timeout: Duration::from_secs(config.drain_timeout_seconds),
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// 正在发送的回执数
    pub fn inflight_batches(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }

    /// 启动调度循环，需在 tokio 运行时内调用
    pub fn start(&self) -> Result<(), WorkerError> {
        let Some(inbox) = self.inbox.lock().take() else {
            return Err(WorkerError::AlreadyStarted {
                provider: self.name().to_string(),
            });
        };

        let handle = tokio::spawn(run_loop(
            self.provider.clone(),
            inbox,
            self.shutdown.subscribe(),
            self.inflight.clone(),
            self.drain_timeout,
        ));
        *self.handle.lock() = Some(handle);
        self.state.send_replace(WorkerState::Running);

        info!(provider = self.name(), "推送 worker 已启动");
        Ok(())
    }

    /// 提交回执，队列满时等待
    pub async fn submit(&self, receipt: Receipt) -> Result<(), WorkerError> {
        self.ensure_running()?;
        self.receipts
            .send(receipt)
            .await
            .map_err(|_| WorkerError::not_running(self.name()))
    }

    /// 提交频道订阅 / 退订请求
    pub async fn submit_channel(&self, req: ChannelReq) -> Result<(), WorkerError> {
        self.ensure_running()?;
        self.channels
            .send(req)
            .await
            .map_err(|_| WorkerError::not_running(self.name()))
    }

    /// 停止 worker，重复调用无副作用
    pub async fn stop(&self) {
        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            // 未启动过的 worker 直接结束，之后也不能再启动
            if self.inbox.lock().take().is_some() {
                self.state.send_replace(WorkerState::Stopped);
            }
            return;
        };

        self.state.send_replace(WorkerState::Stopping);
        self.shutdown.send_replace(true);
        if let Err(e) = handle.await {
            error!(provider = self.name(), error = %e, "调度循环异常退出");
        }
        self.state.send_replace(WorkerState::Stopped);
        info!(provider = self.name(), "推送 worker 已停止");
    }

    fn ensure_running(&self) -> Result<(), WorkerError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(WorkerError::not_running(self.name()))
        }
    }
}

async fn run_loop<P: PushProvider>(
    provider: Arc<P>,
    mut inbox: Inbox,
    mut shutdown: watch::Receiver<bool>,
    inflight: Arc<AtomicUsize>,
    drain_timeout: Duration,
) {
    let name = provider.name();
    let mut batches: JoinSet<()> = JoinSet::new();
    let mut bookkeeping: JoinSet<()> = JoinSet::new();
    let publish = |count: usize| {
        inflight.store(count, Ordering::Relaxed);
        metrics::set_inflight_batches(name, count);
    };

    loop {
        tokio::select! {
            // 偏向关闭信号，收到后不再接收新回执
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            Some(receipt) = inbox.receipts.recv() => {
                let provider = provider.clone();
                batches.spawn(async move {
                    deliver_receipt(provider.as_ref(), &receipt).await;
                });
                publish(batches.len());
            }
            Some(req) = inbox.channels.recv() => {
                let provider = provider.clone();
                bookkeeping.spawn(async move {
                    provider.on_channel(&req).await;
                });
            }
            Some(joined) = batches.join_next(), if !batches.is_empty() => {
                if let Err(e) = joined {
                    error!(provider = name, error = %e, "推送任务异常结束");
                }
                publish(batches.len());
            }
            Some(joined) = bookkeeping.join_next(), if !bookkeeping.is_empty() => {
                if let Err(e) = joined {
                    error!(provider = name, error = %e, "频道任务异常结束");
                }
            }
            else => break,
        }
    }

    let deadline = Instant::now() + drain_timeout;
    drain(name, "推送", &mut batches, deadline).await;
    drain(name, "频道", &mut bookkeeping, deadline).await;
    publish(0);
    debug!(provider = name, "调度循环退出");
}

/// 在截止时间前等待进行中的任务，超时后取消剩余任务
async fn drain(name: &str, kind: &str, tasks: &mut JoinSet<()>, deadline: Instant) {
    if tasks.is_empty() {
        return;
    }
    info!(provider = name, kind, pending = tasks.len(), "等待进行中的任务完成");

    let drained = tokio::time::timeout_at(deadline, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(provider = name, kind, remaining = tasks.len(), "等待超时，取消剩余任务");
        tasks.shutdown().await;
    }
}
