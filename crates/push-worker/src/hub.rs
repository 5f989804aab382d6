//! 推送中心
//!
//! 持有所有已就绪的适配器 worker，把回执和频道请求分发给每一个。
//! 初始化失败的适配器不会注册，进程继续运行。

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use push_shared::config::{AppConfig, DispatchConfig};
use push_shared::events::{ChannelReq, Receipt};
use push_shared::richtext::TextRenderer;
use push_shared::store::Stores;
use tracing::{error, info, warn};

use crate::apns::ApnsProvider;
use crate::dispatcher::PushWorker;
use crate::error::WorkerError;
use crate::feishu::FeishuProvider;
use crate::provider::PushProvider;

/// 适配器 worker 的对象安全接口
#[async_trait]
pub trait PushHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_ready(&self) -> bool;

    async fn push(&self, receipt: Receipt) -> Result<(), WorkerError>;

    async fn channel(&self, req: ChannelReq) -> Result<(), WorkerError>;

    async fn stop(&self);
}

#[async_trait]
impl<P: PushProvider> PushHandler for PushWorker<P> {
    fn name(&self) -> &'static str {
        PushWorker::name(self)
    }

    fn is_ready(&self) -> bool {
        PushWorker::is_ready(self)
    }

    async fn push(&self, receipt: Receipt) -> Result<(), WorkerError> {
        self.submit(receipt).await
    }

    async fn channel(&self, req: ChannelReq) -> Result<(), WorkerError> {
        self.submit_channel(req).await
    }

    async fn stop(&self) {
        PushWorker::stop(self).await
    }
}

/// 推送中心
#[derive(Default)]
pub struct PushHub {
    handlers: Vec<Arc<dyn PushHandler>>,
}

impl PushHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn PushHandler>) {
        info!(provider = handler.name(), "注册推送适配器");
        self.handlers.push(handler);
    }

    /// 按配置创建并启动已启用的适配器
    pub async fn from_config(
        config: &AppConfig,
        stores: Stores,
        renderer: Arc<dyn TextRenderer>,
    ) -> Self {
        let mut hub = Self::new();

        if config.apns.enabled {
            match ApnsProvider::new(
                config.apns.clone(),
                &config.dispatch,
                stores.clone(),
                renderer,
            ) {
                Ok(provider) => hub.start_worker(provider, &config.dispatch),
                Err(e) => error!(error = %e, "APNs 适配器初始化失败"),
            }
        } else {
            info!("APNs 推送未启用");
        }

        if config.feishu.enabled {
            match FeishuProvider::new(config.feishu.clone(), &config.dispatch, stores).await {
                Ok(provider) => hub.start_worker(provider, &config.dispatch),
                Err(e) => error!(error = %e, "飞书适配器初始化失败"),
            }
        } else {
            info!("飞书推送未启用");
        }

        hub
    }

    fn start_worker<P: PushProvider>(&mut self, provider: P, dispatch: &DispatchConfig) {
        let worker = PushWorker::new(provider, dispatch);
        match worker.start() {
            Ok(()) => self.register(Arc::new(worker)),
            Err(e) => error!(provider = worker.name(), error = %e, "启动推送 worker 失败"),
        }
    }

    /// 把回执分发给所有适配器，单个适配器失败不影响其他适配器
    pub async fn push(&self, receipt: &Receipt) {
        let results = join_all(self.handlers.iter().map(|handler| {
            let receipt = receipt.clone();
            async move { (handler.name(), handler.push(receipt).await) }
        }))
        .await;

        for (provider, result) in results {
            if let Err(e) = result {
                warn!(provider, error = %e, "提交回执失败");
            }
        }
    }

    pub async fn channel(&self, req: &ChannelReq) {
        let results = join_all(self.handlers.iter().map(|handler| {
            let req = req.clone();
            async move { (handler.name(), handler.channel(req).await) }
        }))
        .await;

        for (provider, result) in results {
            if let Err(e) = result {
                warn!(provider, error = %e, "提交频道请求失败");
            }
        }
    }

    /// 停止所有适配器
    pub async fn stop(&self) {
        join_all(self.handlers.iter().map(|handler| handler.stop())).await;
        info!(handlers = self.handlers.len(), "推送中心已停止");
    }

    /// 当前就绪的适配器
    pub fn ready_handlers(&self) -> Vec<&'static str> {
        self.handlers
            .iter()
            .filter(|handler| handler.is_ready())
            .map(|handler| handler.name())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
