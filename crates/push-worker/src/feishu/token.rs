//! tenant_access_token 缓存
//!
//! 每个飞书应用缓存一个令牌。读取走共享锁；令牌在到期前 300 秒即视为过期，
//! 过期后在独占锁下刷新。刷新失败时保留旧条目并把错误返回给调用方。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use push_shared::error::{PushError, Result};
use push_shared::observability::metrics;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::client::FeishuApi;

/// 提前刷新的时间余量（秒）
pub const EXPIRY_SKEW_SECONDS: i64 = 300;

/// 缓存的令牌
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub tenant_access_token: String,
    /// 有效期（秒）
    pub expire: i64,
    /// 获取时间
    pub timestamp: DateTime<Utc>,
}

impl TokenInfo {
    /// 超出时间范围的 `expire` 一律视为过期
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let refresh_at = self
            .expire
            .checked_sub(EXPIRY_SKEW_SECONDS)
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| self.timestamp.checked_add_signed(lifetime));
        refresh_at.is_none_or(|at| now >= at)
    }
}

/// 按应用缓存 tenant_access_token
pub struct TenantTokenCache {
    api: Arc<dyn FeishuApi>,
    secrets: HashMap<String, String>,
    tokens: RwLock<HashMap<String, TokenInfo>>,
}

impl TenantTokenCache {
    pub fn new(api: Arc<dyn FeishuApi>, secrets: HashMap<String, String>) -> Self {
        Self {
            api,
            secrets,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// 是否配置了该应用的凭据
    pub fn knows(&self, app_id: &str) -> bool {
        self.secrets.contains_key(app_id)
    }

    pub fn app_count(&self) -> usize {
        self.secrets.len()
    }

    /// 取得可用令牌，过期时同步刷新
    pub async fn get(&self, app_id: &str) -> Result<String> {
        {
            let tokens = self.tokens.read().await;
            if let Some(info) = tokens.get(app_id)
                && !info.is_stale(Utc::now())
            {
                return Ok(info.tenant_access_token.clone());
            }
        }
        self.refresh(app_id).await
    }

    /// 刷新令牌
    ///
    /// 拿到独占锁后再检查一次，并发调用方只会触发一次实际刷新。
    pub async fn refresh(&self, app_id: &str) -> Result<String> {
        let secret = self
            .secrets
            .get(app_id)
            .ok_or_else(|| PushError::UnknownApp {
                app_id: app_id.to_string(),
            })?;

        let mut tokens = self.tokens.write().await;
        if let Some(info) = tokens.get(app_id)
            && !info.is_stale(Utc::now())
        {
            return Ok(info.tenant_access_token.clone());
        }

        match self.api.tenant_access_token(app_id, secret).await {
            Ok(grant) => {
                metrics::record_token_refresh(true);
                info!(app_id, expire = grant.expire, "飞书令牌已刷新");
                let token = grant.tenant_access_token.clone();
                tokens.insert(
                    app_id.to_string(),
                    TokenInfo {
                        tenant_access_token: grant.tenant_access_token,
                        expire: grant.expire,
                        timestamp: Utc::now(),
                    },
                );
                Ok(token)
            }
            Err(e) => {
                metrics::record_token_refresh(false);
                warn!(app_id, error = %e, "刷新飞书令牌失败");
                Err(e)
            }
        }
    }

    /// 预热全部应用的令牌，失败只记录日志
    pub async fn warm_up(&self) {
        for app_id in self.secrets.keys() {
            if let Err(e) = self.refresh(app_id).await {
                warn!(app_id = %app_id, error = %e, "预热飞书令牌失败");
            }
        }
    }

    /// 直接写入缓存条目
    pub async fn insert(&self, app_id: &str, info: TokenInfo) {
        self.tokens.write().await.insert(app_id.to_string(), info);
    }
}
