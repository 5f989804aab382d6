//! 存储协作方接口
//!
//! 设备注册、用户、会话和飞书应用凭据都由外部存储维护，推送引擎只通过
//! 这里定义的查询接口访问。`MemoryStore` 是进程内实现，供独立运行的
//! worker 与测试使用。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::events::Uid;

// ---------------------------------------------------------------------------
// 存储记录
// ---------------------------------------------------------------------------

/// 已注册设备
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDef {
    /// 推送服务分配的设备令牌
    pub device_id: String,
    /// 平台标识：`ios`、`web`，空串表示未知
    pub platform: String,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub lang: String,
}

impl DeviceDef {
    pub fn new(device_id: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            platform: platform.into(),
            last_seen: Utc::now(),
            lang: String::new(),
        }
    }
}

/// 用户记录
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRecord {
    pub uid: Uid,
    /// 公开资料，昵称位于 `fn` 字段
    #[serde(default)]
    pub public: Option<serde_json::Value>,
    /// 飞书 union_id
    #[serde(default)]
    pub union_id: String,
    /// 用户所属的飞书应用
    #[serde(default)]
    pub feishu_app_id: String,
}

/// 会话记录
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicRecord {
    pub name: String,
    #[serde(default)]
    pub public: Option<serde_json::Value>,
}

/// 飞书应用凭据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeishuApp {
    pub app_id: String,
    pub app_secret: String,
}

// ---------------------------------------------------------------------------
// 存储接口
// ---------------------------------------------------------------------------

/// 设备注册存储
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// 批量查询用户设备，返回按用户分组的设备及设备总数
    async fn get_all(&self, uids: &[Uid]) -> Result<(HashMap<Uid, Vec<DeviceDef>>, usize)>;

    /// 删除用户的某个设备注册，设备不存在时视为成功
    async fn delete(&self, uid: Uid, device_id: &str) -> Result<()>;
}

/// 用户存储
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, uid: Uid) -> Result<Option<UserRecord>>;

    async fn get_all(&self, uids: &[Uid]) -> Result<Vec<UserRecord>>;

    /// 用户订阅（具备 P 权限）的频道
    async fn get_channels(&self, uid: Uid) -> Result<Vec<String>>;
}

/// 会话存储
#[async_trait]
pub trait TopicStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<TopicRecord>>;
}

/// 飞书应用存储
#[async_trait]
pub trait FeishuAppStore: Send + Sync {
    async fn get_all(&self) -> Result<Vec<FeishuApp>>;
}

/// 推送引擎依赖的全部存储接口
#[derive(Clone)]
pub struct Stores {
    pub devices: Arc<dyn DeviceStore>,
    pub users: Arc<dyn UserStore>,
    pub topics: Arc<dyn TopicStore>,
    pub feishu_apps: Arc<dyn FeishuAppStore>,
}

impl Stores {
    /// 所有接口都由同一个内存存储提供
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            devices: store.clone(),
            users: store.clone(),
            topics: store.clone(),
            feishu_apps: store,
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// 进程内存储实现
#[derive(Default)]
pub struct MemoryStore {
    devices: RwLock<HashMap<Uid, Vec<DeviceDef>>>,
    users: RwLock<HashMap<Uid, UserRecord>>,
    channels: RwLock<HashMap<Uid, Vec<String>>>,
    topics: RwLock<HashMap<String, TopicRecord>>,
    feishu_apps: RwLock<Vec<FeishuApp>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册设备，同一设备令牌重复注册时覆盖原记录
    pub async fn add_device(&self, uid: Uid, device: DeviceDef) {
        let mut devices = self.devices.write().await;
        let list = devices.entry(uid).or_default();
        list.retain(|d| d.device_id != device.device_id);
        list.push(device);
    }

    pub async fn add_user(&self, user: UserRecord) {
        self.users.write().await.insert(user.uid, user);
    }

    pub async fn add_topic(&self, topic: TopicRecord) {
        self.topics.write().await.insert(topic.name.clone(), topic);
    }

    pub async fn add_channel(&self, uid: Uid, channel: impl Into<String>) {
        self.channels
            .write()
            .await
            .entry(uid)
            .or_default()
            .push(channel.into());
    }

    pub async fn add_feishu_app(&self, app: FeishuApp) {
        self.feishu_apps.write().await.push(app);
    }

    /// 当前注册的设备令牌
    pub async fn device_ids(&self, uid: Uid) -> Vec<String> {
        self.devices
            .read()
            .await
            .get(&uid)
            .map(|list| list.iter().map(|d| d.device_id.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn get_all(&self, uids: &[Uid]) -> Result<(HashMap<Uid, Vec<DeviceDef>>, usize)> {
        let devices = self.devices.read().await;
        let mut found = HashMap::new();
        let mut count = 0;
        for uid in uids {
            if let Some(list) = devices.get(uid)
                && !list.is_empty()
            {
                count += list.len();
                found.insert(*uid, list.clone());
            }
        }
        Ok((found, count))
    }

    async fn delete(&self, uid: Uid, device_id: &str) -> Result<()> {
        if let Some(list) = self.devices.write().await.get_mut(&uid) {
            list.retain(|d| d.device_id != device_id);
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get(&self, uid: Uid) -> Result<Option<UserRecord>> {
        Ok(self.users.read().await.get(&uid).cloned())
    }

    async fn get_all(&self, uids: &[Uid]) -> Result<Vec<UserRecord>> {
        let users = self.users.read().await;
        Ok(uids.iter().filter_map(|uid| users.get(uid).cloned()).collect())
    }

    async fn get_channels(&self, uid: Uid) -> Result<Vec<String>> {
        Ok(self
            .channels
            .read()
            .await
            .get(&uid)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl TopicStore for MemoryStore {
    async fn get(&self, name: &str) -> Result<Option<TopicRecord>> {
        Ok(self.topics.read().await.get(name).cloned())
    }
}

#[async_trait]
impl FeishuAppStore for MemoryStore {
    async fn get_all(&self) -> Result<Vec<FeishuApp>> {
        Ok(self.feishu_apps.read().await.clone())
    }
}
