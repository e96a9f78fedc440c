//! 同步事件监听器

use async_trait::async_trait;

/// 同步监听器 trait，上层（CLI/UI）实现以感知同步进度
#[async_trait]
pub trait SyncListener: Send + Sync {
    /// 一轮同步开始
    async fn on_sync_start(&self) {}

    /// 一轮同步成功结束
    async fn on_sync_finish(&self) {}

    /// 一轮同步失败
    async fn on_sync_failed(&self, _reason: String) {}

    /// 本地记录因对账发生变化（参数为分类标识）
    async fn on_records_changed(&self, _category: String) {}
}

/// 空实现，不关心同步事件时使用
pub struct EmptySyncListener;

#[async_trait]
impl SyncListener for EmptySyncListener {}
