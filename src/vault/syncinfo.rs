//! 同步游标
//!
//! 记录上一次成功全量对账的时间点。拉取开始时读取，成功结束时推进。
//! 持久化为一个只含 RFC3339 时间文本的小文件，内存里保留一份 RwLock 副本。

use crate::vault::error::{Result, VaultError};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;

/// 上次同步时间游标
pub struct SyncCursor {
    path: PathBuf,
    last_sync: RwLock<Option<DateTime<Utc>>>,
}

impl SyncCursor {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            last_sync: RwLock::new(None),
        }
    }

    /// 内存中的当前游标值
    pub fn get(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.read().expect("sync cursor lock poisoned")
    }

    /// 从文件读取游标；文件缺失或为空返回 None（视为从未同步过）
    pub fn load(&self) -> Result<Option<DateTime<Utc>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let t = DateTime::parse_from_rfc3339(trimmed)
            .map_err(|e| VaultError::Storage(format!("同步游标格式错误: {e}")))?
            .with_timezone(&Utc);
        Ok(Some(t))
    }

    /// 从文件读取游标并刷新内存副本，返回读取到的值
    pub fn load_and_update(&self) -> Result<Option<DateTime<Utc>>> {
        let t = self.load()?;
        *self.last_sync.write().expect("sync cursor lock poisoned") = t;
        debug!("[SyncCursor] 已加载上次同步时间: {:?}", t);
        Ok(t)
    }

    /// 推进游标并落盘
    pub fn save(&self, t: DateTime<Utc>) -> Result<()> {
        fs::write(&self.path, t.to_rfc3339())?;
        *self.last_sync.write().expect("sync cursor lock poisoned") = Some(t);
        debug!("[SyncCursor] 已推进上次同步时间: {}", t.to_rfc3339());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_means_never_synced() {
        let dir = tempfile::tempdir().unwrap();
        let cursor = SyncCursor::new(dir.path().join("syncinfo.dat"));
        assert_eq!(cursor.load_and_update().unwrap(), None);
        assert_eq!(cursor.get(), None);
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syncinfo.dat");
        let cursor = SyncCursor::new(path.clone());

        let t = Utc::now();
        cursor.save(t).unwrap();
        assert_eq!(cursor.get().unwrap().timestamp(), t.timestamp());

        // 新实例从文件重新加载
        let cursor2 = SyncCursor::new(path);
        let loaded = cursor2.load_and_update().unwrap().unwrap();
        assert_eq!(loaded.timestamp(), t.timestamp());
    }

    #[test]
    fn corrupt_cursor_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syncinfo.dat");
        fs::write(&path, "yesterday-ish").unwrap();
        let cursor = SyncCursor::new(path);
        assert!(matches!(cursor.load(), Err(VaultError::Storage(_))));
    }
}
