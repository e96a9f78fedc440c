//! 同步队列数据访问层
//!
//! 每一次本地变更都会以队列条目的形式落库，状态机：
//! Pending -> Progress -> Done（服务器确认）/ Error（服务器拒绝，审计保留）。
//! 瞬时网络故障时条目回到 Pending，由下一个同步周期继续重试。
//! 已完成/已拒绝的条目不删除，保留为审计痕迹。

use crate::vault::error::{Result, VaultError};
use crate::vault::record::models::{Category, Operation, SyncQueueEntry, SyncStatus};
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

/// 同步队列 DAO（基于 sqlx）
pub struct SyncQueueDao {
    db: Pool<Sqlite>,
    user_id: i64,
}

impl SyncQueueDao {
    pub fn new(db: Pool<Sqlite>, user_id: i64) -> Self {
        Self { db, user_id }
    }

    /// 入队一条待推送的本地变更，返回分配的队列 ID
    pub async fn enqueue(
        &self,
        category: Category,
        record_id: &str,
        operation: Operation,
        payload: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_queue (category, user_id, record_id, operation, payload, status)
            VALUES (?, ?, ?, ?, ?, 'Pending')
            "#,
        )
        .bind(category.as_str())
        .bind(self.user_id)
        .bind(record_id)
        .bind(operation.as_str())
        .bind(payload)
        .execute(&self.db)
        .await?;

        let id = result.last_insert_rowid();
        debug!(
            "[SyncQueue] 入队 #{} {} {}/{}",
            id,
            operation.as_str(),
            category,
            record_id
        );
        Ok(id)
    }

    /// 按入队顺序取出所有待推送的条目
    pub async fn list_pending(&self) -> Result<Vec<SyncQueueEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, category, user_id, record_id, operation, payload, status
            FROM sync_queue
            WHERE user_id = ? AND status = 'Pending'
            ORDER BY id
            "#,
        )
        .bind(self.user_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// 更新一条队列条目的状态
    pub async fn mark_status(&self, id: i64, status: SyncStatus) -> Result<()> {
        let result = sqlx::query("UPDATE sync_queue SET status = ? WHERE id = ? AND user_id = ?")
            .bind(status.as_str())
            .bind(id)
            .bind(self.user_id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(VaultError::NotFound);
        }
        debug!("[SyncQueue] 条目 #{} -> {}", id, status.as_str());
        Ok(())
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<SyncQueueEntry> {
        let category_raw: String = row.get("category");
        let operation_raw: String = row.get("operation");
        let status_raw: String = row.get("status");
        Ok(SyncQueueEntry {
            id: row.get("id"),
            category: Category::parse(&category_raw)
                .ok_or_else(|| VaultError::Storage(format!("未知分类: {category_raw}")))?,
            user_id: row.get("user_id"),
            record_id: row.get("record_id"),
            operation: Operation::parse(&operation_raw)
                .ok_or_else(|| VaultError::Storage(format!("未知操作: {operation_raw}")))?,
            payload: row.get("payload"),
            status: SyncStatus::parse(&status_raw)
                .ok_or_else(|| VaultError::Storage(format!("未知状态: {status_raw}")))?,
        })
    }
}
