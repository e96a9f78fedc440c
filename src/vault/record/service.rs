//! 记录同步服务层
//!
//! 离线优先：所有读写先落本地库，写操作同时进入同步队列，
//! 推送由后台任务异步完成。字段加解密对上层透明：
//! 入库前加密，读出后解密，队列和网络上只有密文。
//!
//! 推送（flush_queue）按入队顺序逐条发送，单条最多重试 3 次（指数退避）；
//! 瞬时网络故障让条目回到 Pending 并中断本轮，留给下个周期；
//! 服务器业务拒绝则标记 Error，不再重试。
//! 拉取（reconcile）按同步游标做全量或增量对账，增量按 last-write-wins 合并。

use crate::vault::crypto::CryptoService;
use crate::vault::error::{Result, VaultError};
use crate::vault::record::api::RecordApi;
use crate::vault::record::dao::RecordDao;
use crate::vault::record::listener::{EmptySyncListener, SyncListener};
use crate::vault::record::models::{
    Category, LocalRecord, Operation, RecordSyncerConfig, SyncQueueEntry, SyncStatus,
};
use crate::vault::record::queue::SyncQueueDao;
use crate::vault::syncinfo::SyncCursor;
use crate::vault::types::RemoteRecord;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 单条队列条目的最大推送尝试次数
const PUSH_ATTEMPTS: u32 = 3;
/// 推送重试的退避基数（第 n 次失败后等待 BACKOFF_BASE_MS * 2^n 毫秒）
const BACKOFF_BASE_MS: u64 = 100;
/// HTTP 请求超时
const HTTP_TIMEOUT_SECS: u64 = 10;

/// 记录同步器
pub struct RecordSyncer {
    config: RecordSyncerConfig,
    /// 记录 API 客户端
    api: RecordApi,
    /// 记录 DAO
    dao: RecordDao,
    /// 同步队列 DAO
    queue: SyncQueueDao,
    /// 加密服务
    crypto: Arc<CryptoService>,
    /// 同步游标
    cursor: Arc<SyncCursor>,
    /// 同步监听器
    listener: Arc<dyn SyncListener>,
    /// 推送唤醒信号（容量 1，满了说明推送已在路上）
    push_tx: mpsc::Sender<()>,
    /// 推送互斥锁：信号任务、周期任务和手动同步共用，保证同一时刻只有一轮推送
    flush_lock: Mutex<()>,
}

impl RecordSyncer {
    /// 创建新的记录同步器（使用默认空监听器）
    pub fn new(
        config: RecordSyncerConfig,
        db: Pool<Sqlite>,
        crypto: Arc<CryptoService>,
        cursor: Arc<SyncCursor>,
        push_tx: mpsc::Sender<()>,
    ) -> Result<Self> {
        Self::with_listener_and_db(
            config,
            Arc::new(EmptySyncListener),
            db,
            crypto,
            cursor,
            push_tx,
        )
    }

    /// 创建新的记录同步器（带自定义监听器，使用共享连接池）
    pub fn with_listener_and_db(
        config: RecordSyncerConfig,
        listener: Arc<dyn SyncListener>,
        db: Pool<Sqlite>,
        crypto: Arc<CryptoService>,
        cursor: Arc<SyncCursor>,
        push_tx: mpsc::Sender<()>,
    ) -> Result<Self> {
        info!(
            "[RecordSync] 创建记录同步器，用户ID: {}, 同步开关: {}",
            config.user_id, config.sync_with_server
        );

        // 带认证拦截器的 HTTP 客户端（token 通过 default_headers 自动添加）
        let http_client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::HeaderName::from_static("token"),
                    reqwest::header::HeaderValue::from_str(&config.token)
                        .map_err(|_| VaultError::Validation("无效的 token".to_string()))?,
                );
                headers
            })
            .build()
            .map_err(|e| VaultError::Validation(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            api: RecordApi::new(http_client, config.api_base_url.clone(), config.user_id),
            dao: RecordDao::new(db.clone(), config.user_id),
            queue: SyncQueueDao::new(db, config.user_id),
            crypto,
            cursor,
            listener,
            push_tx,
            flush_lock: Mutex::new(()),
            config,
        })
    }

    // ------------------------------------------------------------------
    // 本地 CRUD（透明加解密 + 入队）
    // ------------------------------------------------------------------

    /// 新增一条记录，返回分配的记录 ID
    pub async fn add_record(
        &self,
        category: Category,
        fields: BTreeMap<String, String>,
    ) -> Result<String> {
        category.validate_fields(&fields)?;
        let encrypted = self.encrypt_fields(&fields)?;
        let id = Uuid::new_v4().to_string();

        self.dao.add(category, &id, &encrypted).await?;
        self.enqueue_and_signal(category, &id, Operation::Create, &encrypted)
            .await?;

        info!("[RecordSync] ✅ 新增记录 {}/{}", category, id);
        Ok(id)
    }

    /// 更新一条已有记录的字段
    pub async fn update_record(
        &self,
        category: Category,
        id: &str,
        fields: BTreeMap<String, String>,
    ) -> Result<()> {
        category.validate_fields(&fields)?;
        let encrypted = self.encrypt_fields(&fields)?;

        self.dao.update(category, id, &encrypted).await?;
        self.enqueue_and_signal(category, id, Operation::Update, &encrypted)
            .await?;

        info!("[RecordSync] ✅ 更新记录 {}/{}", category, id);
        Ok(())
    }

    /// 删除一条记录（本地打墓碑，删除操作入队）
    pub async fn delete_record(&self, category: Category, id: &str) -> Result<()> {
        self.dao.delete(category, id).await?;
        self.enqueue_and_signal(category, id, Operation::Delete, &BTreeMap::new())
            .await?;

        info!("[RecordSync] ✅ 删除记录 {}/{}", category, id);
        Ok(())
    }

    /// 按 ID 读取一条记录，字段已解密
    pub async fn get_record(&self, category: Category, id: &str) -> Result<LocalRecord> {
        let mut record = self.dao.get(category, id).await?;
        record.fields = self.decrypt_fields(&record.fields)?;
        Ok(record)
    }

    /// 读取该分类下所有记录，字段已解密
    pub async fn get_all_records(&self, category: Category) -> Result<Vec<LocalRecord>> {
        let mut records = self.dao.get_all(category, None).await?;
        for record in &mut records {
            record.fields = self.decrypt_fields(&record.fields)?;
        }
        Ok(records)
    }

    fn encrypt_fields(&self, fields: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>> {
        fields
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.crypto.encrypt_field(v)?)))
            .collect()
    }

    fn decrypt_fields(&self, fields: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>> {
        fields
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.crypto.decrypt_field(v)?)))
            .collect()
    }

    /// 变更入队并唤醒推送任务。信号通道容量为 1：
    /// try_send 失败意味着推送任务已经在路上，丢掉信号没有损失
    async fn enqueue_and_signal(
        &self,
        category: Category,
        record_id: &str,
        operation: Operation,
        encrypted: &BTreeMap<String, String>,
    ) -> Result<()> {
        let payload = serde_json::to_string(encrypted)?;
        self.queue
            .enqueue(category, record_id, operation, &payload)
            .await?;
        if self.config.sync_with_server {
            let _ = self.push_tx.try_send(());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // 推送
    // ------------------------------------------------------------------

    /// 按入队顺序推送所有待发送的队列条目
    ///
    /// 入口持有推送互斥锁：周期任务、信号任务和手动同步可能同时到达，
    /// 串行化后同一条目不会被两轮推送重复发送。
    /// 瞬时网络故障：条目回到 Pending 并中断本轮（后续条目不动，保持顺序），
    /// 返回的错误是瞬时的，调用方留给下个同步周期重试。
    /// 服务器业务拒绝：条目标记 Error 保留审计，继续推后面的条目。
    pub async fn flush_queue(&self) -> Result<()> {
        if !self.config.sync_with_server {
            return Ok(());
        }
        let _flush_guard = self.flush_lock.lock().await;

        let pending = self.queue.list_pending().await?;
        if pending.is_empty() {
            return Ok(());
        }
        info!("[RecordSync] 🔄 开始推送队列，共 {} 条", pending.len());

        for entry in pending {
            self.queue.mark_status(entry.id, SyncStatus::Progress).await?;

            match self.push_with_retry(&entry).await {
                Ok(()) => {
                    self.queue.mark_status(entry.id, SyncStatus::Done).await?;
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        "[RecordSync] ⚠️ 条目 #{} 推送失败（瞬时）: {}，回到队列等待下个周期",
                        entry.id, e
                    );
                    self.queue.mark_status(entry.id, SyncStatus::Pending).await?;
                    return Err(e);
                }
                Err(e) => {
                    error!(
                        "[RecordSync] ❌ 条目 #{} 被服务器拒绝: {}，标记 Error",
                        entry.id, e
                    );
                    self.queue.mark_status(entry.id, SyncStatus::Error).await?;
                }
            }
        }

        info!("[RecordSync] ✅ 队列推送完成");
        Ok(())
    }

    /// 推送单条队列条目，瞬时故障时指数退避重试
    async fn push_with_retry(&self, entry: &SyncQueueEntry) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.push_entry(entry).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt + 1 < PUSH_ATTEMPTS => {
                    let backoff = Duration::from_millis(BACKOFF_BASE_MS << attempt);
                    debug!(
                        "[RecordSync] 条目 #{} 第 {} 次尝试失败: {}，{:?} 后重试",
                        entry.id,
                        attempt + 1,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn push_entry(&self, entry: &SyncQueueEntry) -> Result<()> {
        match entry.operation {
            Operation::Create => {
                let fields: BTreeMap<String, String> = serde_json::from_str(&entry.payload)?;
                self.api
                    .add_record(entry.category, &entry.record_id, &fields)
                    .await
            }
            Operation::Update => {
                let fields: BTreeMap<String, String> = serde_json::from_str(&entry.payload)?;
                self.api
                    .update_record(entry.category, &entry.record_id, &fields)
                    .await
            }
            Operation::Delete => self.api.delete_record(entry.category, &entry.record_id).await,
        }
    }

    // ------------------------------------------------------------------
    // 拉取与对账
    // ------------------------------------------------------------------

    /// 一个完整的同步周期：先推后拉，回调监听器
    pub async fn sync_cycle(&self) {
        self.listener.on_sync_start().await;

        let result: Result<()> = async {
            self.flush_queue().await?;
            self.reconcile().await
        }
        .await;

        match result {
            Ok(()) => {
                self.listener.on_sync_finish().await;
            }
            Err(e) => {
                warn!("[RecordSync] ⚠️ 本轮同步未完成: {}", e);
                self.listener.on_sync_failed(e.to_string()).await;
            }
        }
    }

    /// 与服务器对账：游标缺失走全量（清空重建），否则按增量 LWW 合并。
    /// 所有分类都成功后才推进游标，游标取对账开始时刻，避免漏掉对账期间的变更
    pub async fn reconcile(&self) -> Result<()> {
        if !self.config.sync_with_server {
            return Ok(());
        }

        let since = self.cursor.load_and_update()?;
        let started_at = Utc::now();
        info!(
            "[RecordSync] 🔄 开始对账（{}），上次同步: {:?}",
            if since.is_some() { "增量" } else { "全量" },
            since
        );

        for category in Category::ALL {
            let remote = self.api.get_all_since(category, since).await?;

            let changed = match since {
                None => self.replace_local(category, &remote).await?,
                Some(_) => {
                    let mut changed = 0usize;
                    for row in &remote {
                        if self.merge_remote_row(category, row).await? {
                            changed += 1;
                        }
                    }
                    changed
                }
            };

            if changed > 0 {
                info!(
                    "[RecordSync]   {} 对账完成，本地变更 {} 条",
                    category, changed
                );
                self.listener
                    .on_records_changed(category.as_str().to_string())
                    .await;
            } else {
                debug!("[RecordSync]   {} 无变更", category);
            }
        }

        self.cursor.save(started_at)?;
        info!("[RecordSync] ✅ 对账完成，游标推进到 {}", started_at.to_rfc3339());
        Ok(())
    }

    /// 全量对账：服务器列表视为权威，清空本地后重建
    async fn replace_local(&self, category: Category, remote: &[RemoteRecord]) -> Result<usize> {
        self.dao.clear(category).await?;
        let mut count = 0usize;
        for row in remote {
            if row.deleted {
                continue;
            }
            self.dao
                .upsert_remote(category, &Self::to_local_record(row)?)
                .await?;
            count += 1;
        }
        Ok(count)
    }

    /// 增量对账合并单行：last-write-wins，时间戳相等时服务器赢。
    /// 返回本地是否发生了变化
    async fn merge_remote_row(&self, category: Category, remote: &RemoteRecord) -> Result<bool> {
        let remote_record = Self::to_local_record(remote)?;

        match self.dao.find(category, &remote.id).await? {
            None => {
                if remote.deleted {
                    // 本地从未见过的记录的删除通知，无事可做
                    return Ok(false);
                }
                debug!("[RecordSync]   插入服务器新记录 {}/{}", category, remote.id);
                self.dao.upsert_remote(category, &remote_record).await?;
                Ok(true)
            }
            Some(local) => {
                if local.fields == remote_record.fields && local.deleted == remote_record.deleted {
                    return Ok(false);
                }
                if remote_record.updated_at >= local.updated_at {
                    if remote_record.deleted {
                        debug!(
                            "[RecordSync]   服务器删除传播到本地 {}/{}",
                            category, remote.id
                        );
                        self.dao.hard_delete(category, &remote.id).await?;
                    } else {
                        debug!(
                            "[RecordSync]   服务器版本更新覆盖本地 {}/{}",
                            category, remote.id
                        );
                        self.dao.upsert_remote(category, &remote_record).await?;
                    }
                    Ok(true)
                } else {
                    // 本地更新更晚，本地赢；对应的队列条目会把本地版本推上去
                    debug!(
                        "[RecordSync]   本地版本更新，保留本地 {}/{}",
                        category, remote.id
                    );
                    Ok(false)
                }
            }
        }
    }

    fn to_local_record(remote: &RemoteRecord) -> Result<LocalRecord> {
        let updated_at = DateTime::parse_from_rfc3339(&remote.updated_at)
            .map_err(|e| VaultError::Storage(format!("服务器 updated_at 格式错误: {e}")))?
            .with_timezone(&Utc);
        Ok(LocalRecord {
            id: remote.id.clone(),
            fields: remote.fields.clone(),
            updated_at,
            deleted: remote.deleted,
        })
    }

    // ------------------------------------------------------------------
    // 文件
    // ------------------------------------------------------------------

    /// 加密并登记一个文件：密文以内容哈希命名落到本地文件仓库，
    /// 同时新增一条 FileRef 记录。同步开启时把密文上传到服务器。
    /// 返回 FileRef 记录 ID
    pub async fn sync_file(&self, source: &Path, meta_info: &str) -> Result<String> {
        fs::create_dir_all(&self.config.file_storage_path)?;
        let (enc_path, hash) = self
            .crypto
            .encrypt_file(source, &self.config.file_storage_path)?;

        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();

        let mut fields = BTreeMap::new();
        fields.insert("content_hash".to_string(), hash.clone());
        fields.insert("extension".to_string(), extension);
        fields.insert("meta_info".to_string(), meta_info.to_string());
        let record_id = self.add_record(Category::FileRef, fields).await?;

        if self.config.sync_with_server {
            let encrypted = fs::read(&enc_path)?;
            self.api.send_file(&hash, encrypted).await?;
        }

        info!("[RecordSync] ✅ 文件已加密登记，记录ID: {}", record_id);
        Ok(record_id)
    }

    /// 按 FileRef 记录取回并解密文件到 `dest`。
    /// 本地密文缺失且同步开启时，先从服务器下载
    pub async fn retrieve_file(&self, record_id: &str, dest: &Path) -> Result<()> {
        let record = self.get_record(Category::FileRef, record_id).await?;
        let hash = record
            .fields
            .get("content_hash")
            .ok_or_else(|| VaultError::Storage("FileRef 记录缺少 content_hash".to_string()))?
            .clone();

        let local = self.config.file_storage_path.join(&hash);
        if !local.exists() {
            if !self.config.sync_with_server {
                return Err(VaultError::NotFound);
            }
            info!("[RecordSync] 本地密文缺失，从服务器下载 {}", hash);
            let bytes = self.api.get_file(&hash).await?;
            fs::create_dir_all(&self.config.file_storage_path)?;
            fs::write(&local, bytes)?;
        }

        self.crypto.decrypt_file(&local, dest)?;
        info!("[RecordSync] ✅ 文件已解密到 {}", dest.display());
        Ok(())
    }

    /// 清空本地文件仓库（登出时调用）
    pub fn delete_all_local_files(&self) -> Result<()> {
        let dir: &PathBuf = &self.config.file_storage_path;
        if !dir.exists() {
            return Ok(());
        }
        let mut count = 0usize;
        for item in fs::read_dir(dir)? {
            let path = item?.path();
            if path.is_file() {
                fs::remove_file(&path)?;
                count += 1;
            }
        }
        info!("[RecordSync] 🗑️ 本地文件仓库已清空，删除 {} 个文件", count);
        Ok(())
    }
}
