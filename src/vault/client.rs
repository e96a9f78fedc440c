//! 保险库客户端核心实现模块
//!
//! 负责账户注册/登录、会话恢复，以及登录后的后台同步任务编排：
//! 一个推送任务（由写操作的信号唤醒，容量 1 的通道保证同一时刻只有一轮推送在跑），
//! 一个周期任务（定时先推后拉），都通过 watch 通道在登出时停止。

use crate::vault::auth;
use crate::vault::crypto::CryptoService;
use crate::vault::db::create_sqlite_pool_with_migration;
use crate::vault::error::{Result, VaultError};
use crate::vault::record::{
    Category, EmptySyncListener, LocalRecord, RecordSyncer, RecordSyncerConfig, SyncListener,
    UserDao,
};
use crate::vault::session::{Session, SessionStore};
use crate::vault::syncinfo::SyncCursor;
use chrono::Utc;
use sqlx::{Pool, Sqlite};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{error, info, warn};

/// 客户端配置
#[derive(Clone, Debug)]
pub struct VaultClientConfig {
    /// HTTP API 基础地址
    pub api_base_url: String,
    /// 本地 SQLite 数据库 URL
    ///
    /// 例如：`sqlite://vault.db?mode=rwc`
    pub db_url: String,
    /// 会话文件、同步游标、加密文件仓库所在目录
    pub data_dir: PathBuf,
    /// 字段加密口令
    pub passphrase: String,
    /// 是否与服务器同步
    pub sync_with_server: bool,
    /// 周期同步间隔
    pub sync_interval: Duration,
    /// 会话有效期（分钟）
    pub session_ttl_minutes: i64,
}

impl VaultClientConfig {
    /// 创建默认配置
    pub fn new(api_base_url: String, db_url: String, data_dir: PathBuf, passphrase: String) -> Self {
        Self {
            api_base_url,
            db_url,
            data_dir,
            passphrase,
            sync_with_server: true,
            sync_interval: Duration::from_secs(5 * 60),
            session_ttl_minutes: 300,
        }
    }
}

/// 保险库客户端
pub struct VaultClient {
    config: VaultClientConfig,
    crypto: Arc<CryptoService>,
    session_store: SessionStore,
    db: Pool<Sqlite>,
    // 登录后才存在
    syncer: Option<Arc<RecordSyncer>>,
    session: Option<Session>,
    shutdown_tx: Option<watch::Sender<bool>>,
    // 同步监听器（可由调用方注册，登录前设置）
    listener: Arc<dyn SyncListener>,
}

impl VaultClient {
    /// 创建新的客户端（尚未登录）
    pub async fn new(config: VaultClientConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        info!(
            "[Client] 创建保险库客户端，数据库: {}, 数据目录: {}",
            config.db_url,
            config.data_dir.display()
        );

        let db = create_sqlite_pool_with_migration(&config.db_url).await?;
        let crypto = Arc::new(CryptoService::new(&config.passphrase));
        let session_store = SessionStore::new(
            config.data_dir.join("session.dat"),
            crypto.clone(),
            chrono::Duration::minutes(config.session_ttl_minutes),
        );

        Ok(Self {
            config,
            crypto,
            session_store,
            db,
            syncer: None,
            session: None,
            shutdown_tx: None,
            listener: Arc::new(EmptySyncListener),
        })
    }

    /// 注册同步监听器（在登录之前调用）
    pub fn set_sync_listener(&mut self, listener: Arc<dyn SyncListener>) {
        self.listener = listener;
    }

    /// 当前会话
    pub fn current_session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// 注册新账户并开启会话
    ///
    /// 口令以 Argon2 哈希落在本地账户表，线上也只传这个哈希；
    /// 同步开启时先在服务器注册成功，再写本地账户行
    pub async fn register(&mut self, username: &str, password: &str) -> Result<()> {
        let users = UserDao::new(self.db.clone());
        if users.user_exists(username).await? {
            return Err(VaultError::Validation(format!("用户名 {username} 已注册")));
        }

        let hash = self.crypto.hash_password(password)?;

        let remote = if self.config.sync_with_server {
            let http = reqwest::Client::new();
            Some(auth::register_async(&http, &self.config.api_base_url, username, &hash).await?)
        } else {
            None
        };

        let local_id = users.add_user(username, &hash).await?;
        let (user_id, token) = match remote {
            Some(data) => (data.user_id, data.token),
            None => (local_id, String::new()),
        };

        info!("[Client] ✅ 注册成功，用户ID: {}", user_id);
        self.open_session(user_id, token)?;
        Ok(())
    }

    /// 登录并开启会话
    ///
    /// 本地有账户行：先比对本地哈希，再把存储的哈希发给服务器换 token。
    /// 本地没有账户行（新设备首次登录）：同步开启时把凭证交给服务器校验，
    /// 成功后补写本地账户行
    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let users = UserDao::new(self.db.clone());
        match users.get_password(username).await {
            Ok(hash) => {
                if !self.crypto.verify_password(&hash, password) {
                    return Err(VaultError::Auth("用户名或口令错误".to_string()));
                }

                let (user_id, token) = if self.config.sync_with_server {
                    let http = reqwest::Client::new();
                    let data =
                        auth::login_async(&http, &self.config.api_base_url, username, &hash)
                            .await?;
                    (data.user_id, data.token)
                } else {
                    (users.get_user_id(username).await?, String::new())
                };

                info!("[Client] ✅ 登录成功，用户ID: {}", user_id);
                self.open_session(user_id, token)?;
                Ok(())
            }
            Err(VaultError::NotFound) => {
                if !self.config.sync_with_server {
                    return Err(VaultError::Auth("用户名或口令错误".to_string()));
                }

                info!("[Client] 本地无账户 {}，交给服务器认证", username);
                let http = reqwest::Client::new();
                let data =
                    auth::login_async(&http, &self.config.api_base_url, username, password)
                        .await?;

                // 服务器认证通过后补写本地账户行，之后的登录走本地校验
                let hash = self.crypto.hash_password(password)?;
                users.add_user(username, &hash).await?;

                info!("[Client] ✅ 登录成功，用户ID: {}", data.user_id);
                self.open_session(data.user_id, data.token)?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// 从会话文件恢复登录态（会话过期则清除并要求重新登录）
    pub async fn resume(&mut self) -> Result<()> {
        let session = self.session_store.load()?;
        if self.session_store.is_expired(&session) {
            warn!("[Client] ⚠️ 会话已过期，需要重新登录");
            self.session_store.clear()?;
            return Err(VaultError::Auth("会话已过期".to_string()));
        }

        info!("[Client] ✅ 会话恢复成功，用户ID: {}", session.user_id);
        self.start_sync_tasks(session.user_id, session.token.clone())?;
        self.session = Some(session);
        Ok(())
    }

    /// 登出：停止后台任务，清除会话与本地文件仓库密文
    pub fn logout(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(syncer) = self.syncer.take() {
            syncer.delete_all_local_files()?;
        }
        self.session_store.clear()?;
        self.session = None;
        info!("[Client] 👋 已登出");
        Ok(())
    }

    fn open_session(&mut self, user_id: i64, token: String) -> Result<()> {
        let session_start = Utc::now();
        self.session_store.save(user_id, &token, session_start)?;
        self.start_sync_tasks(user_id, token.clone())?;
        self.session = Some(Session {
            user_id,
            token,
            session_start,
        });
        Ok(())
    }

    /// 同步游标文件按用户隔离：换账户登录时游标不能互相继承，
    /// 新用户必须从全量对账开始
    fn cursor_path(&self, user_id: i64) -> PathBuf {
        self.config.data_dir.join(format!("syncinfo-{user_id}.dat"))
    }

    /// 创建记录同步器并启动后台任务
    fn start_sync_tasks(&mut self, user_id: i64, token: String) -> Result<()> {
        let (push_tx, mut push_rx) = mpsc::channel::<()>(1);
        let cursor = Arc::new(SyncCursor::new(self.cursor_path(user_id)));

        let syncer_cfg = RecordSyncerConfig {
            user_id,
            api_base_url: self.config.api_base_url.clone(),
            token,
            file_storage_path: self.config.data_dir.join("files"),
            sync_with_server: self.config.sync_with_server,
        };
        let syncer = Arc::new(RecordSyncer::with_listener_and_db(
            syncer_cfg,
            self.listener.clone(),
            self.db.clone(),
            self.crypto.clone(),
            cursor,
            push_tx,
        )?);
        self.syncer = Some(syncer.clone());

        if !self.config.sync_with_server {
            info!("[Client] 同步已关闭，跳过后台任务");
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        // 推送任务：由写操作唤醒
        let push_syncer = syncer.clone();
        let mut push_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            info!("[Client] 🔄 启动推送任务");
            loop {
                tokio::select! {
                    signal = push_rx.recv() => {
                        if signal.is_none() {
                            break;
                        }
                        if let Err(e) = push_syncer.flush_queue().await {
                            error!("[Client] ❌ 推送失败: {e}");
                        }
                    }
                    _ = push_shutdown.changed() => break,
                }
            }
            info!("[Client] 推送任务退出");
        });

        // 周期任务：先推后拉
        let cycle_syncer = syncer;
        let sync_interval = self.config.sync_interval;
        let mut cycle_shutdown = shutdown_rx;
        tokio::spawn(async move {
            info!("[Client] 🔄 启动周期同步任务，间隔 {:?}", sync_interval);
            let mut ticker = interval(sync_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cycle_syncer.sync_cycle().await;
                    }
                    _ = cycle_shutdown.changed() => break,
                }
            }
            info!("[Client] 周期同步任务退出");
        });

        Ok(())
    }

    fn syncer(&self) -> Result<&Arc<RecordSyncer>> {
        self.syncer
            .as_ref()
            .ok_or_else(|| VaultError::Auth("未登录".to_string()))
    }

    // ===================== 登录后的记录操作 =====================

    /// 新增一条记录，返回记录 ID
    pub async fn add_record(
        &self,
        category: Category,
        fields: BTreeMap<String, String>,
    ) -> Result<String> {
        self.syncer()?.add_record(category, fields).await
    }

    /// 更新一条记录
    pub async fn update_record(
        &self,
        category: Category,
        id: &str,
        fields: BTreeMap<String, String>,
    ) -> Result<()> {
        self.syncer()?.update_record(category, id, fields).await
    }

    /// 删除一条记录
    pub async fn delete_record(&self, category: Category, id: &str) -> Result<()> {
        self.syncer()?.delete_record(category, id).await
    }

    /// 读取一条记录（字段已解密）
    pub async fn get_record(&self, category: Category, id: &str) -> Result<LocalRecord> {
        self.syncer()?.get_record(category, id).await
    }

    /// 读取分类下全部记录（字段已解密）
    pub async fn get_all_records(&self, category: Category) -> Result<Vec<LocalRecord>> {
        self.syncer()?.get_all_records(category).await
    }

    /// 加密并登记一个文件，返回 FileRef 记录 ID
    pub async fn sync_file(&self, source: &Path, meta_info: &str) -> Result<String> {
        self.syncer()?.sync_file(source, meta_info).await
    }

    /// 取回并解密一个文件
    pub async fn retrieve_file(&self, record_id: &str, dest: &Path) -> Result<()> {
        self.syncer()?.retrieve_file(record_id, dest).await
    }

    /// 手动触发一轮完整同步（先推后拉）
    pub async fn sync_now(&self) -> Result<()> {
        let syncer = self.syncer()?;
        syncer.flush_queue().await?;
        syncer.reconcile().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config(dir: &tempfile::TempDir) -> VaultClientConfig {
        let mut config = VaultClientConfig::new(
            "http://127.0.0.1:1".to_string(),
            format!("sqlite://{}?mode=rwc", dir.path().join("vault.db").display()),
            dir.path().to_path_buf(),
            "passphrase".to_string(),
        );
        config.sync_with_server = false;
        config
    }

    #[tokio::test]
    async fn register_login_logout_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = VaultClient::new(offline_config(&dir)).await.unwrap();

        client.register("joe", "hunter2").await.unwrap();
        let user_id = client.current_session().unwrap().user_id;

        // 重复注册被拒绝
        assert!(matches!(
            client.register("joe", "hunter2").await,
            Err(VaultError::Validation(_))
        ));

        client.logout().unwrap();
        assert!(client.current_session().is_none());

        // 口令错误
        assert!(matches!(
            client.login("joe", "wrong").await,
            Err(VaultError::Auth(_))
        ));
        // 未知用户
        assert!(matches!(
            client.login("jane", "hunter2").await,
            Err(VaultError::Auth(_))
        ));

        client.login("joe", "hunter2").await.unwrap();
        assert_eq!(client.current_session().unwrap().user_id, user_id);
    }

    #[tokio::test]
    async fn fresh_device_login_defers_to_server() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = offline_config(&dir);
        config.sync_with_server = true;

        // 本地没有账户行时不能直接判定认证失败：
        // 要把凭证交给服务器校验，服务器不可达表现为瞬时错误
        let mut client = VaultClient::new(config).await.unwrap();
        let err = client.login("joe", "hunter2").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn sync_cursor_is_scoped_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let client = VaultClient::new(offline_config(&dir)).await.unwrap();

        assert_ne!(client.cursor_path(1), client.cursor_path(2));

        // 用户 1 已有游标不影响用户 2：用户 2 仍然视为从未同步，走全量对账
        SyncCursor::new(client.cursor_path(1))
            .save(Utc::now())
            .unwrap();
        let other = SyncCursor::new(client.cursor_path(2));
        assert_eq!(other.load().unwrap(), None);
    }

    #[tokio::test]
    async fn resume_restores_session_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = VaultClient::new(offline_config(&dir)).await.unwrap();
        client.register("joe", "hunter2").await.unwrap();
        let user_id = client.current_session().unwrap().user_id;
        drop(client);

        let mut restored = VaultClient::new(offline_config(&dir)).await.unwrap();
        restored.resume().await.unwrap();
        assert_eq!(restored.current_session().unwrap().user_id, user_id);
    }

    #[tokio::test]
    async fn resume_without_session_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = VaultClient::new(offline_config(&dir)).await.unwrap();
        assert!(matches!(
            client.resume().await,
            Err(VaultError::InvalidSession(_))
        ));
    }

    #[tokio::test]
    async fn record_operations_require_login() {
        let dir = tempfile::tempdir().unwrap();
        let client = VaultClient::new(offline_config(&dir)).await.unwrap();
        assert!(matches!(
            client.get_all_records(Category::Note).await,
            Err(VaultError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn records_survive_relogin() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = VaultClient::new(offline_config(&dir)).await.unwrap();
        client.register("joe", "hunter2").await.unwrap();

        let mut fields = BTreeMap::new();
        fields.insert("data".to_string(), "remember this".to_string());
        fields.insert("meta_info".to_string(), "note".to_string());
        let id = client.add_record(Category::Note, fields).await.unwrap();

        client.logout().unwrap();
        client.login("joe", "hunter2").await.unwrap();

        let record = client.get_record(Category::Note, &id).await.unwrap();
        assert_eq!(record.fields["data"], "remember this");
    }
}
