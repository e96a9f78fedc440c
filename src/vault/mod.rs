pub mod auth;
pub mod client;
pub mod crypto;
pub mod db;
pub mod error;
pub mod record;
pub mod session;
pub mod syncinfo;
pub mod types;

// 重新导出认证相关函数
pub use auth::{login_async, register_async};

// 重新导出记录同步相关类型和函数
pub use error::{Result, VaultError};
pub use record::{Category, LocalRecord, RecordSyncer, RecordSyncerConfig, SyncListener};
