//! 记录模块
//!
//! 本地加密记录的 CRUD、同步队列与服务器对账

pub mod api;
pub mod dao;
pub mod listener;
pub mod models;
pub mod queue;
pub mod service;

// 重新导出主要类型和函数
pub use api::RecordApi;
pub use dao::{RecordDao, UserDao};
pub use listener::{EmptySyncListener, SyncListener};
pub use models::{
    Category, LocalRecord, Operation, RecordSyncerConfig, SyncQueueEntry, SyncStatus,
};
pub use queue::SyncQueueDao;
pub use service::RecordSyncer;
