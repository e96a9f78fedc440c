pub mod vault;

// 重新导出常用类型和函数，方便外部使用
pub use vault::{
    client::{VaultClient, VaultClientConfig},
    crypto::CryptoService,
    error::{Result, VaultError},
    record::{Category, LocalRecord, RecordSyncer, SyncListener},
    session::{Session, SessionStore},
};
