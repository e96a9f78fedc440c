//! 错误类型定义
//!
//! 库内统一的错误枚举。传输层错误（reqwest）一律归为 `NetworkUnavailable`，
//! 由同步引擎据此判断"留在队列里下个周期重试"；服务器业务拒绝（errCode != 0）
//! 归为 `Server`，视为永久失败。

use thiserror::Error;

/// 库内统一 Result 别名
pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// 没有匹配到任何记录
    #[error("记录不存在")]
    NotFound,

    /// 同一 (user_id, id) 匹配到多条记录，数据完整性被破坏
    #[error("数据完整性冲突：匹配到多条记录")]
    Conflict,

    /// 入参校验失败（缺少必要标识、字段不符合分类 schema 等）
    #[error("参数校验失败: {0}")]
    Validation(String),

    /// 瞬时网络故障（连接失败、超时等），可安全重试
    #[error("网络不可用: {0}")]
    NetworkUnavailable(String),

    /// 认证失败（口令错误、会话缺失或过期、服务器 401/403）
    #[error("认证失败: {0}")]
    Auth(String),

    /// 加密失败
    #[error("加密失败: {0}")]
    Encryption(String),

    /// 解密失败（密文损坏、编码非法或密钥不匹配）
    #[error("解密失败: {0}")]
    Decryption(String),

    /// 本地存储错误
    #[error("本地存储错误: {0}")]
    Storage(String),

    /// 会话文件缺失或格式非法
    #[error("会话无效: {0}")]
    InvalidSession(String),

    /// 服务器业务错误（HTTP 4xx/5xx 或响应体 errCode != 0）
    #[error("服务器错误 {code}: {msg}")]
    Server { code: i64, msg: String },

    /// 文件 IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// 是否属于可在下个同步周期安全重试的瞬时故障
    pub fn is_transient(&self) -> bool {
        matches!(self, VaultError::NetworkUnavailable(_))
    }
}

impl From<sqlx::Error> for VaultError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => VaultError::NotFound,
            other => VaultError::Storage(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for VaultError {
    fn from(e: reqwest::Error) -> Self {
        // 发送阶段的失败（连接、超时、DNS）全部视为瞬时网络故障，
        // 业务层的拒绝由响应体的 errCode 单独表达
        VaultError::NetworkUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Storage(format!("序列化失败: {e}"))
    }
}
