//! 记录与同步队列的本地模型定义

use crate::vault::error::{Result, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 记录分类：决定数据形状与落库表名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// 登录凭据 {login, password, meta_info}
    Credential,
    /// 文本笔记 {data, meta_info}
    Note,
    /// 银行卡 {card_number, expiration_date, cvv, meta_info}
    Card,
    /// 文件引用 {content_hash, extension, meta_info}
    FileRef,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Credential,
        Category::Note,
        Category::Card,
        Category::FileRef,
    ];

    /// 本地落库表名
    pub fn table_name(&self) -> &'static str {
        match self {
            Category::Credential => "credentials",
            Category::Note => "notes",
            Category::Card => "cards",
            Category::FileRef => "file_refs",
        }
    }

    /// 该分类的字段 schema（列名即字段名）
    pub fn field_names(&self) -> &'static [&'static str] {
        match self {
            Category::Credential => &["login", "password", "meta_info"],
            Category::Note => &["data", "meta_info"],
            Category::Card => &["card_number", "expiration_date", "cvv", "meta_info"],
            Category::FileRef => &["content_hash", "extension", "meta_info"],
        }
    }

    /// 接口/队列/路径里使用的文本标识
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Credential => "credential",
            Category::Note => "note",
            Category::Card => "card",
            Category::FileRef => "file_ref",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        match s {
            "credential" => Some(Category::Credential),
            "note" => Some(Category::Note),
            "card" => Some(Category::Card),
            "file_ref" => Some(Category::FileRef),
            _ => None,
        }
    }

    /// 按分类 schema 校验字段表：每个 schema 字段都必须给出，不认识的键拒绝
    pub fn validate_fields(&self, fields: &BTreeMap<String, String>) -> Result<()> {
        for name in self.field_names() {
            if !fields.contains_key(*name) {
                return Err(VaultError::Validation(format!(
                    "分类 {} 缺少字段 {}",
                    self.as_str(),
                    name
                )));
            }
        }
        for key in fields.keys() {
            if !self.field_names().contains(&key.as_str()) {
                return Err(VaultError::Validation(format!(
                    "分类 {} 不包含字段 {}",
                    self.as_str(),
                    key
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 本地变更操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "Create",
            Operation::Update => "Update",
            Operation::Delete => "Delete",
        }
    }

    pub fn parse(s: &str) -> Option<Operation> {
        match s {
            "Create" => Some(Operation::Create),
            "Update" => Some(Operation::Update),
            "Delete" => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// 队列条目状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// 待发送
    Pending,
    /// 发送中
    Progress,
    /// 服务器已确认
    Done,
    /// 被服务器永久拒绝（审计保留，不再重试）
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "Pending",
            SyncStatus::Progress => "Progress",
            SyncStatus::Done => "Done",
            SyncStatus::Error => "Error",
        }
    }

    pub fn parse(s: &str) -> Option<SyncStatus> {
        match s {
            "Pending" => Some(SyncStatus::Pending),
            "Progress" => Some(SyncStatus::Progress),
            "Done" => Some(SyncStatus::Done),
            "Error" => Some(SyncStatus::Error),
            _ => None,
        }
    }
}

/// 同步队列条目：一次尚未被服务器确认的本地变更
#[derive(Debug, Clone)]
pub struct SyncQueueEntry {
    pub id: i64,
    pub category: Category,
    pub user_id: i64,
    pub record_id: String,
    pub operation: Operation,
    /// 加密字段快照的 JSON 序列化
    pub payload: String,
    pub status: SyncStatus,
}

/// 本地记录行（字段值为密文）
#[derive(Debug, Clone)]
pub struct LocalRecord {
    pub id: String,
    pub fields: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

/// 记录同步器配置
#[derive(Clone)]
pub struct RecordSyncerConfig {
    /// 用户 ID
    pub user_id: i64,
    /// API 基础 URL
    pub api_base_url: String,
    /// Token
    pub token: String,
    /// 本地加密文件存储目录
    pub file_storage_path: std::path::PathBuf,
    /// 是否与服务器同步
    pub sync_with_server: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_schema_validation() {
        let mut fields = BTreeMap::new();
        fields.insert("login".to_string(), "joe".to_string());
        fields.insert("password".to_string(), "secret".to_string());
        fields.insert("meta_info".to_string(), "bank".to_string());
        assert!(Category::Credential.validate_fields(&fields).is_ok());

        fields.remove("password");
        assert!(matches!(
            Category::Credential.validate_fields(&fields),
            Err(VaultError::Validation(_))
        ));

        fields.insert("password".to_string(), "secret".to_string());
        fields.insert("pin".to_string(), "1234".to_string());
        assert!(matches!(
            Category::Credential.validate_fields(&fields),
            Err(VaultError::Validation(_))
        ));
    }

    #[test]
    fn text_identifiers_roundtrip() {
        for c in Category::ALL {
            assert_eq!(Category::parse(c.as_str()), Some(c));
        }
        for op in [Operation::Create, Operation::Update, Operation::Delete] {
            assert_eq!(Operation::parse(op.as_str()), Some(op));
        }
        for st in [
            SyncStatus::Pending,
            SyncStatus::Progress,
            SyncStatus::Done,
            SyncStatus::Error,
        ] {
            assert_eq!(SyncStatus::parse(st.as_str()), Some(st));
        }
    }
}
