//! 会话存储
//!
//! 登录成功后把 (用户ID, token, 会话开始时间) 持久化到一个小文件里，
//! 三行换行分隔：第一行是加密后的用户ID，第二行 token，第三行 RFC3339 时间。
//! 文件缺失、行数不足、解密失败、时间解析失败都视为会话无效。

use crate::vault::crypto::CryptoService;
use crate::vault::error::{Result, VaultError};
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// 已登录会话
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: i64,
    pub token: String,
    pub session_start: DateTime<Utc>,
}

/// 会话存储：负责会话文件的读写与清理
pub struct SessionStore {
    path: PathBuf,
    crypto: Arc<CryptoService>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(path: PathBuf, crypto: Arc<CryptoService>, ttl: Duration) -> Self {
        Self { path, crypto, ttl }
    }

    /// 保存会话：用户ID 加密后与 token、开始时间一起写入
    pub fn save(&self, user_id: i64, token: &str, session_start: DateTime<Utc>) -> Result<()> {
        let encrypted_user_id = self.crypto.encrypt_field(&user_id.to_string())?;
        let content = format!(
            "{}\n{}\n{}",
            encrypted_user_id,
            token,
            session_start.to_rfc3339()
        );
        fs::write(&self.path, content)?;
        info!("[Session] 💾 会话已保存，用户ID: {}", user_id);
        Ok(())
    }

    /// 读取并解密会话文件
    pub fn load(&self) -> Result<Session> {
        if !self.path.exists() {
            return Err(VaultError::InvalidSession("会话文件不存在".to_string()));
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| VaultError::InvalidSession(format!("读取会话文件失败: {e}")))?;
        let lines: Vec<&str> = content.lines().collect();
        if lines.len() < 3 {
            return Err(VaultError::InvalidSession("会话文件格式非法".to_string()));
        }

        let user_id: i64 = self
            .crypto
            .decrypt_field(lines[0])
            .map_err(|e| VaultError::InvalidSession(format!("解密用户ID失败: {e}")))?
            .parse()
            .map_err(|_| VaultError::InvalidSession("用户ID不是整数".to_string()))?;

        let token = lines[1].to_string();

        let session_start = DateTime::parse_from_rfc3339(lines[2])
            .map_err(|e| VaultError::InvalidSession(format!("会话开始时间解析失败: {e}")))?
            .with_timezone(&Utc);

        debug!("[Session] 已加载会话，用户ID: {}", user_id);
        Ok(Session {
            user_id,
            token,
            session_start,
        })
    }

    /// 会话是否已超过 TTL
    pub fn is_expired(&self, session: &Session) -> bool {
        Utc::now() - session.session_start > self.ttl
    }

    /// 清除会话文件（登出或过期时调用）
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            info!("[Session] 🗑️ 会话文件已清除");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir, ttl_minutes: i64) -> SessionStore {
        SessionStore::new(
            dir.path().join("session.dat"),
            Arc::new(CryptoService::new("password")),
            Duration::minutes(ttl_minutes),
        )
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir, 300);
        let start = Utc::now();
        s.save(42, "jwt-token", start).unwrap();

        let session = s.load().unwrap();
        assert_eq!(session.user_id, 42);
        assert_eq!(session.token, "jwt-token");
        assert_eq!(session.session_start.timestamp(), start.timestamp());
        assert!(!s.is_expired(&session));
    }

    #[test]
    fn missing_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir, 300);
        assert!(matches!(s.load(), Err(VaultError::InvalidSession(_))));
    }

    #[test]
    fn truncated_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir, 300);
        fs::write(dir.path().join("session.dat"), "only-one-line").unwrap();
        assert!(matches!(s.load(), Err(VaultError::InvalidSession(_))));
    }

    #[test]
    fn expired_session_detected() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir, 1);
        s.save(7, "tok", Utc::now() - Duration::minutes(5)).unwrap();
        let session = s.load().unwrap();
        assert!(s.is_expired(&session));
    }

    #[test]
    fn clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir, 300);
        s.save(1, "tok", Utc::now()).unwrap();
        s.clear().unwrap();
        assert!(matches!(s.load(), Err(VaultError::InvalidSession(_))));
        // 再次清除不报错
        s.clear().unwrap();
    }
}
