//! 记录数据访问层（DAO）
//!
//! 每个分类一张表，列结构由 `Category::field_names()` 决定，
//! SQL 按分类 schema 动态拼接（列名来自静态白名单，值全部走绑定参数）。
//! 本地删除是软删除：置 deleted 标记并推进 updated_at，供增量对账传播。

use crate::vault::error::{Result, VaultError};
use crate::vault::record::models::{Category, LocalRecord};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};
use std::collections::BTreeMap;
use tracing::debug;

/// 记录 DAO（基于 sqlx）
pub struct RecordDao {
    db: Pool<Sqlite>,
    user_id: i64,
}

impl RecordDao {
    /// 创建新的记录 DAO
    pub fn new(db: Pool<Sqlite>, user_id: i64) -> Self {
        Self { db, user_id }
    }

    fn select_columns(field_names: &[&str]) -> String {
        let mut cols = vec!["id", "updated_at", "deleted"];
        cols.extend_from_slice(field_names);
        cols.join(", ")
    }

    fn row_to_record(field_names: &[&str], row: &sqlx::sqlite::SqliteRow) -> Result<LocalRecord> {
        let updated_at_raw: String = row.get("updated_at");
        let updated_at = DateTime::parse_from_rfc3339(&updated_at_raw)
            .map_err(|e| VaultError::Storage(format!("updated_at 格式错误: {e}")))?
            .with_timezone(&Utc);

        let mut fields = BTreeMap::new();
        for name in field_names {
            fields.insert(name.to_string(), row.get::<String, _>(*name));
        }

        let deleted: i64 = row.get("deleted");
        Ok(LocalRecord {
            id: row.get("id"),
            fields,
            updated_at,
            deleted: deleted != 0,
        })
    }

    /// 新增一条记录（字段值应当已经是密文）
    pub async fn add(
        &self,
        category: Category,
        id: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<()> {
        category.validate_fields(fields)?;

        let cols = category.field_names();
        let placeholders = vec!["?"; cols.len() + 4].join(", ");
        let sql = format!(
            "INSERT INTO {} (user_id, id, {}, updated_at, deleted) VALUES ({})",
            category.table_name(),
            cols.join(", "),
            placeholders
        );

        let mut query = sqlx::query(&sql).bind(self.user_id).bind(id);
        for name in cols {
            query = query.bind(&fields[*name]);
        }
        query = query.bind(Utc::now().to_rfc3339()).bind(0i64);

        query.execute(&self.db).await?;
        debug!("[RecordDAO] 新增记录 {}/{}", category, id);
        Ok(())
    }

    /// 更新一条记录的字段并推进 updated_at
    ///
    /// 只作用于未删除的行：墓碑对上层等同于不存在，返回 `NotFound`
    pub async fn update(
        &self,
        category: Category,
        id: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<()> {
        category.validate_fields(fields)?;

        let cols = category.field_names();
        let set_clause = cols
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {}, updated_at = ? WHERE user_id = ? AND id = ? AND deleted = 0",
            category.table_name(),
            set_clause
        );

        let mut query = sqlx::query(&sql);
        for name in cols {
            query = query.bind(&fields[*name]);
        }
        let result = query
            .bind(Utc::now().to_rfc3339())
            .bind(self.user_id)
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(VaultError::NotFound);
        }
        debug!("[RecordDAO] 更新记录 {}/{}", category, id);
        Ok(())
    }

    /// 按 ID 获取一条未删除的记录
    ///
    /// 没有匹配返回 `NotFound`；匹配到多条说明主键完整性被破坏，返回 `Conflict`
    pub async fn get(&self, category: Category, id: &str) -> Result<LocalRecord> {
        let sql = format!(
            "SELECT {} FROM {} WHERE user_id = ? AND id = ? AND deleted = 0",
            Self::select_columns(category.field_names()),
            category.table_name()
        );
        let rows = sqlx::query(&sql)
            .bind(self.user_id)
            .bind(id)
            .fetch_all(&self.db)
            .await?;

        match rows.len() {
            0 => Err(VaultError::NotFound),
            1 => Self::row_to_record(category.field_names(), &rows[0]),
            _ => Err(VaultError::Conflict),
        }
    }

    /// 按 ID 查找记录（含软删除行），不存在返回 None。对账合并用
    pub async fn find(&self, category: Category, id: &str) -> Result<Option<LocalRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE user_id = ? AND id = ?",
            Self::select_columns(category.field_names()),
            category.table_name()
        );
        let row = sqlx::query(&sql)
            .bind(self.user_id)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.map(|r| Self::row_to_record(category.field_names(), &r))
            .transpose()
    }

    /// 获取该分类下所有未删除的记录
    ///
    /// `columns` 为 None 返回全部字段；指定时只查询并返回这些字段（列投影），
    /// 列名必须属于该分类的 schema，否则返回 `Validation`
    pub async fn get_all(
        &self,
        category: Category,
        columns: Option<&[&str]>,
    ) -> Result<Vec<LocalRecord>> {
        let field_names: Vec<&str> = match columns {
            None => category.field_names().to_vec(),
            Some(cols) => {
                for col in cols {
                    if !category.field_names().iter().any(|n| n == col) {
                        return Err(VaultError::Validation(format!(
                            "分类 {category} 没有列 {col}"
                        )));
                    }
                }
                cols.to_vec()
            }
        };

        let sql = format!(
            "SELECT {} FROM {} WHERE user_id = ? AND deleted = 0 ORDER BY id",
            Self::select_columns(&field_names),
            category.table_name()
        );
        let rows = sqlx::query(&sql)
            .bind(self.user_id)
            .fetch_all(&self.db)
            .await?;

        let records = rows
            .iter()
            .map(|r| Self::row_to_record(&field_names, r))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "[RecordDAO] 获取本地 {} 记录，共 {} 条",
            category,
            records.len()
        );
        Ok(records)
    }

    /// 软删除一条记录：置 deleted 标记并推进 updated_at
    pub async fn delete(&self, category: Category, id: &str) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET deleted = 1, updated_at = ? WHERE user_id = ? AND id = ? AND deleted = 0",
            category.table_name()
        );
        let result = sqlx::query(&sql)
            .bind(Utc::now().to_rfc3339())
            .bind(self.user_id)
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(VaultError::NotFound);
        }
        debug!("[RecordDAO] 删除记录 {}/{}", category, id);
        Ok(())
    }

    /// 用服务器下发的行覆盖本地（插入或整行替换），对账合并用
    pub async fn upsert_remote(&self, category: Category, record: &LocalRecord) -> Result<()> {
        category.validate_fields(&record.fields)?;

        let cols = category.field_names();
        let placeholders = vec!["?"; cols.len() + 4].join(", ");
        let update_clause = cols
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .chain([
                "updated_at = excluded.updated_at".to_string(),
                "deleted = excluded.deleted".to_string(),
            ])
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} (user_id, id, {}, updated_at, deleted) VALUES ({}) \
             ON CONFLICT(user_id, id) DO UPDATE SET {}",
            category.table_name(),
            cols.join(", "),
            placeholders,
            update_clause
        );

        let mut query = sqlx::query(&sql).bind(self.user_id).bind(&record.id);
        for name in cols {
            query = query.bind(&record.fields[*name]);
        }
        query = query
            .bind(record.updated_at.to_rfc3339())
            .bind(if record.deleted { 1i64 } else { 0i64 });

        query.execute(&self.db).await?;
        Ok(())
    }

    /// 物理删除一条记录（服务器删除传播到本地时使用）
    pub async fn hard_delete(&self, category: Category, id: &str) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE user_id = ? AND id = ?",
            category.table_name()
        );
        sqlx::query(&sql)
            .bind(self.user_id)
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// 清空该用户在此分类下的全部本地数据（全量对账前使用）
    pub async fn clear(&self, category: Category) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE user_id = ?", category.table_name());
        let result = sqlx::query(&sql)
            .bind(self.user_id)
            .execute(&self.db)
            .await?;
        debug!(
            "[RecordDAO] 清空 {} 本地数据，删除 {} 行",
            category,
            result.rows_affected()
        );
        Ok(())
    }
}

/// 用户 DAO：本地账户表
pub struct UserDao {
    db: Pool<Sqlite>,
}

impl UserDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 用户名是否已注册
    pub async fn user_exists(&self, username: &str) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.db)
            .await?;
        Ok(row.get::<i64, _>("cnt") > 0)
    }

    /// 新增本地用户，返回分配的用户 ID
    pub async fn add_user(&self, username: &str, password_hash: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO users (username, password) VALUES (?, ?)")
            .bind(username)
            .bind(password_hash)
            .execute(&self.db)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// 取用户的口令哈希，用户不存在返回 NotFound
    pub async fn get_password(&self, username: &str) -> Result<String> {
        let row = sqlx::query("SELECT password FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.db)
            .await?;
        row.map(|r| r.get("password")).ok_or(VaultError::NotFound)
    }

    /// 取用户 ID，用户不存在返回 NotFound
    pub async fn get_user_id(&self, username: &str) -> Result<i64> {
        let row = sqlx::query("SELECT id FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.db)
            .await?;
        row.map(|r| r.get("id")).ok_or(VaultError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::db::create_sqlite_pool_with_migration;

    async fn test_pool() -> (Pool<Sqlite>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("vault.db").display());
        let pool = create_sqlite_pool_with_migration(&url).await.unwrap();
        (pool, dir)
    }

    fn credential_fields(login: &str, meta: &str) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("login".to_string(), login.to_string());
        fields.insert("password".to_string(), "enc-pass".to_string());
        fields.insert("meta_info".to_string(), meta.to_string());
        fields
    }

    #[tokio::test]
    async fn add_then_get_roundtrip() {
        let (pool, _dir) = test_pool().await;
        let dao = RecordDao::new(pool, 1);

        dao.add(Category::Credential, "rec-1", &credential_fields("joe", "bank"))
            .await
            .unwrap();

        let rec = dao.get(Category::Credential, "rec-1").await.unwrap();
        assert_eq!(rec.fields["login"], "joe");
        assert_eq!(rec.fields["meta_info"], "bank");
        assert!(!rec.deleted);
    }

    #[tokio::test]
    async fn records_are_scoped_per_user() {
        let (pool, _dir) = test_pool().await;
        let dao_a = RecordDao::new(pool.clone(), 1);
        let dao_b = RecordDao::new(pool, 2);

        dao_a
            .add(Category::Credential, "rec-1", &credential_fields("joe", "bank"))
            .await
            .unwrap();

        assert!(matches!(
            dao_b.get(Category::Credential, "rec-1").await,
            Err(VaultError::NotFound)
        ));
        assert!(dao_b
            .get_all(Category::Credential, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn update_bumps_timestamp_and_requires_existing_row() {
        let (pool, _dir) = test_pool().await;
        let dao = RecordDao::new(pool, 1);

        dao.add(Category::Credential, "rec-1", &credential_fields("joe", "bank"))
            .await
            .unwrap();
        let before = dao.get(Category::Credential, "rec-1").await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        dao.update(Category::Credential, "rec-1", &credential_fields("joe", "mail"))
            .await
            .unwrap();
        let after = dao.get(Category::Credential, "rec-1").await.unwrap();
        assert_eq!(after.fields["meta_info"], "mail");
        assert!(after.updated_at >= before.updated_at);

        assert!(matches!(
            dao.update(Category::Credential, "missing", &credential_fields("x", "y"))
                .await,
            Err(VaultError::NotFound)
        ));
    }

    #[tokio::test]
    async fn delete_is_a_tombstone() {
        let (pool, _dir) = test_pool().await;
        let dao = RecordDao::new(pool, 1);

        dao.add(Category::Note, "n-1", &{
            let mut f = BTreeMap::new();
            f.insert("data".to_string(), "enc".to_string());
            f.insert("meta_info".to_string(), "todo".to_string());
            f
        })
        .await
        .unwrap();

        dao.delete(Category::Note, "n-1").await.unwrap();
        assert!(matches!(
            dao.get(Category::Note, "n-1").await,
            Err(VaultError::NotFound)
        ));
        // 墓碑仍然可见，供对账合并比较时间戳
        let tombstone = dao.find(Category::Note, "n-1").await.unwrap().unwrap();
        assert!(tombstone.deleted);

        assert!(matches!(
            dao.delete(Category::Note, "n-1").await,
            Err(VaultError::NotFound)
        ));
        assert!(matches!(
            dao.delete(Category::Note, "missing").await,
            Err(VaultError::NotFound)
        ));
    }

    #[tokio::test]
    async fn add_rejects_fields_outside_schema() {
        let (pool, _dir) = test_pool().await;
        let dao = RecordDao::new(pool, 1);

        let mut fields = credential_fields("joe", "bank");
        fields.insert("pin".to_string(), "1234".to_string());
        assert!(matches!(
            dao.add(Category::Credential, "rec-1", &fields).await,
            Err(VaultError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn upsert_and_clear() {
        let (pool, _dir) = test_pool().await;
        let dao = RecordDao::new(pool, 1);

        let rec = LocalRecord {
            id: "rec-1".to_string(),
            fields: credential_fields("joe", "bank"),
            updated_at: Utc::now(),
            deleted: false,
        };
        dao.upsert_remote(Category::Credential, &rec).await.unwrap();
        // 同一行再覆盖一次
        let mut rec2 = rec.clone();
        rec2.fields.insert("meta_info".to_string(), "mail".to_string());
        dao.upsert_remote(Category::Credential, &rec2).await.unwrap();

        let got = dao.get(Category::Credential, "rec-1").await.unwrap();
        assert_eq!(got.fields["meta_info"], "mail");

        dao.clear(Category::Credential).await.unwrap();
        assert!(dao
            .get_all(Category::Credential, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn get_all_supports_column_projection() {
        let (pool, _dir) = test_pool().await;
        let dao = RecordDao::new(pool, 1);

        dao.add(Category::Credential, "rec-1", &credential_fields("joe", "bank"))
            .await
            .unwrap();

        let projected = dao
            .get_all(Category::Credential, Some(&["login", "meta_info"]))
            .await
            .unwrap();
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].fields["login"], "joe");
        assert_eq!(projected[0].fields["meta_info"], "bank");
        assert!(!projected[0].fields.contains_key("password"));

        // schema 之外的列名被拒绝
        assert!(matches!(
            dao.get_all(Category::Credential, Some(&["pin"])).await,
            Err(VaultError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn update_does_not_resurrect_tombstone() {
        let (pool, _dir) = test_pool().await;
        let dao = RecordDao::new(pool, 1);

        dao.add(Category::Credential, "rec-1", &credential_fields("joe", "bank"))
            .await
            .unwrap();
        dao.delete(Category::Credential, "rec-1").await.unwrap();

        assert!(matches!(
            dao.update(Category::Credential, "rec-1", &credential_fields("joe", "mail"))
                .await,
            Err(VaultError::NotFound)
        ));
        // 墓碑原样保留，没有被更新复活
        let tombstone = dao.find(Category::Credential, "rec-1").await.unwrap().unwrap();
        assert!(tombstone.deleted);
        assert!(matches!(
            dao.get(Category::Credential, "rec-1").await,
            Err(VaultError::NotFound)
        ));
    }

    #[tokio::test]
    async fn user_dao_lifecycle() {
        let (pool, _dir) = test_pool().await;
        let dao = UserDao::new(pool);

        assert!(!dao.user_exists("joe").await.unwrap());
        let id = dao.add_user("joe", "argon2-hash").await.unwrap();
        assert!(id > 0);
        assert!(dao.user_exists("joe").await.unwrap());
        assert_eq!(dao.get_password("joe").await.unwrap(), "argon2-hash");
        assert_eq!(dao.get_user_id("joe").await.unwrap(), id);
        assert!(matches!(
            dao.get_user_id("jane").await,
            Err(VaultError::NotFound)
        ));
    }
}
