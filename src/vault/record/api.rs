//! 记录 HTTP API 客户端
//!
//! 负责所有记录相关的 HTTP 请求。路径携带分类、用户ID 和记录ID，
//! 请求体只包含密文字段，服务器永远看不到明文。

use crate::vault::error::{Result, VaultError};
use crate::vault::record::models::Category;
use crate::vault::types::{handle_http_response, RemoteRecord};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

/// 记录相关的 HTTP API 客户端
pub struct RecordApi {
    client: reqwest::Client,
    api_base_url: String,
    user_id: i64,
}

impl RecordApi {
    /// 创建新的记录 API 客户端
    ///
    /// `client` 应该已经在外部配置好认证拦截器
    pub fn new(client: reqwest::Client, api_base_url: String, user_id: i64) -> Self {
        Self {
            client,
            api_base_url,
            user_id,
        }
    }

    /// 向服务器推送一条新增记录
    pub async fn add_record(
        &self,
        category: Category,
        record_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<()> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!(
            "{}/addData/{}/{}/{}",
            self.api_base_url, category, self.user_id, record_id
        );

        info!("[RecordAPI] 📡 推送新增记录 {}/{}", category, record_id);
        debug!("[RecordAPI]   请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(fields)
            .send()
            .await?;

        handle_http_response::<serde_json::Value>(response, "新增记录").await?;
        Ok(())
    }

    /// 向服务器推送一条记录更新
    pub async fn update_record(
        &self,
        category: Category,
        record_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<()> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!(
            "{}/updateData/{}/{}/{}",
            self.api_base_url, category, self.user_id, record_id
        );

        info!("[RecordAPI] 📡 推送更新记录 {}/{}", category, record_id);
        debug!("[RecordAPI]   请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .put(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(fields)
            .send()
            .await?;

        handle_http_response::<serde_json::Value>(response, "更新记录").await?;
        Ok(())
    }

    /// 向服务器推送一条记录删除
    pub async fn delete_record(&self, category: Category, record_id: &str) -> Result<()> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!(
            "{}/deleteData/{}/{}/{}",
            self.api_base_url, category, self.user_id, record_id
        );

        info!("[RecordAPI] 📡 推送删除记录 {}/{}", category, record_id);
        debug!("[RecordAPI]   请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .delete(&url)
            .header("operationID", &operation_id)
            .send()
            .await?;

        handle_http_response::<serde_json::Value>(response, "删除记录").await?;
        Ok(())
    }

    /// 拉取服务器上该分类的记录
    ///
    /// `since` 为 None 表示全量拉取，否则只取该时间点之后变更过的记录
    pub async fn get_all_since(
        &self,
        category: Category,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteRecord>> {
        let operation_id = Uuid::new_v4().to_string();
        let mut url = format!(
            "{}/getAllData/{}/{}",
            self.api_base_url, category, self.user_id
        );
        if let Some(t) = since {
            url.push_str(&format!("?since={}", t.to_rfc3339()));
        }

        info!(
            "[RecordAPI] 📡 拉取 {} 记录（{}）",
            category,
            if since.is_some() { "增量" } else { "全量" }
        );
        debug!("[RecordAPI]   请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .get(&url)
            .header("operationID", &operation_id)
            .send()
            .await?;

        let api_resp = handle_http_response::<Vec<RemoteRecord>>(response, "拉取记录").await?;
        let records = api_resp.data.unwrap_or_default();
        info!(
            "[RecordAPI] ✅ 拉取 {} 记录完成，共 {} 条",
            category,
            records.len()
        );
        Ok(records)
    }

    /// 上传一个加密文件（内容寻址，以内容哈希标识）
    pub async fn send_file(&self, content_hash: &str, encrypted: Vec<u8>) -> Result<()> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!(
            "{}/sendFile/{}/{}",
            self.api_base_url, self.user_id, content_hash
        );

        info!(
            "[RecordAPI] 📡 上传加密文件 {}（{} 字节）",
            content_hash,
            encrypted.len()
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/octet-stream")
            .header("operationID", &operation_id)
            .body(encrypted)
            .send()
            .await?;

        handle_http_response::<serde_json::Value>(response, "上传文件").await?;
        Ok(())
    }

    /// 下载一个加密文件的原始字节（响应体不是 JSON 包装，是密文本身）
    pub async fn get_file(&self, content_hash: &str) -> Result<Vec<u8>> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!(
            "{}/getFile/{}/{}",
            self.api_base_url, self.user_id, content_hash
        );

        info!("[RecordAPI] 📡 下载加密文件 {}", content_hash);

        let response = self
            .client
            .get(&url)
            .header("operationID", &operation_id)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(VaultError::NotFound);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(VaultError::Auth(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VaultError::Server {
                code: status.as_u16() as i64,
                msg: body,
            });
        }

        let bytes = response.bytes().await?;
        info!(
            "[RecordAPI] ✅ 下载加密文件 {} 完成（{} 字节）",
            content_hash,
            bytes.len()
        );
        Ok(bytes.to_vec())
    }
}
