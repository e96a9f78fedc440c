//! 认证 HTTP 接口：注册与登录
//!
//! 线上传输的凭证是本地账户表中存储的口令哈希，不是口令原文；
//! 注册和登录发送同一个哈希串，服务器按字符串比对。

use crate::vault::error::{Result, VaultError};
use crate::vault::types::{handle_http_response, LoginData};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
}

/// 向服务器注册新账户，成功后直接返回登录态
///
/// `password_hash` 是本地刚生成的口令哈希，注册后的登录必须复用同一个哈希
pub async fn register_async(
    client: &reqwest::Client,
    api_base_url: &str,
    username: &str,
    password_hash: &str,
) -> Result<LoginData> {
    let operation_id = Uuid::new_v4().to_string();
    let url = format!("{api_base_url}/register");

    info!("[Auth] 🔐 正在注册账户 {}...", username);
    debug!("[Auth]   URL: {}, 操作ID: {}", url, operation_id);

    let response = client
        .post(&url)
        .header("Content-Type", "application/json")
        .header("operationID", &operation_id)
        .json(&AuthRequest {
            username: username.to_string(),
            password: password_hash.to_string(),
        })
        .send()
        .await?;

    let api_resp = handle_http_response::<LoginData>(response, "注册").await?;
    let data = api_resp.data.ok_or(VaultError::Server {
        code: -1,
        msg: "响应中缺少 data 字段".to_string(),
    })?;

    info!("[Auth] ✅ 注册成功，用户ID: {}", data.user_id);
    Ok(data)
}

/// 向服务器登录，返回用户 ID 与 token
///
/// `password_hash` 通常取本地账户表里存储的哈希；新设备首次登录时
/// 本地没有账户行，调用方直接传用户输入的凭证，由服务器完成校验
pub async fn login_async(
    client: &reqwest::Client,
    api_base_url: &str,
    username: &str,
    password_hash: &str,
) -> Result<LoginData> {
    let operation_id = Uuid::new_v4().to_string();
    let url = format!("{api_base_url}/login");

    info!("[Auth] 🔐 正在登录 {}...", username);
    debug!("[Auth]   URL: {}, 操作ID: {}", url, operation_id);

    let response = client
        .post(&url)
        .header("Content-Type", "application/json")
        .header("operationID", &operation_id)
        .json(&AuthRequest {
            username: username.to_string(),
            password: password_hash.to_string(),
        })
        .send()
        .await?;

    let api_resp = handle_http_response::<LoginData>(response, "登录").await?;
    let data = api_resp.data.ok_or(VaultError::Server {
        code: -1,
        msg: "响应中缺少 data 字段".to_string(),
    })?;

    info!("[Auth] ✅ 登录成功，用户ID: {}", data.user_id);
    Ok(data)
}
