//! 公共 wire 类型与 HTTP 响应处理

use crate::vault::error::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 统一的 API 响应包装结构体（包含 errCode、errMsg、data）
/// data 字段可能为 null 或缺失，因此使用 Option<T>
/// serde 会自动将缺失或 null 的字段反序列化为 None
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(rename = "errCode")]
    pub err_code: i64,
    #[serde(rename = "errMsg")]
    pub err_msg: String,
    pub data: Option<T>,
}

/// 服务器下发的记录行：`id` / `updated_at` / `deleted` 加上该分类的加密字段
///
/// 字段值永远是密文，引擎合并时原样落库，不做解密
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    pub updated_at: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

/// 登录响应数据
#[derive(Debug, Deserialize)]
pub struct LoginData {
    #[serde(rename = "userID")]
    pub user_id: i64,
    pub token: String,
}

/// 通用 HTTP 响应处理函数：直接反序列化为统一的响应结构体
///
/// 401/403 归为认证失败，其余非 2xx 状态与 errCode != 0 归为服务器业务错误；
/// 读取 body 阶段的传输错误归为网络不可用。所有 API 都可以共用此方法
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> Result<ApiResponse<T>> {
    use tracing::{debug, error};

    let status = response.status();

    // 读取 body bytes（只能读取一次）
    let body_bytes = response.bytes().await?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[HTTP] {}响应 Body: {}", operation_name, body_str);

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        error!("[HTTP] {}认证失败，HTTP状态: {}", operation_name, status);
        return Err(VaultError::Auth(format!("HTTP {status}: {body_str}")));
    }

    if !status.is_success() {
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(VaultError::Server {
            code: status.as_u16() as i64,
            msg: body_str.into_owned(),
        });
    }
    debug!("[HTTP] {}请求成功，HTTP状态: {}", operation_name, status);

    // 从 bytes 反序列化（因为 body 已经被消费了）
    let api_resp: ApiResponse<T> = serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        VaultError::Server {
            code: -1,
            msg: format!("反序列化响应失败: {e}"),
        }
    })?;

    // 检查错误码
    if api_resp.err_code != 0 {
        error!(
            "[HTTP] {}服务器错误，错误码: {}, 错误信息: {}",
            operation_name, api_resp.err_code, api_resp.err_msg
        );
        return Err(VaultError::Server {
            code: api_resp.err_code,
            msg: api_resp.err_msg,
        });
    }

    Ok(api_resp)
}
