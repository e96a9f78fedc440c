//! 保险库 CLI 客户端
//!
//! 非交互式 CLI：注册/登录后会话落盘，后续命令通过会话文件恢复登录态。
//! 所有记录操作都先写本地，推送与对账由后台任务完成，
//! 需要立即对账时用 `sync` 子命令手动触发。

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use vault_sdk_core_rust::vault::record::{Category, SyncListener};
use vault_sdk_core_rust::{VaultClient, VaultClientConfig};

/// 保险库 CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "vault-cli")]
#[command(about = "离线优先的加密保险库客户端", long_about = None)]
struct Args {
    /// 服务器 API 基础地址
    #[arg(long, default_value = "http://localhost:10010")]
    server: String,

    /// 数据目录（数据库、会话文件、加密文件仓库）
    #[arg(long, default_value = ".vault")]
    data_dir: PathBuf,

    /// 字段加密口令（也可通过 VAULT_PASSPHRASE 环境变量传入）
    #[arg(long, env = "VAULT_PASSPHRASE")]
    passphrase: String,

    /// 离线模式（不与服务器同步）
    #[arg(long)]
    offline: bool,

    /// 日志级别（默认: info,vault_sdk_core_rust=debug）
    #[arg(long, default_value = "info,vault_sdk_core_rust=debug")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 注册新账户并登录
    Register {
        username: String,
        password: String,
    },
    /// 登录已有账户
    Login {
        username: String,
        password: String,
    },
    /// 登出并清除本地会话
    Logout,
    /// 新增一条记录，字段形如 login=joe password=секрет meta_info=bank
    Add {
        category: String,
        fields: Vec<String>,
    },
    /// 更新一条记录的全部字段
    Edit {
        category: String,
        id: String,
        fields: Vec<String>,
    },
    /// 列出分类下的全部记录
    Ls { category: String },
    /// 读取一条记录
    Get { category: String, id: String },
    /// 删除一条记录
    Rm { category: String, id: String },
    /// 加密并登记一个文件
    PutFile {
        path: PathBuf,
        #[arg(long, default_value = "")]
        meta: String,
    },
    /// 取回并解密一个文件
    GetFile { id: String, dest: PathBuf },
    /// 手动触发一轮完整同步（先推后拉）
    Sync,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 创建日志文件（追加模式）
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("vault.log")
        .expect("无法创建日志文件 vault.log");

    // 输出到 stdout（控制台），保留 ANSI 颜色代码用于终端显示
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 输出到文件，禁用 ANSI 颜色代码（文件不需要颜色）
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

/// 同步监听器：把同步事件打到日志
struct CliSyncListener;

#[async_trait::async_trait]
impl SyncListener for CliSyncListener {
    async fn on_sync_start(&self) {
        info!("[CLI/Sync] 🔄 同步开始");
    }

    async fn on_sync_finish(&self) {
        info!("[CLI/Sync] ✅ 同步完成");
    }

    async fn on_sync_failed(&self, reason: String) {
        error!("[CLI/Sync] ❌ 同步失败: {}", reason);
    }

    async fn on_records_changed(&self, category: String) {
        info!("[CLI/Sync] 📬 本地记录有更新: {}", category);
    }
}

fn parse_category(s: &str) -> Result<Category> {
    Category::parse(s).ok_or_else(|| {
        anyhow!(
            "未知分类 {s}，可选: credential / note / card / file_ref"
        )
    })
}

fn parse_fields(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("字段格式应为 key=value，收到: {pair}"))?;
        fields.insert(key.to_string(), value.to_string());
    }
    Ok(fields)
}

fn print_record(record: &vault_sdk_core_rust::LocalRecord) {
    println!("id: {}", record.id);
    println!("updated_at: {}", record.updated_at.to_rfc3339());
    for (key, value) in &record.fields {
        println!("  {key}: {value}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level);

    let db_url = format!(
        "sqlite://{}?mode=rwc",
        args.data_dir.join("vault.db").display()
    );
    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("无法创建数据目录 {}", args.data_dir.display()))?;

    let mut config = VaultClientConfig::new(
        args.server.clone(),
        db_url,
        args.data_dir.clone(),
        args.passphrase.clone(),
    );
    config.sync_with_server = !args.offline;

    let mut client = VaultClient::new(config).await?;
    client.set_sync_listener(Arc::new(CliSyncListener));

    match args.command {
        Command::Register { username, password } => {
            client.register(&username, &password).await?;
            println!("注册成功，已登录");
        }
        Command::Login { username, password } => {
            client.login(&username, &password).await?;
            println!("登录成功");
        }
        Command::Logout => {
            // 会话文件可能已经不存在，登出仍然要把本地状态清干净
            let _ = client.resume().await;
            client.logout()?;
            println!("已登出");
        }
        Command::Add { category, fields } => {
            client.resume().await?;
            let category = parse_category(&category)?;
            let id = client.add_record(category, parse_fields(&fields)?).await?;
            println!("已新增，记录ID: {id}");
        }
        Command::Edit {
            category,
            id,
            fields,
        } => {
            client.resume().await?;
            let category = parse_category(&category)?;
            client
                .update_record(category, &id, parse_fields(&fields)?)
                .await?;
            println!("已更新");
        }
        Command::Ls { category } => {
            client.resume().await?;
            let category = parse_category(&category)?;
            let records = client.get_all_records(category).await?;
            println!("{category} 共 {} 条:", records.len());
            for record in &records {
                print_record(record);
            }
        }
        Command::Get { category, id } => {
            client.resume().await?;
            let category = parse_category(&category)?;
            let record = client.get_record(category, &id).await?;
            print_record(&record);
        }
        Command::Rm { category, id } => {
            client.resume().await?;
            let category = parse_category(&category)?;
            client.delete_record(category, &id).await?;
            println!("已删除");
        }
        Command::PutFile { path, meta } => {
            client.resume().await?;
            let id = client.sync_file(&path, &meta).await?;
            println!("文件已加密登记，记录ID: {id}");
        }
        Command::GetFile { id, dest } => {
            client.resume().await?;
            client.retrieve_file(&id, &dest).await?;
            println!("文件已解密到 {}", dest.display());
        }
        Command::Sync => {
            client.resume().await?;
            client.sync_now().await?;
            println!("同步完成");
        }
    }

    Ok(())
}
