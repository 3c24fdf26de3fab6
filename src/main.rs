use secure_dht::dht::{validate_node_id, MemoryDht, NodeId, Value, USER_DATA_TYPE};
use secure_dht::identity::Identity;
use secure_dht::storage::{Database, IdentityStore};
use secure_dht::utils::{parse_log_level, setup_logger, short_id, Config};
use secure_dht::{SecureDht, SecureDhtConfig};

use anyhow::Context;
use clap::{ArgAction, Parser};
use colored::*;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

/// 命令行参数
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// 本地节点名称，覆盖配置文件
    #[clap(short, long)]
    name: Option<String>,

    /// 对端节点名称
    #[clap(long, default_value = "peer")]
    peer_name: String,

    /// 配置文件路径
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// 公开发布的键名
    #[clap(short, long, default_value = "abc")]
    key: String,

    /// 发送的内容
    #[clap(short, long, default_value = "hello")]
    message: String,

    /// 额外解析一个节点证书（40位十六进制ID）
    #[clap(long)]
    lookup: Option<String>,

    /// 日志级别
    #[clap(long)]
    log_level: Option<String>,

    /// 启用详细日志
    #[clap(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 加载配置文件，首次运行时保存默认配置
    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path)?;
    if !config_path.exists() {
        config.save(&config_path)?;
    }
    if let Some(name) = &args.name {
        config.node_name = name.clone();
    }
    config.ensure_data_dir()?;

    let log_level = if args.verbose {
        "debug".to_string()
    } else {
        args.log_level.clone().unwrap_or_else(|| config.log_level.clone())
    };
    setup_logger(Some(parse_log_level(&log_level).map_err(anyhow::Error::msg)?))
        .map_err(anyhow::Error::msg)?;

    println!("{}", format!("SecureDht demo v{}", secure_dht::utils::version()).green().bold());

    // 本地身份持久化，对端每次重新生成
    let database = Database::open(config.identity_db_path())
        .with_context(|| format!("opening {}", config.identity_db_path().display()))?;
    let store = IdentityStore::new(&database);
    let identity = store.load_or_generate(&config.node_name, config.certificate_validity())?;
    let peer_identity = Identity::generate(&args.peer_name, config.certificate_validity())?;

    let dht = Arc::new(MemoryDht::with_batch_size(config.batch_size));
    let local = SecureDht::new(dht.clone(), identity, config.secure_dht_config())?;
    let peer = SecureDht::new(dht.clone(), peer_identity, SecureDhtConfig::default())?;

    println!("{} {} ({})", "Local node:".cyan(), local.id(), config.node_name);
    println!("{} {} ({})", "Peer node: ".cyan(), peer.id(), args.peer_name);

    if local.is_degraded() {
        warn!("Local identity is degraded; peers can't verify its values");
    }

    // 签名值：任何节点都能验证
    let key = NodeId::hash(args.key.as_bytes());
    info!("Publishing signed value under {}", key);
    local.put_signed_async(&key, Value::new(USER_DATA_TYPE, args.message.clone().into_bytes())).await?;

    println!("\n{}", format!("Signed values under '{}':", args.key).yellow().bold());
    for value in peer.get_values(&key, None).await? {
        print_value(&peer, &value);
    }

    // 加密值：只有对端能读取
    let inbox = NodeId::hash(format!("inbox:{}", peer.id()).as_bytes());
    info!("Publishing value encrypted for {}", short_id(&peer.id()));
    local.put_encrypted_async(&inbox, &peer.id(), Value::new(USER_DATA_TYPE, args.message.clone().into_bytes())).await?;

    println!("\n{}", "Encrypted inbox as seen by the peer:".yellow().bold());
    for value in peer.get_values(&inbox, None).await? {
        print_value(&peer, &value);
    }

    let unreadable = local.get_values(&inbox, None).await?;
    println!(
        "\n{} {} value(s) readable by the sender, {} stored",
        "Inbox:".yellow().bold(),
        unreadable.len(),
        dht.local_values(&inbox).len()
    );

    if let Some(lookup) = &args.lookup {
        let id = validate_node_id(lookup).map_err(anyhow::Error::msg)?;
        match local.find_certificate_async(&id).await {
            Some(certificate) => println!("\n{} {} ({})", "Certificate found:".green(), id, certificate.name),
            None => println!("\n{} {}", "No certificate for".red(), id),
        }
    }

    println!("{} {}", "Certificates cached by peer:".cyan(), peer.cached_certificates());

    local.shutdown();
    peer.shutdown();
    Ok(())
}

fn print_value(viewer: &SecureDht, value: &Value) {
    let data = value.data().map(String::from_utf8_lossy).unwrap_or_default();
    match value.owner() {
        Some(owner) => {
            let name = viewer.get_certificate(owner)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| short_id(owner));
            println!("  {} \"{}\" {} {}", "✓".green(), data, "signed by".dimmed(), name.bold());
        }
        None => println!("  {} \"{}\" {}", "-".normal(), data, "(unsigned)".dimmed()),
    }
}
