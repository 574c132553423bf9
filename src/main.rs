use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tracing::{error, info, warn};

use fleet_core::{init_logging, AppConfig};
use fleet_distributor::TaskDistributor;
use fleet_orchestrator::{OrchestrationEngine, SimulatedExecutor};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("fleet")
        .version("1.0.0")
        .about("分布式推理任务分发与编排系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时依次查找 config/fleet.toml、fleet.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载配置失败".to_string(),
    })?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.logging.format = format.clone();
    }
    init_logging(&config.logging.level, &config.logging.format)?;

    info!("启动分布式推理任务分发与编排系统");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let distributor = Arc::new(TaskDistributor::new(config.distributor.clone()));
    distributor.start().await;

    let engine = Arc::new(OrchestrationEngine::new(
        config.orchestration.clone(),
        distributor.clone(),
        Arc::new(SimulatedExecutor::default()),
    ));
    engine.start().await.context("启动编排引擎失败")?;

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");

    let remaining = engine
        .shutdown(config.orchestration.shutdown_timeout())
        .await;
    if remaining > 0 {
        warn!("{} 个编排任务未在超时时间内结束", remaining);
    }
    distributor.close().await;

    info!("系统已退出");
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
