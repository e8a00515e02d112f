// SysProxy Hub
//
// 系统代理协调：设置、清除、查询系统代理，并在网络服务变化后自动恢复

pub mod atoms;
pub mod coordinator;
pub mod logger;
pub mod services;

use anyhow::{Context, Result};
use atoms::system_proxy::ProxyManager;
use coordinator::SystemCoordinator;
use services::{PathService, Settings};
use std::io::Write;

// 命令行入口
pub fn cli() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() <= 1 {
        print_usage();
        return Ok(());
    }

    logger::init_logger();
    handle_command(&args)
}

// 打印使用说明
pub fn print_usage() {
    println!("SysProxy Hub v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("可用命令：");
    println!("  set <host:port> [bypass...]  - 启用系统代理（未指定绕过列表时使用默认值）");
    println!("  clear                        - 关闭系统代理");
    println!("  get                          - 以 JSON 输出当前系统代理");
    println!("  watch <host:port>            - 启用代理并在网络变化后自动恢复，Ctrl+C 退出");
    println!("  version                      - 显示版本号");
}

// 处理命令行参数
pub fn handle_command(args: &[String]) -> Result<()> {
    let command = args.get(1).map(String::as_str).unwrap_or_default();

    match command {
        "version" | "-v" | "--version" => {
            println!("SysProxy Hub v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        "set" | "clear" | "get" | "watch" => {}
        "" => {
            print_usage();
            return Ok(());
        }
        _ => {
            eprintln!("未知命令: {}", command);
            println!();
            print_usage();
            return Ok(());
        }
    }

    let paths = PathService::new()?;
    let settings = Settings::load(&paths.settings_file())?;
    let coordinator = SystemCoordinator::init(&paths, &settings)?;

    if command == "watch" {
        let server = args.get(2).context("缺少代理地址，用法：watch <host:port>")?;
        let runtime = tokio::runtime::Runtime::new().context("创建异步运行时失败")?;
        return runtime.block_on(run_watch_mode(coordinator, server, &settings));
    }

    let stdout = std::io::stdout();
    run_command(coordinator.manager(), &args[1..], &mut stdout.lock())
}

// 执行一次性命令，结果写入 out
pub fn run_command(manager: &ProxyManager, args: &[String], out: &mut impl Write) -> Result<()> {
    match args.first().map(String::as_str) {
        Some("set") => {
            let server = args.get(1).context("缺少代理地址，用法：set <host:port> [bypass...]")?;
            let report = manager
                .enable_proxy(server, &args[2..])
                .with_context(|| format!("设置系统代理 {} 失败", server))?;

            if let Some(failures) = report.warning() {
                eprintln!("警告：以下目标设置失败：\n{}", failures);
            }
            writeln!(out, "系统代理已设置：{}", server)?;
        }
        Some("clear") => {
            manager.disable_proxy().context("关闭系统代理失败")?;
            writeln!(out, "系统代理已关闭")?;
        }
        Some("get") => {
            let config = manager.get_proxy().context("获取系统代理失败")?;
            writeln!(out, "{}", serde_json::to_string_pretty(&config)?)?;
        }
        other => anyhow::bail!("不支持的命令：{}", other.unwrap_or_default()),
    }

    Ok(())
}

// 常驻模式：应用代理后持续监听网络变化，直到 Ctrl+C
async fn run_watch_mode(
    mut coordinator: SystemCoordinator,
    server: &str,
    settings: &Settings,
) -> Result<()> {
    let report = coordinator
        .manager()
        .enable_proxy(server, &[])
        .with_context(|| format!("设置系统代理 {} 失败", server))?;
    if let Some(failures) = report.warning() {
        log::warn!("部分目标设置失败：\n{}", failures);
    }

    if settings.watch_network_changes {
        coordinator.start_watcher(settings.debounce())?;
    } else {
        log::info!("网络变化监听已在设置中关闭");
    }

    log::info!("运行中，按 Ctrl+C 退出");
    tokio::signal::ctrl_c()
        .await
        .context("无法注册 Ctrl+C 处理器")?;
    log::info!("收到 Ctrl+C 信号，正在停止...");

    coordinator.shutdown().await;
    Ok(())
}
