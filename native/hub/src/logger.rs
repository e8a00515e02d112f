// 日志初始化：env_logger + chrono 本地时间戳

use std::io::Write;

const DEFAULT_FILTER: &str = "info";

// 可通过 RUST_LOG 覆盖日志级别；重复调用不会报错
pub fn init_logger() {
    let result = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(DEFAULT_FILTER),
    )
    .format(|buf, record| {
        writeln!(
            buf,
            "[{}] [{}] [{}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    })
    .try_init();

    if result.is_ok() {
        log::debug!("日志系统初始化完成");
    }
}
