// 系统代理原子模块

pub mod backend;
pub mod config;
pub mod error;
pub mod linux_impl;
pub mod macos_impl;
pub mod managed_block;
pub mod manager;
pub mod watcher;
pub mod windows_impl;

#[cfg(test)]
pub(crate) mod testing;

// 导出公共接口
pub use backend::{
    ApplyReport, CommandRunner, ProxyBackend, SystemCommandRunner, WatchSpec, default_backend,
};
pub use config::{DEFAULT_BYPASS, ProxyConfig};
pub use error::{Failures, ProxyError, Result, TargetFailure};
pub use manager::ProxyManager;
pub use watcher::ChangeWatcher;
