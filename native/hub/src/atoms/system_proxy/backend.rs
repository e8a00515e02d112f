// 平台后端抽象：每个操作系统一个实现，启动时选定一次。

use super::config::ProxyConfig;
use super::error::{Failures, ProxyError, Result, TargetFailure};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

pub trait ProxyBackend: Send + Sync {
    // 后端名称，用于日志
    fn name(&self) -> &'static str;

    // 枚举当前可配置的目标（网络服务、启动文件、设置存储），每次调用都重新枚举
    fn list_targets(&self) -> Result<Vec<String>>;

    // 应用配置，逐目标收集失败
    fn apply(&self, config: &ProxyConfig) -> Result<ApplyReport>;

    // 在所有目标上关闭代理
    fn clear(&self) -> Result<ApplyReport>;

    // 从代表性目标读取实时系统状态
    fn query(&self) -> Result<ProxyConfig>;

    // 需要监听的网络配置文件，不支持监听的后端返回 None
    fn watch_spec(&self) -> Option<WatchSpec> {
        None
    }
}

// 一次 Set/Clear 的逐目标结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    pub failures: Vec<TargetFailure>,
}

impl ApplyReport {
    // 记录单个目标的结果：无失败即视为成功
    pub fn record(&mut self, target: &str, failures: Vec<TargetFailure>) {
        if failures.is_empty() {
            self.applied.push(target.to_string());
        } else {
            self.failures.extend(failures);
        }
    }

    pub fn is_total_failure(&self) -> bool {
        self.applied.is_empty()
    }

    // 部分成功时的告警信息
    pub fn warning(&self) -> Option<Failures> {
        if self.failures.is_empty() {
            None
        } else {
            Some(Failures(self.failures.clone()))
        }
    }

    pub fn into_failures(self) -> Failures {
        Failures(self.failures)
    }
}

// 监听目录与允许触发的文件名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSpec {
    pub dir: PathBuf,
    pub file_names: Vec<String>,
}

impl WatchSpec {
    pub fn matches(&self, path: &std::path::Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.file_names.iter().any(|allowed| allowed == name))
    }
}

// 外部命令执行抽象，成功时返回 stdout
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> Result<String>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for Arc<R> {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        (**self).run(program, args)
    }
}

// 直接调用系统命令
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        log::debug!("执行命令：{} {}", program, args.join(" "));

        let mut command = Command::new(program);
        command.args(args);

        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let output = command.output().map_err(|e| ProxyError::Command {
            program: program.to_string(),
            args: args.join(" "),
            reason: e.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let reason = if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            };
            return Err(ProxyError::Command {
                program: program.to_string(),
                args: args.join(" "),
                reason,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

// 读取环境变量的函数，测试中可替换
pub type EnvReader = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub fn process_env() -> EnvReader {
    Arc::new(|key| std::env::var(key).ok().filter(|value| !value.is_empty()))
}

// 按当前操作系统创建后端
#[cfg(target_os = "macos")]
pub fn default_backend(
    _paths: &crate::services::PathService,
    _settings: &crate::services::Settings,
) -> Result<Box<dyn ProxyBackend>> {
    Ok(Box::new(super::macos_impl::NetworkSetupBackend::new(
        SystemCommandRunner,
    )))
}

#[cfg(target_os = "linux")]
pub fn default_backend(
    paths: &crate::services::PathService,
    settings: &crate::services::Settings,
) -> Result<Box<dyn ProxyBackend>> {
    Ok(Box::new(super::linux_impl::DesktopBackend::new(
        SystemCommandRunner,
        paths.shell_profiles(&settings.shell_profiles),
        paths.kde_proxy_config(),
        process_env(),
    )))
}

#[cfg(target_os = "windows")]
pub fn default_backend(
    _paths: &crate::services::PathService,
    _settings: &crate::services::Settings,
) -> Result<Box<dyn ProxyBackend>> {
    Ok(Box::new(super::windows_impl::RegistryBackend::new(
        super::windows_impl::WinRegStore,
    )))
}

#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
pub fn default_backend(
    _paths: &crate::services::PathService,
    _settings: &crate::services::Settings,
) -> Result<Box<dyn ProxyBackend>> {
    Err(ProxyError::Unsupported)
}
