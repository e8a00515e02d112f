// Linux 实现：环境变量（写入 shell 启动文件）+ 桌面环境设置存储。
// 桌面环境在构造时检测一次：GNOME 使用 gsettings，KDE 使用 kwriteconfig5。

use super::backend::{ApplyReport, CommandRunner, EnvReader, ProxyBackend};
use super::config::{ProxyConfig, split_bypass};
use super::error::{ProxyError, Result, TargetFailure};
use super::managed_block;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const GNOME_PROXY_SCHEMA: &str = "org.gnome.system.proxy";
const KDE_PROXY_GROUP: &str = "Proxy Settings";
const PROXY_PROTOCOLS: [&str; 3] = ["http", "https", "socks"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopEnvironment {
    Gnome,
    Kde,
    // 未识别的桌面，仅使用环境变量
    Unknown,
}

impl DesktopEnvironment {
    pub fn detect(env: &EnvReader) -> Self {
        let current_desktop = env("XDG_CURRENT_DESKTOP").unwrap_or_default();
        let desktops: Vec<String> = current_desktop
            .split(':')
            .map(|name| name.trim().to_uppercase())
            .collect();

        if env("GNOME_DESKTOP_SESSION_ID").is_some() || desktops.iter().any(|d| d == "GNOME") {
            return Self::Gnome;
        }

        if env("KDE_FULL_SESSION").is_some() || desktops.iter().any(|d| d == "KDE") {
            return Self::Kde;
        }

        Self::Unknown
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Gnome => "GNOME",
            Self::Kde => "KDE",
            Self::Unknown => "ENV",
        }
    }
}

pub struct DesktopBackend<R> {
    runner: R,
    profiles: Vec<PathBuf>,
    kde_config: Option<PathBuf>,
    env: EnvReader,
    desktop: DesktopEnvironment,
}

impl<R: CommandRunner> DesktopBackend<R> {
    pub fn new(
        runner: R,
        profiles: Vec<PathBuf>,
        kde_config: Option<PathBuf>,
        env: EnvReader,
    ) -> Self {
        let desktop = DesktopEnvironment::detect(&env);
        log::info!("检测到桌面环境：{}", desktop.tag());

        Self {
            runner,
            profiles,
            kde_config,
            env,
            desktop,
        }
    }

    pub fn desktop(&self) -> DesktopEnvironment {
        self.desktop
    }

    fn apply_profiles(&self, config: &ProxyConfig, report: &mut ApplyReport) {
        for path in &self.profiles {
            let target = path.display().to_string();
            let failures = match write_profile(path, config) {
                Ok(()) => Vec::new(),
                Err(e) => vec![TargetFailure::new(&target, "环境变量写入", e)],
            };
            report.record(&target, failures);
        }
    }

    fn apply_desktop(&self, config: &ProxyConfig, report: &mut ApplyReport) {
        let result = match self.desktop {
            DesktopEnvironment::Gnome => self.apply_gnome(config),
            DesktopEnvironment::Kde => self.apply_kde(config),
            DesktopEnvironment::Unknown => return,
        };

        let tag = self.desktop.tag();
        let failures = match result {
            Ok(()) => Vec::new(),
            Err(e) => vec![TargetFailure::new(tag, "桌面代理设置", e)],
        };
        report.record(tag, failures);
    }

    fn gsettings_set(&self, schema: &str, key: &str, value: &str) -> Result<()> {
        self.runner.run("gsettings", &["set", schema, key, value])?;
        Ok(())
    }

    fn gsettings_get(&self, schema: &str, key: &str) -> Result<String> {
        let output = self.runner.run("gsettings", &["get", schema, key])?;
        Ok(unquote(output.trim()).to_string())
    }

    fn apply_gnome(&self, config: &ProxyConfig) -> Result<()> {
        if !config.enabled {
            return self.gsettings_set(GNOME_PROXY_SCHEMA, "mode", "none");
        }

        let (host, port) = config.host_port()?;
        for protocol in PROXY_PROTOCOLS {
            let schema = format!("{}.{}", GNOME_PROXY_SCHEMA, protocol);
            self.gsettings_set(&schema, "host", host)?;
            self.gsettings_set(&schema, "port", port)?;
        }

        let bypass = config.bypass_entries();
        if !bypass.is_empty() {
            self.gsettings_set(GNOME_PROXY_SCHEMA, "ignore-hosts", &to_gvariant_list(&bypass))?;
        }

        // 地址写完后再切换模式
        self.gsettings_set(GNOME_PROXY_SCHEMA, "mode", "manual")
    }

    fn kde_config_path(&self) -> Result<&Path> {
        self.kde_config
            .as_deref()
            .ok_or_else(|| ProxyError::Settings("无法确定 KDE 配置文件路径".to_string()))
    }

    fn kwriteconfig(&self, key: &str, value: &str) -> Result<()> {
        let file = self.kde_config_path()?.display().to_string();
        self.runner.run(
            "kwriteconfig5",
            &["--file", &file, "--group", KDE_PROXY_GROUP, "--key", key, value],
        )?;
        Ok(())
    }

    fn kreadconfig(&self, key: &str) -> Result<String> {
        let file = self.kde_config_path()?.display().to_string();
        let output = self.runner.run(
            "kreadconfig5",
            &["--file", &file, "--group", KDE_PROXY_GROUP, "--key", key],
        )?;
        Ok(output.trim().to_string())
    }

    fn apply_kde(&self, config: &ProxyConfig) -> Result<()> {
        if !config.enabled {
            // 0 = 无代理
            return self.kwriteconfig("ProxyType", "0");
        }

        let (host, port) = config.host_port()?;
        for protocol in PROXY_PROTOCOLS {
            let scheme = if protocol == "socks" { "socks" } else { "http" };
            let key = format!("{}Proxy", protocol);
            self.kwriteconfig(&key, &format!("{}://{}:{}", scheme, host, port))?;
        }
        self.kwriteconfig("NoProxyFor", &config.bypass_entries().join(","))?;

        // 1 = 手动代理
        self.kwriteconfig("ProxyType", "1")
    }

    fn query_gnome(&self) -> Result<ProxyConfig> {
        let mode = self.gsettings_get(GNOME_PROXY_SCHEMA, "mode")?;
        let mut config = ProxyConfig {
            enabled: mode == "manual",
            ..ProxyConfig::default()
        };

        if config.enabled {
            let http_schema = format!("{}.http", GNOME_PROXY_SCHEMA);
            let host = self.gsettings_get(&http_schema, "host")?;
            let port = self.gsettings_get(&http_schema, "port")?;
            if !host.is_empty() && !port.is_empty() && port != "0" {
                config.server = format!("{}:{}", host, port);
            }

            match self.gsettings_get(GNOME_PROXY_SCHEMA, "ignore-hosts") {
                Ok(list) => config.bypass = from_gvariant_list(&list).join(","),
                Err(e) => log::warn!("读取 GNOME 绕过列表失败：{}", e),
            }
        }

        Ok(config)
    }

    fn query_kde(&self) -> Result<ProxyConfig> {
        let proxy_type = self.kreadconfig("ProxyType")?;
        let mut config = ProxyConfig {
            enabled: proxy_type == "1",
            ..ProxyConfig::default()
        };

        if config.enabled {
            let http_proxy = self.kreadconfig("httpProxy")?;
            config.server = strip_scheme(&http_proxy);
            config.bypass = self.kreadconfig("NoProxyFor").unwrap_or_default();
        }

        Ok(config)
    }

    // 未检测到桌面环境时直接读取进程环境变量
    fn query_env(&self) -> ProxyConfig {
        let http_proxy = (self.env)("http_proxy").or_else(|| (self.env)("HTTP_PROXY"));
        let no_proxy = (self.env)("no_proxy").or_else(|| (self.env)("NO_PROXY"));

        let server = http_proxy.as_deref().map(strip_scheme).unwrap_or_default();
        ProxyConfig {
            enabled: !server.is_empty(),
            server,
            bypass: no_proxy.unwrap_or_default(),
        }
    }
}

impl<R: CommandRunner> ProxyBackend for DesktopBackend<R> {
    fn name(&self) -> &'static str {
        "linux-desktop"
    }

    fn list_targets(&self) -> Result<Vec<String>> {
        let mut targets: Vec<String> = self
            .profiles
            .iter()
            .map(|path| path.display().to_string())
            .collect();

        if self.desktop != DesktopEnvironment::Unknown {
            targets.push(self.desktop.tag().to_string());
        }

        if targets.is_empty() {
            return Err(ProxyError::NoTargets);
        }
        Ok(targets)
    }

    fn apply(&self, config: &ProxyConfig) -> Result<ApplyReport> {
        if config.enabled {
            config.host_port()?;
            log::info!("正在设置 Linux 系统代理：{}", config.server);
        } else {
            log::info!("正在关闭 Linux 系统代理");
        }

        let mut report = ApplyReport::default();
        self.apply_profiles(config, &mut report);
        self.apply_desktop(config, &mut report);

        if report.applied.is_empty() && report.failures.is_empty() {
            return Err(ProxyError::NoTargets);
        }
        Ok(report)
    }

    fn clear(&self) -> Result<ApplyReport> {
        self.apply(&ProxyConfig::disabled())
    }

    fn query(&self) -> Result<ProxyConfig> {
        let tag = self.desktop.tag();
        match self.desktop {
            DesktopEnvironment::Gnome => self.query_gnome().map_err(|e| ProxyError::query(tag, e)),
            DesktopEnvironment::Kde => self.query_kde().map_err(|e| ProxyError::query(tag, e)),
            DesktopEnvironment::Unknown => Ok(self.query_env()),
        }
    }
}

// 读取 -> 重写托管块 -> 原子写回；文件不存在视为空内容
fn write_profile(path: &Path, config: &ProxyConfig) -> Result<()> {
    // 启动文件可能是指向 dotfiles 仓库的符号链接，写入真实文件
    let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let updated = managed_block::rewrite(&content, config);
    if updated == content {
        log::debug!("{} 无需更新", path.display());
        return Ok(());
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("profile");
    let temp_path = path.with_file_name(format!(".{}.sysproxy-tmp", file_name));

    fs::write(&temp_path, updated.as_bytes())?;
    if let Ok(metadata) = fs::metadata(&path) {
        fs::set_permissions(&temp_path, metadata.permissions())?;
    }
    if let Err(e) = fs::rename(&temp_path, &path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    log::debug!("已更新 {}", path.display());
    Ok(())
}

fn unquote(value: &str) -> &str {
    value.trim_matches('\'').trim_matches('"')
}

// GNOME 使用 GVariant 字符串数组：['host1', 'host2']
fn to_gvariant_list(entries: &[String]) -> String {
    let quoted: Vec<String> = entries
        .iter()
        .map(|entry| format!("'{}'", entry.replace('\'', "")))
        .collect();
    format!("[{}]", quoted.join(", "))
}

fn from_gvariant_list(value: &str) -> Vec<String> {
    let value = value.trim();
    let value = value.strip_prefix("@as").unwrap_or(value).trim();
    let inner = value.trim_start_matches('[').trim_end_matches(']');

    split_bypass(inner, ',')
        .into_iter()
        .map(|entry| unquote(&entry).to_string())
        .filter(|entry| !entry.is_empty())
        .collect()
}

// http://host:port -> host:port
fn strip_scheme(value: &str) -> String {
    let value = value.trim();
    if value.contains("://")
        && let Ok(url) = url::Url::parse(value)
        && let Some(host) = url.host_str()
    {
        return match url.port_or_known_default() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
    }

    value
        .split_once("://")
        .map_or(value, |(_, rest)| rest)
        .trim_end_matches('/')
        .to_string()
}
