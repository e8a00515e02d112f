// 代理配置数据模型：期望状态与查询结果共用同一结构。

use super::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};

// 未指定绕过列表时使用的默认值
pub const DEFAULT_BYPASS: &[&str] = &[
    "127.0.0.1/8",
    "192.168.0.0/16",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "localhost",
    "*.local",
    "*.crashlytics.com",
    "<local>",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    // 是否启用代理
    pub enabled: bool,
    // 代理服务器地址，例如 127.0.0.1:7890
    #[serde(default)]
    pub server: String,
    // 逗号分隔的绕过列表，为空时使用后端默认值
    #[serde(default)]
    pub bypass: String,
}

impl ProxyConfig {
    pub fn enabled(server: impl Into<String>, bypass: impl Into<String>) -> Self {
        Self {
            enabled: true,
            server: server.into(),
            bypass: bypass.into(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    // 启用时 server 必须是 host:port
    pub fn validate(&self) -> Result<()> {
        if self.enabled {
            parse_server(&self.server)?;
        }
        Ok(())
    }

    // 拆分出 host 与 port
    pub fn host_port(&self) -> Result<(&str, &str)> {
        parse_server(&self.server)
    }

    pub fn bypass_entries(&self) -> Vec<String> {
        split_bypass(&self.bypass, ',')
    }
}

// 解析 host:port，要求恰好两个非空部分
pub fn parse_server(server: &str) -> Result<(&str, &str)> {
    let mut parts = server.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(host), Some(port), None) if !host.trim().is_empty() && !port.trim().is_empty() => {
            Ok((host.trim(), port.trim()))
        }
        _ => Err(ProxyError::InvalidServer(server.to_string())),
    }
}

// 按指定分隔符拆分绕过列表，去掉空白项
pub fn split_bypass(bypass: &str, separator: char) -> Vec<String> {
    bypass
        .split(separator)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

// 转换为后端原生分隔符（逗号、分号或空格）
pub fn convert_bypass(bypass: &str, from: char, to: &str) -> String {
    split_bypass(bypass, from).join(to)
}

pub fn default_bypass() -> String {
    DEFAULT_BYPASS.join(",")
}
