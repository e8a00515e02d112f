// 应用设置：JSON 文件，所有字段都有默认值

use crate::atoms::system_proxy::{DEFAULT_BYPASS, ProxyError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // “使用默认值启用”时的绕过列表
    pub default_bypass: Vec<String>,

    // 网络变化监听的防抖时长（毫秒）
    pub debounce_ms: u64,

    // 由环境变量机制托管的 Shell 启动文件，相对主目录
    pub shell_profiles: Vec<String>,

    pub watch_network_changes: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_bypass: DEFAULT_BYPASS.iter().map(|s| s.to_string()).collect(),
            debounce_ms: 2000,
            shell_profiles: vec![".profile".to_string(), ".bashrc".to_string()],
            watch_network_changes: true,
        }
    }
}

impl Settings {
    // 文件不存在时使用默认值，格式错误时报错
    pub fn load(path: &Path) -> Result<Self, ProxyError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("设置文件不存在，使用默认设置：{}", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let settings: Self = serde_json::from_str(&content)
            .map_err(|e| ProxyError::Settings(format!("{}：{}", path.display(), e)))?;
        log::info!("已加载设置文件：{}", path.display());
        Ok(settings)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
