// 路径服务：统一解析主目录、配置目录和托管的 Shell 启动文件
// 负责管理所有目录和文件路径，避免路径逻辑分散

use crate::atoms::system_proxy::ProxyError;
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "sysproxy-hub";
const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone)]
pub struct PathService {
    // 用户主目录
    home_dir: PathBuf,

    // 应用配置目录：<config_dir>/sysproxy-hub
    app_config_dir: PathBuf,
}

impl PathService {
    pub fn new() -> Result<Self, ProxyError> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| ProxyError::Settings("无法获取用户主目录".to_string()))?;

        // 部分精简环境没有 XDG 配置目录，退回到 ~/.config
        let config_dir = dirs::config_dir().unwrap_or_else(|| home_dir.join(".config"));

        Ok(Self {
            app_config_dir: config_dir.join(APP_DIR_NAME),
            home_dir,
        })
    }

    // 以指定目录作为主目录，配置目录位于其下的 .config
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home_dir = home.into();
        Self {
            app_config_dir: home_dir.join(".config").join(APP_DIR_NAME),
            home_dir,
        }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn app_config_dir(&self) -> &Path {
        &self.app_config_dir
    }

    pub fn settings_file(&self) -> PathBuf {
        self.app_config_dir.join(SETTINGS_FILE_NAME)
    }

    // 相对路径按主目录解析，绝对路径原样保留
    pub fn shell_profiles(&self, names: &[String]) -> Vec<PathBuf> {
        names
            .iter()
            .filter(|name| !name.trim().is_empty())
            .map(|name| {
                let path = Path::new(name.trim());
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    self.home_dir.join(path)
                }
            })
            .collect()
    }

    // KDE 代理配置文件 ~/.config/kioslaverc
    pub fn kde_proxy_config(&self) -> Option<PathBuf> {
        Some(self.home_dir.join(".config").join("kioslaverc"))
    }
}
