// 系统代理管理器：持有期望状态并转发到当前平台后端。
//
// 两把锁分工：apply_lock 串行化 Set/Clear，保证两次切换不会交错应用；
// desired 只在复制配置时短暂持有，读者不会被缓慢的系统调用阻塞。

use super::backend::{ApplyReport, ProxyBackend};
use super::config::{DEFAULT_BYPASS, ProxyConfig};
use super::error::{ProxyError, Result};
use std::sync::{Mutex, PoisonError, RwLock};

pub struct ProxyManager {
    backend: Box<dyn ProxyBackend>,
    desired: RwLock<Option<ProxyConfig>>,
    apply_lock: Mutex<()>,
    default_bypass: Vec<String>,
}

impl ProxyManager {
    pub fn new(backend: Box<dyn ProxyBackend>) -> Self {
        Self {
            backend,
            desired: RwLock::new(None),
            apply_lock: Mutex::new(()),
            default_bypass: DEFAULT_BYPASS.iter().map(|s| s.to_string()).collect(),
        }
    }

    // 替换“使用默认值启用”时的绕过列表
    pub fn with_default_bypass(mut self, bypass: Vec<String>) -> Self {
        self.default_bypass = bypass;
        self
    }

    pub fn backend(&self) -> &dyn ProxyBackend {
        self.backend.as_ref()
    }

    // 应用配置；至少一个目标成功即更新期望状态，其余失败作为告警返回
    pub fn set_proxy(&self, config: &ProxyConfig) -> Result<ApplyReport> {
        config.validate()?;

        let _guard = self.apply_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let report = self.backend.apply(config)?;
        if report.is_total_failure() {
            if report.failures.is_empty() {
                return Err(ProxyError::NoTargets);
            }
            log::error!("代理设置全部失败，期望状态保持不变");
            return Err(ProxyError::Apply(report.into_failures()));
        }

        self.store_desired(Some(config.clone()));

        if let Some(failures) = report.warning() {
            log::warn!("部分代理设置失败：\n{}", failures);
        }
        log::info!(
            "代理配置已应用到 {} 个目标（enabled={}，server={}）",
            report.applied.len(),
            config.enabled,
            config.server
        );

        Ok(report)
    }

    // 尽力关闭代理：无论是否失败都清除期望状态，失败聚合后返回
    pub fn clear_proxy(&self) -> Result<ApplyReport> {
        let _guard = self.apply_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let result = self.backend.clear();
        self.store_desired(None);

        match result {
            Ok(report) if report.failures.is_empty() => {
                log::info!("系统代理已关闭");
                Ok(report)
            }
            Ok(report) => {
                let failures = report.into_failures();
                log::warn!("部分代理关闭失败：\n{}", failures);
                Err(ProxyError::Apply(failures))
            }
            Err(e) => {
                log::error!("关闭代理失败：{}", e);
                Err(e)
            }
        }
    }

    // 读取实时系统状态，而不是缓存的期望状态
    pub fn get_proxy(&self) -> Result<ProxyConfig> {
        self.backend.query()
    }

    // 最近一次成功应用的配置
    pub fn desired(&self) -> Option<ProxyConfig> {
        self.desired
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // 启用代理，未指定绕过列表时使用默认值
    pub fn enable_proxy(&self, server: &str, bypass: &[String]) -> Result<ApplyReport> {
        let bypass = if bypass.is_empty() {
            self.default_bypass.join(",")
        } else {
            bypass.join(",")
        };
        self.set_proxy(&ProxyConfig::enabled(server, bypass))
    }

    pub fn disable_proxy(&self) -> Result<ApplyReport> {
        self.clear_proxy()
    }

    // 实时状态折叠为布尔值，查询失败按未启用处理并记录日志
    pub fn state_proxy(&self) -> bool {
        match self.get_proxy() {
            Ok(config) => config.enabled,
            Err(e) => {
                log::error!("获取系统代理状态失败：{}", e);
                false
            }
        }
    }

    // 重新应用期望状态；无期望状态或未启用时返回 None
    pub fn reapply_desired(&self) -> Option<Result<ApplyReport>> {
        let desired = self.desired().filter(|config| config.enabled)?;
        log::info!("重新应用代理配置：{}", desired.server);
        Some(self.set_proxy(&desired))
    }

    fn store_desired(&self, config: Option<ProxyConfig>) {
        *self.desired.write().unwrap_or_else(PoisonError::into_inner) = config;
    }
}
