// 系统协调器：持有代理管理器和网络监听器，负责它们的生命周期

use crate::atoms::system_proxy::{self, ChangeWatcher, ProxyBackend, ProxyManager, Result};
use crate::services::{PathService, Settings};
use std::sync::Arc;
use std::time::Duration;

pub struct SystemCoordinator {
    manager: Arc<ProxyManager>,
    watcher: Option<ChangeWatcher>,
}

impl SystemCoordinator {
    pub fn new(backend: Box<dyn ProxyBackend>, settings: &Settings) -> Self {
        let manager = ProxyManager::new(backend).with_default_bypass(settings.default_bypass.clone());
        Self {
            manager: Arc::new(manager),
            watcher: None,
        }
    }

    // 按当前平台选择后端
    pub fn init(paths: &PathService, settings: &Settings) -> Result<Self> {
        let backend = system_proxy::default_backend(paths, settings)?;
        log::info!("系统代理后端：{}", backend.name());
        Ok(Self::new(backend, settings))
    }

    pub fn manager(&self) -> &Arc<ProxyManager> {
        &self.manager
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    // 启动网络变化监听，需在 tokio 运行时内调用；已启动时忽略
    pub fn start_watcher(&mut self, debounce: Duration) -> Result<()> {
        if self.watcher.is_some() {
            log::debug!("网络监听已在运行");
            return Ok(());
        }

        self.watcher = ChangeWatcher::start(self.manager.clone(), debounce)?;
        Ok(())
    }

    // 停止监听器；代理设置保持不变
    pub async fn shutdown(mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop().await;
        }
        log::info!("系统协调器已关闭");
    }
}
