// Windows 实现：写入 HKCU Internet Settings 注册表项，然后通知 WinINet 刷新。
// 单一存储，没有逐协议的部分成功：首个失败即中止。

use super::backend::{ApplyReport, ProxyBackend};
use super::config::{ProxyConfig, convert_bypass};
use super::error::{ProxyError, Result};

pub const INTERNET_SETTINGS_KEY: &str =
    r"Software\Microsoft\Windows\CurrentVersion\Internet Settings";

// 未指定绕过列表时默认绕过本地地址
const DEFAULT_PROXY_OVERRIDE: &str = "localhost;127.*;10.*;192.168.*;<local>";

const TARGET: &str = "Internet Settings";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    SettingsChanged,
    Refresh,
}

// 已打开的设置项，drop 时关闭
pub trait SettingsKey {
    fn set_u32(&self, name: &str, value: u32) -> Result<()>;
    fn set_string(&self, name: &str, value: &str) -> Result<()>;
    // 值不存在时返回 None，其他读取错误原样返回
    fn get_u32(&self, name: &str) -> Result<Option<u32>>;
    fn get_string(&self, name: &str) -> Result<Option<String>>;
}

pub trait SettingsStore: Send + Sync {
    type Key: SettingsKey;

    fn open(&self, writable: bool) -> Result<Self::Key>;

    // 通知其他进程设置已变更
    fn notify(&self, notification: Notification) -> Result<()>;
}

pub struct RegistryBackend<S> {
    store: S,
}

impl<S: SettingsStore> RegistryBackend<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn notify_all(&self) -> Result<()> {
        self.store.notify(Notification::SettingsChanged)?;
        self.store.notify(Notification::Refresh)?;
        Ok(())
    }

    fn write(&self, enable: u32, server: &str, bypass: &str) -> Result<()> {
        {
            let key = self.store.open(true)?;
            key.set_u32("ProxyEnable", enable)?;
            key.set_string("ProxyServer", server)?;
            key.set_string("ProxyOverride", bypass)?;
        }
        self.notify_all()
    }
}

impl<S: SettingsStore> ProxyBackend for RegistryBackend<S> {
    fn name(&self) -> &'static str {
        "windows-registry"
    }

    fn list_targets(&self) -> Result<Vec<String>> {
        Ok(vec![TARGET.to_string()])
    }

    fn apply(&self, config: &ProxyConfig) -> Result<ApplyReport> {
        if !config.enabled {
            return self.clear();
        }

        let (host, port) = config.host_port()?;
        let server = format!("{}:{}", host, port);

        // Windows 使用分号分隔
        let bypass = convert_bypass(&config.bypass, ',', ";");
        let bypass = if bypass.is_empty() {
            DEFAULT_PROXY_OVERRIDE.to_string()
        } else {
            bypass
        };

        log::info!("正在设置系统代理：{}", server);
        self.write(1, &server, &bypass)?;
        log::info!("系统代理设置成功：{}", server);

        Ok(ApplyReport {
            applied: vec![TARGET.to_string()],
            failures: Vec::new(),
        })
    }

    fn clear(&self) -> Result<ApplyReport> {
        log::info!("正在禁用系统代理");
        self.write(0, "", "")?;
        log::info!("系统代理已禁用");

        Ok(ApplyReport {
            applied: vec![TARGET.to_string()],
            failures: Vec::new(),
        })
    }

    fn query(&self) -> Result<ProxyConfig> {
        let key = self
            .store
            .open(false)
            .map_err(|e| ProxyError::query(TARGET, e))?;

        // 缺失的值按未设置处理，其他读取错误视为状态未知
        let read_error = |e: ProxyError| ProxyError::query(TARGET, e);
        let enabled = key.get_u32("ProxyEnable").map_err(read_error)?.unwrap_or(0) == 1;
        let server = key
            .get_string("ProxyServer")
            .map_err(read_error)?
            .unwrap_or_default();
        let bypass = key
            .get_string("ProxyOverride")
            .map_err(read_error)?
            .unwrap_or_default();

        Ok(ProxyConfig {
            enabled,
            server: first_proxy_target(&server),
            bypass: convert_bypass(&bypass, ';', ","),
        })
    }
}

// "host:port" 或 "http=host:port;https=host:port"，取第一项
fn first_proxy_target(value: &str) -> String {
    let first = value.split(';').map(str::trim).find(|entry| !entry.is_empty());
    match first {
        Some(entry) => entry
            .split_once('=')
            .map_or(entry, |(_, target)| target)
            .to_string(),
        None => String::new(),
    }
}

#[cfg(target_os = "windows")]
pub use winreg_store::{WinRegKey, WinRegStore};

#[cfg(target_os = "windows")]
mod winreg_store {
    use super::{INTERNET_SETTINGS_KEY, Notification, SettingsKey, SettingsStore};
    use crate::atoms::system_proxy::error::{ProxyError, Result};
    use std::io::ErrorKind;
    use windows::Win32::Networking::WinInet::{
        INTERNET_OPTION_REFRESH, INTERNET_OPTION_SETTINGS_CHANGED, InternetSetOptionW,
    };
    use winreg::RegKey;
    use winreg::enums::{HKEY_CURRENT_USER, KEY_READ, KEY_WRITE};

    pub struct WinRegStore;

    pub struct WinRegKey(RegKey);

    impl SettingsKey for WinRegKey {
        fn set_u32(&self, name: &str, value: u32) -> Result<()> {
            self.0
                .set_value(name, &value)
                .map_err(|e| ProxyError::store(format!("写入 {}", name), e))
        }

        fn set_string(&self, name: &str, value: &str) -> Result<()> {
            self.0
                .set_value(name, &value.to_string())
                .map_err(|e| ProxyError::store(format!("写入 {}", name), e))
        }

        fn get_u32(&self, name: &str) -> Result<Option<u32>> {
            match self.0.get_value::<u32, _>(name) {
                Ok(value) => Ok(Some(value)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(ProxyError::store(format!("读取 {}", name), e)),
            }
        }

        fn get_string(&self, name: &str) -> Result<Option<String>> {
            match self.0.get_value::<String, _>(name) {
                Ok(value) => Ok(Some(value)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(ProxyError::store(format!("读取 {}", name), e)),
            }
        }
    }

    impl SettingsStore for WinRegStore {
        type Key = WinRegKey;

        fn open(&self, writable: bool) -> Result<WinRegKey> {
            let flags = if writable {
                KEY_READ | KEY_WRITE
            } else {
                KEY_READ
            };

            RegKey::predef(HKEY_CURRENT_USER)
                .open_subkey_with_flags(INTERNET_SETTINGS_KEY, flags)
                .map(WinRegKey)
                .map_err(|e| ProxyError::store("打开注册表", e))
        }

        fn notify(&self, notification: Notification) -> Result<()> {
            let option = match notification {
                Notification::SettingsChanged => INTERNET_OPTION_SETTINGS_CHANGED,
                Notification::Refresh => INTERNET_OPTION_REFRESH,
            };

            unsafe { InternetSetOptionW(None, option, None, 0) }
                .map_err(|e| ProxyError::store(format!("通知 {:?}", notification), e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::manager::ProxyManager;
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Registry {
        dwords: HashMap<String, u32>,
        strings: HashMap<String, String>,
        notifications: Vec<Notification>,
        fail_on: Option<String>,
        fail_reads: bool,
        writes: Vec<String>,
    }

    #[derive(Clone, Default)]
    struct FakeStore(Arc<Mutex<Registry>>);

    struct FakeKey(Arc<Mutex<Registry>>);

    impl FakeKey {
        fn check(&self, name: &str) -> Result<()> {
            let mut registry = self.0.lock().unwrap();
            if registry.fail_on.as_deref() == Some(name) {
                return Err(ProxyError::store(format!("写入 {}", name), "access denied"));
            }
            registry.writes.push(name.to_string());
            Ok(())
        }
    }

    impl SettingsKey for FakeKey {
        fn set_u32(&self, name: &str, value: u32) -> Result<()> {
            self.check(name)?;
            self.0.lock().unwrap().dwords.insert(name.to_string(), value);
            Ok(())
        }

        fn set_string(&self, name: &str, value: &str) -> Result<()> {
            self.check(name)?;
            self.0
                .lock()
                .unwrap()
                .strings
                .insert(name.to_string(), value.to_string());
            Ok(())
        }

        fn get_u32(&self, name: &str) -> Result<Option<u32>> {
            let registry = self.0.lock().unwrap();
            if registry.fail_reads {
                return Err(ProxyError::store(format!("读取 {}", name), "access denied"));
            }
            Ok(registry.dwords.get(name).copied())
        }

        fn get_string(&self, name: &str) -> Result<Option<String>> {
            let registry = self.0.lock().unwrap();
            if registry.fail_reads {
                return Err(ProxyError::store(format!("读取 {}", name), "access denied"));
            }
            Ok(registry.strings.get(name).cloned())
        }
    }

    impl SettingsStore for FakeStore {
        type Key = FakeKey;

        fn open(&self, _writable: bool) -> Result<FakeKey> {
            Ok(FakeKey(self.0.clone()))
        }

        fn notify(&self, notification: Notification) -> Result<()> {
            self.0.lock().unwrap().notifications.push(notification);
            Ok(())
        }
    }

    #[test]
    fn test_set_proxy_writes_store_and_notifies_twice() {
        let store = FakeStore::default();
        let manager = ProxyManager::new(Box::new(RegistryBackend::new(store.clone())));

        manager
            .set_proxy(&ProxyConfig::enabled("127.0.0.1:7890", "127.0.0.1/8,localhost"))
            .unwrap();

        let registry = store.0.lock().unwrap();
        assert_eq!(registry.dwords.get("ProxyEnable"), Some(&1));
        assert!(registry.strings["ProxyServer"].contains("7890"));
        assert_eq!(registry.strings["ProxyOverride"], "127.0.0.1/8;localhost");
        assert_eq!(
            registry.notifications,
            vec![Notification::SettingsChanged, Notification::Refresh]
        );
    }

    #[test]
    fn test_empty_bypass_uses_default_override() {
        let store = FakeStore::default();
        let backend = RegistryBackend::new(store.clone());

        backend
            .apply(&ProxyConfig::enabled("127.0.0.1:7890", ""))
            .unwrap();

        let registry = store.0.lock().unwrap();
        assert_eq!(registry.strings["ProxyOverride"], DEFAULT_PROXY_OVERRIDE);
    }

    #[test]
    fn test_first_failure_aborts_remaining_writes() {
        let store = FakeStore::default();
        store.0.lock().unwrap().fail_on = Some("ProxyServer".to_string());
        let manager = ProxyManager::new(Box::new(RegistryBackend::new(store.clone())));

        assert!(
            manager
                .set_proxy(&ProxyConfig::enabled("127.0.0.1:7890", ""))
                .is_err()
        );
        assert_eq!(manager.desired(), None);

        let registry = store.0.lock().unwrap();
        assert_eq!(registry.writes, vec!["ProxyEnable".to_string()]);
        assert!(registry.notifications.is_empty());
    }

    #[test]
    fn test_clear_blanks_target_and_bypass() {
        let store = FakeStore::default();
        let manager = ProxyManager::new(Box::new(RegistryBackend::new(store.clone())));

        manager
            .set_proxy(&ProxyConfig::enabled("127.0.0.1:7890", ""))
            .unwrap();
        manager.clear_proxy().unwrap();

        let live = manager.get_proxy().unwrap();
        assert!(!live.enabled);
        assert_eq!(live.server, "");
        assert_eq!(live.bypass, "");
        assert_eq!(store.0.lock().unwrap().notifications.len(), 4);
    }

    #[test]
    fn test_query_of_empty_store_reports_disabled() {
        let backend = RegistryBackend::new(FakeStore::default());

        let live = backend.query().unwrap();
        assert!(!live.enabled);
        assert_eq!(live.server, "");
    }

    #[test]
    fn test_read_failure_is_not_reported_as_disabled() {
        let store = FakeStore::default();
        let manager = ProxyManager::new(Box::new(RegistryBackend::new(store.clone())));
        manager
            .set_proxy(&ProxyConfig::enabled("127.0.0.1:7890", ""))
            .unwrap();

        store.0.lock().unwrap().fail_reads = true;

        match manager.get_proxy() {
            Err(ProxyError::Query { target, .. }) => assert_eq!(target, TARGET),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_query_extracts_first_protocol_target() {
        assert_eq!(
            first_proxy_target("http=127.0.0.1:7890;https=127.0.0.1:7891"),
            "127.0.0.1:7890"
        );
        assert_eq!(first_proxy_target("127.0.0.1:7890"), "127.0.0.1:7890");
        assert_eq!(first_proxy_target(""), "");
    }
}
