// 测试用的系统命令模拟：networksetup、gsettings 与 kwriteconfig5/kreadconfig5。

use super::backend::CommandRunner;
use super::error::{ProxyError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

fn command_error(program: &str, args: &[&str], reason: &str) -> ProxyError {
    ProxyError::Command {
        program: program.to_string(),
        args: args.join(" "),
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, Default)]
struct FakeProxy {
    host: String,
    port: String,
    enabled: bool,
}

#[derive(Default)]
struct NetworkState {
    services: Vec<String>,
    failing: HashSet<String>,
    proxies: HashMap<(String, String), FakeProxy>,
    bypass: HashMap<String, Vec<String>>,
    list_calls: usize,
    set_calls: usize,
}

// 模拟 networksetup，按网络服务保存代理状态
#[derive(Default)]
pub(crate) struct FakeNetworkSetup {
    state: Mutex<NetworkState>,
}

impl FakeNetworkSetup {
    pub(crate) fn new(services: &[&str]) -> Self {
        let fake = Self::default();
        fake.set_services(services);
        fake
    }

    pub(crate) fn set_services(&self, services: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.services = services.iter().map(|s| s.to_string()).collect();
    }

    pub(crate) fn fail_service(&self, service: &str) {
        self.state.lock().unwrap().failing.insert(service.to_string());
    }

    pub(crate) fn fail_all(&self) {
        let mut state = self.state.lock().unwrap();
        let services = state.services.clone();
        state.failing.extend(services);
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    // -setwebproxy 调用次数，用于判断是否发生了重新应用
    pub(crate) fn set_calls(&self) -> usize {
        self.state.lock().unwrap().set_calls
    }

    pub(crate) fn proxy_enabled(&self, service: &str, flag: &str) -> Option<bool> {
        self.state
            .lock()
            .unwrap()
            .proxies
            .get(&(service.to_string(), flag.to_string()))
            .map(|proxy| proxy.enabled)
    }

    pub(crate) fn bypass(&self, service: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .bypass
            .get(service)
            .cloned()
            .unwrap_or_default()
    }
}

impl CommandRunner for FakeNetworkSetup {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let flag = args.first().copied().unwrap_or_default();

        if flag == "-listallnetworkservices" {
            state.list_calls += 1;
            let mut output =
                String::from("An asterisk (*) denotes that a network service is disabled.\n");
            for service in &state.services {
                output.push_str(service);
                output.push('\n');
            }
            return Ok(output);
        }

        let service = args.get(1).copied().unwrap_or_default().to_string();
        if state.failing.contains(&service) || !state.services.contains(&service) {
            return Err(command_error(program, args, "** Error: The parameters were not valid."));
        }

        match flag {
            "-setwebproxy" | "-setsecurewebproxy" | "-setsocksfirewallproxy" => {
                if flag == "-setwebproxy" {
                    state.set_calls += 1;
                }
                let proxy = state
                    .proxies
                    .entry((service, flag.to_string()))
                    .or_default();
                proxy.host = args.get(2).copied().unwrap_or_default().to_string();
                proxy.port = args.get(3).copied().unwrap_or_default().to_string();
                Ok(String::new())
            }
            "-setwebproxystate" | "-setsecurewebproxystate" | "-setsocksfirewallproxystate" => {
                let key = flag.trim_end_matches("state").to_string();
                let proxy = state.proxies.entry((service, key)).or_default();
                proxy.enabled = args.get(2) == Some(&"on");
                Ok(String::new())
            }
            "-setproxybypassdomains" => {
                let domains = args[2..].iter().map(|s| s.to_string()).collect();
                state.bypass.insert(service, domains);
                Ok(String::new())
            }
            "-getwebproxy" => {
                let proxy = state
                    .proxies
                    .get(&(service, "-setwebproxy".to_string()))
                    .cloned()
                    .unwrap_or_default();
                Ok(format!(
                    "Enabled: {}\nServer: {}\nPort: {}\nAuthenticated Proxy Enabled: 0\n",
                    if proxy.enabled { "Yes" } else { "No" },
                    proxy.host,
                    proxy.port
                ))
            }
            "-getproxybypassdomains" => {
                let domains = state.bypass.get(&service).cloned().unwrap_or_default();
                if domains.is_empty() {
                    Ok(format!("There aren't any bypass domains set on {}.\n", service))
                } else {
                    Ok(format!("{}\n", domains.join("\n")))
                }
            }
            _ => Err(command_error(program, args, "unknown flag")),
        }
    }
}

// 模拟桌面设置存储：gsettings 与 KDE 配置工具共用一张键值表
#[derive(Default)]
pub(crate) struct FakeDesktopStore {
    values: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
    broken: Mutex<bool>,
}

impl FakeDesktopStore {
    pub(crate) fn value(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn break_store(&self) {
        *self.broken.lock().unwrap() = true;
    }
}

impl CommandRunner for FakeDesktopStore {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", program, args.join(" ")));

        if *self.broken.lock().unwrap() {
            return Err(command_error(program, args, "No such schema"));
        }

        let mut values = self.values.lock().unwrap();
        match (program, args) {
            ("gsettings", ["set", schema, key, value]) => {
                values.insert(format!("{}.{}", schema, key), value.to_string());
                Ok(String::new())
            }
            ("gsettings", ["get", schema, key]) => {
                let value = values
                    .get(&format!("{}.{}", schema, key))
                    .cloned()
                    .unwrap_or_else(|| "''".to_string());
                Ok(format!("{}\n", value))
            }
            ("kwriteconfig5", ["--file", _, "--group", group, "--key", key, value]) => {
                values.insert(format!("{}.{}", group, key), value.to_string());
                Ok(String::new())
            }
            ("kreadconfig5", ["--file", _, "--group", group, "--key", key]) => Ok(format!(
                "{}\n",
                values
                    .get(&format!("{}.{}", group, key))
                    .cloned()
                    .unwrap_or_default()
            )),
            _ => Err(command_error(program, args, "unexpected command")),
        }
    }
}
