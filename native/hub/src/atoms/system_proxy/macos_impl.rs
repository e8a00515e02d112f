// macOS 实现：使用 networksetup 命令行工具逐个网络服务配置代理。
// 任一网络服务配置成功即视为成功，其余服务的失败作为告警返回。

use super::backend::{ApplyReport, CommandRunner, ProxyBackend, WatchSpec};
use super::config::ProxyConfig;
use super::error::{ProxyError, Result, TargetFailure};
use std::path::PathBuf;

const NETWORKSETUP: &str = "/usr/sbin/networksetup";

// 网络配置所在目录，以及会触发重新检测的文件
const SYSTEM_CONFIGURATION_DIR: &str = "/Library/Preferences/SystemConfiguration";
const WATCHED_FILES: [&str; 2] = ["preferences.plist", "NetworkInterfaces.plist"];

const NO_BYPASS_DOMAINS: &str = "There aren't any bypass domains set";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProxyKind {
    Web,
    SecureWeb,
    Socks,
}

const PROXY_KINDS: [ProxyKind; 3] = [ProxyKind::Web, ProxyKind::SecureWeb, ProxyKind::Socks];

impl ProxyKind {
    fn label(self) -> &'static str {
        match self {
            Self::Web => "HTTP",
            Self::SecureWeb => "HTTPS",
            Self::Socks => "SOCKS",
        }
    }

    fn target_flag(self) -> &'static str {
        match self {
            Self::Web => "-setwebproxy",
            Self::SecureWeb => "-setsecurewebproxy",
            Self::Socks => "-setsocksfirewallproxy",
        }
    }

    fn state_flag(self) -> &'static str {
        match self {
            Self::Web => "-setwebproxystate",
            Self::SecureWeb => "-setsecurewebproxystate",
            Self::Socks => "-setsocksfirewallproxystate",
        }
    }
}

pub struct NetworkSetupBackend<R> {
    runner: R,
}

impl<R: CommandRunner> NetworkSetupBackend<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    fn networksetup(&self, args: &[&str]) -> Result<String> {
        self.runner.run(NETWORKSETUP, args)
    }

    // 设置某一协议的代理地址并切换开关
    fn set_proxy(&self, service: &str, kind: ProxyKind, host: &str, port: &str) -> Result<()> {
        self.networksetup(&[kind.target_flag(), service, host, port])?;
        self.networksetup(&[kind.state_flag(), service, "on"])?;
        Ok(())
    }

    fn set_proxy_state(&self, service: &str, kind: ProxyKind, state: &str) -> Result<()> {
        self.networksetup(&[kind.state_flag(), service, state])?;
        Ok(())
    }

    // networksetup 以空格分隔的参数接收绕过列表
    fn set_bypass(&self, service: &str, domains: &[String]) -> Result<()> {
        let mut args = vec!["-setproxybypassdomains", service];
        args.extend(domains.iter().map(String::as_str));
        self.networksetup(&args)?;
        Ok(())
    }

    fn enable_service(&self, service: &str, host: &str, port: &str, bypass: &[String]) -> Vec<TargetFailure> {
        let mut failures = Vec::new();

        for kind in PROXY_KINDS {
            if let Err(e) = self.set_proxy(service, kind, host, port) {
                failures.push(TargetFailure::new(
                    service,
                    format!("{} 代理设置", kind.label()),
                    e,
                ));
            }
        }

        if !bypass.is_empty()
            && let Err(e) = self.set_bypass(service, bypass)
        {
            failures.push(TargetFailure::new(service, "绕过列表设置", e));
        }

        failures
    }

    fn disable_service(&self, service: &str) -> Vec<TargetFailure> {
        PROXY_KINDS
            .iter()
            .filter_map(|kind| {
                self.set_proxy_state(service, *kind, "off")
                    .err()
                    .map(|e| TargetFailure::new(service, format!("{} 代理关闭", kind.label()), e))
            })
            .collect()
    }
}

impl<R: CommandRunner> ProxyBackend for NetworkSetupBackend<R> {
    fn name(&self) -> &'static str {
        "macos-networksetup"
    }

    fn list_targets(&self) -> Result<Vec<String>> {
        let output = self.networksetup(&["-listallnetworkservices"])?;
        let services = parse_network_services(&output);

        if services.is_empty() {
            return Err(ProxyError::NoTargets);
        }

        log::debug!("找到 {} 个网络服务：{:?}", services.len(), services);
        Ok(services)
    }

    fn apply(&self, config: &ProxyConfig) -> Result<ApplyReport> {
        if !config.enabled {
            return self.clear();
        }

        let (host, port) = config.host_port()?;
        let bypass = config.bypass_entries();
        let services = self.list_targets()?;

        log::info!("正在为 {} 个网络服务设置代理：{}:{}", services.len(), host, port);

        let mut report = ApplyReport::default();
        for service in &services {
            let failures = self.enable_service(service, host, port, &bypass);
            if !failures.is_empty() {
                log::warn!("网络服务 {} 代理设置失败 {} 项", service, failures.len());
            }
            report.record(service, failures);
        }

        Ok(report)
    }

    fn clear(&self) -> Result<ApplyReport> {
        let services = self.list_targets()?;

        log::info!("正在为 {} 个网络服务关闭代理", services.len());

        let mut report = ApplyReport::default();
        for service in &services {
            let failures = self.disable_service(service);
            report.record(service, failures);
        }

        Ok(report)
    }

    // 只读取第一个网络服务，不对多个服务的差异做调和
    fn query(&self) -> Result<ProxyConfig> {
        let services = self.list_targets()?;
        let service = services.first().ok_or(ProxyError::NoTargets)?;

        let output = self
            .networksetup(&["-getwebproxy", service])
            .map_err(|e| ProxyError::query(service.as_str(), e))?;
        let web_proxy = parse_web_proxy(&output);

        // 绕过列表读取失败不影响主状态
        let bypass = match self.networksetup(&["-getproxybypassdomains", service]) {
            Ok(output) => parse_bypass_domains(&output),
            Err(e) => {
                log::warn!("读取 {} 的绕过列表失败：{}", service, e);
                String::new()
            }
        };

        let server = if web_proxy.server.is_empty() || web_proxy.port.is_empty() {
            String::new()
        } else {
            format!("{}:{}", web_proxy.server, web_proxy.port)
        };

        Ok(ProxyConfig {
            enabled: web_proxy.enabled,
            server,
            bypass,
        })
    }

    fn watch_spec(&self) -> Option<WatchSpec> {
        Some(WatchSpec {
            dir: PathBuf::from(SYSTEM_CONFIGURATION_DIR),
            file_names: WATCHED_FILES.iter().map(|name| name.to_string()).collect(),
        })
    }
}

// 解析 -listallnetworkservices 输出：跳过说明行与已禁用（* 开头）的服务
pub fn parse_network_services(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.contains("(*)"))
        .filter(|line| !line.starts_with('*'))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Default, PartialEq, Eq)]
struct WebProxy {
    enabled: bool,
    server: String,
    port: String,
}

fn parse_web_proxy(output: &str) -> WebProxy {
    let mut proxy = WebProxy::default();

    for line in output.lines().map(str::trim) {
        if let Some(value) = line.strip_prefix("Enabled:") {
            proxy.enabled = value.trim() == "Yes";
        } else if let Some(value) = line.strip_prefix("Server:") {
            proxy.server = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("Port:") {
            proxy.port = value.trim().to_string();
        }
    }

    proxy
}

// 每行一个域名，转换为逗号分隔
fn parse_bypass_domains(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() || trimmed.starts_with(NO_BYPASS_DOMAINS) {
        return String::new();
    }

    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::super::testing::FakeNetworkSetup;
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_parse_network_services_skips_header_and_disabled() {
        let output = "An asterisk (*) denotes that a network service is disabled.\n\
                      Wi-Fi\n\
                      *Bluetooth PAN\n\
                      Thunderbolt Bridge\n\n";

        assert_eq!(
            parse_network_services(output),
            vec!["Wi-Fi".to_string(), "Thunderbolt Bridge".to_string()]
        );
    }

    #[test]
    fn test_parse_web_proxy_ignores_authenticated_flag() {
        let output = "Enabled: Yes\nServer: 127.0.0.1\nPort: 7890\nAuthenticated Proxy Enabled: 0\n";
        let proxy = parse_web_proxy(output);

        assert!(proxy.enabled);
        assert_eq!(proxy.server, "127.0.0.1");
        assert_eq!(proxy.port, "7890");
    }

    #[test]
    fn test_parse_bypass_domains() {
        assert_eq!(
            parse_bypass_domains("There aren't any bypass domains set on Wi-Fi.\n"),
            ""
        );
        assert_eq!(parse_bypass_domains("localhost\n*.local\n"), "localhost,*.local");
    }

    #[test]
    fn test_set_then_get_round_trip_on_single_service() {
        let fake = Arc::new(FakeNetworkSetup::new(&["Wi-Fi"]));
        let backend = NetworkSetupBackend::new(fake.clone());

        let report = backend
            .apply(&ProxyConfig::enabled("127.0.0.1:7890", "localhost,*.local"))
            .unwrap();
        assert_eq!(report.applied, vec!["Wi-Fi".to_string()]);
        assert!(report.failures.is_empty());

        let live = backend.query().unwrap();
        assert!(live.enabled);
        assert_eq!(live.server, "127.0.0.1:7890");
        assert_eq!(live.bypass, "localhost,*.local");
    }

    #[test]
    fn test_one_failing_service_is_reported_by_name() {
        let fake = Arc::new(FakeNetworkSetup::new(&["Wi-Fi", "Ethernet", "USB LAN"]));
        fake.fail_service("Ethernet");
        let backend = NetworkSetupBackend::new(fake.clone());

        let report = backend
            .apply(&ProxyConfig::enabled("127.0.0.1:7890", ""))
            .unwrap();

        assert_eq!(report.applied, vec!["Wi-Fi".to_string(), "USB LAN".to_string()]);
        let failures = report.into_failures();
        assert_eq!(failures.targets(), vec!["Ethernet"]);
        // HTTP、HTTPS、SOCKS 三项都失败
        assert_eq!(failures.len(), 3);
    }

    #[test]
    fn test_bypass_only_set_when_present() {
        let fake = Arc::new(FakeNetworkSetup::new(&["Wi-Fi"]));
        let backend = NetworkSetupBackend::new(fake.clone());

        backend
            .apply(&ProxyConfig::enabled("127.0.0.1:7890", ""))
            .unwrap();
        assert_eq!(fake.bypass("Wi-Fi"), Vec::<String>::new());

        backend
            .apply(&ProxyConfig::enabled("127.0.0.1:7890", "10.0.0.0/8, localhost"))
            .unwrap();
        assert_eq!(
            fake.bypass("Wi-Fi"),
            vec!["10.0.0.0/8".to_string(), "localhost".to_string()]
        );
    }

    #[test]
    fn test_clear_turns_every_protocol_off() {
        let fake = Arc::new(FakeNetworkSetup::new(&["Wi-Fi", "Ethernet"]));
        let backend = NetworkSetupBackend::new(fake.clone());

        backend
            .apply(&ProxyConfig::enabled("127.0.0.1:7890", ""))
            .unwrap();
        let report = backend.clear().unwrap();

        assert_eq!(report.applied.len(), 2);
        for service in ["Wi-Fi", "Ethernet"] {
            for flag in ["-setwebproxy", "-setsecurewebproxy", "-setsocksfirewallproxy"] {
                assert_eq!(fake.proxy_enabled(service, flag), Some(false));
            }
        }
        assert!(!backend.query().unwrap().enabled);
    }

    #[test]
    fn test_query_without_services_is_an_error() {
        let fake = Arc::new(FakeNetworkSetup::new(&[]));
        let backend = NetworkSetupBackend::new(fake);

        assert!(matches!(backend.query(), Err(ProxyError::NoTargets)));
    }
}
