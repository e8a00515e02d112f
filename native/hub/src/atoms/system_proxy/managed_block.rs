// Shell 启动文件中的托管代理块。
//
// 托管块由唯一标记行开头，后跟连续的 export/unset 语句。
// 重写过程固定为：移除旧块 -> 去掉文件末尾空行 -> 追加新块，
// 因此对同一配置重复应用得到的文件内容完全一致。

use super::config::ProxyConfig;

pub const MANAGED_MARKER: &str = "# Proxy settings managed by sysproxy-hub";

const PROXY_KEYS: [&str; 4] = ["http_proxy", "https_proxy", "HTTP_PROXY", "HTTPS_PROXY"];
const BYPASS_KEYS: [&str; 2] = ["no_proxy", "NO_PROXY"];

// 生成托管块：四条核心语句，加上零或两条绕过语句
pub fn render(config: &ProxyConfig) -> Vec<String> {
    let mut lines = vec![MANAGED_MARKER.to_string()];

    if config.enabled {
        let proxy_url = format!("http://{}", config.server);
        lines.extend(
            PROXY_KEYS
                .iter()
                .map(|key| format!("export {}=\"{}\"", key, proxy_url)),
        );

        let bypass = config.bypass_entries().join(",");
        if !bypass.is_empty() {
            lines.extend(
                BYPASS_KEYS
                    .iter()
                    .map(|key| format!("export {}=\"{}\"", key, bypass)),
            );
        }
    } else {
        lines.extend(
            PROXY_KEYS
                .iter()
                .chain(BYPASS_KEYS.iter())
                .map(|key| format!("unset {}", key)),
        );
    }

    lines
}

// 只识别托管块自身写入的六个变量，用户紧随其后的其他语句保持不动
fn is_block_statement(line: &str) -> bool {
    let line = line.trim();
    PROXY_KEYS.iter().chain(BYPASS_KEYS.iter()).any(|key| {
        line.strip_prefix("export ")
            .and_then(|rest| rest.strip_prefix(*key))
            .is_some_and(|rest| rest.starts_with('='))
            || line.strip_prefix("unset ") == Some(*key)
    })
}

// 移除所有托管块，其余内容保持原样
pub fn strip(content: &str) -> Vec<&str> {
    let mut kept = Vec::new();
    let mut in_block = false;

    for line in content.lines() {
        if line.trim() == MANAGED_MARKER {
            in_block = true;
            continue;
        }
        if in_block {
            if is_block_statement(line) {
                continue;
            }
            in_block = false;
        }
        kept.push(line);
    }

    kept
}

// 用新块替换文件内容中的旧块
pub fn rewrite(content: &str, config: &ProxyConfig) -> String {
    let mut body = strip(content);
    while body.last().is_some_and(|line| line.trim().is_empty()) {
        body.pop();
    }

    let mut output = String::new();
    if !body.is_empty() {
        output.push_str(&body.join("\n"));
        output.push_str("\n\n");
    }
    output.push_str(&render(config).join("\n"));
    output.push('\n');
    output
}
