// 系统代理错误类型：区分输入错误、部分失败、整体失败与查询失败。

use std::fmt;
use thiserror::Error;

// 单个目标（网络服务、启动文件或设置存储）上的一次失败调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFailure {
    pub target: String,
    pub operation: String,
    pub reason: String,
}

impl TargetFailure {
    pub fn new(
        target: impl Into<String>,
        operation: impl Into<String>,
        reason: impl fmt::Display,
    ) -> Self {
        Self {
            target: target.into(),
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}失败：{}", self.target, self.operation, self.reason)
    }
}

// 聚合后的失败列表，按行拼接，保留每个目标的细节
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Failures(pub Vec<TargetFailure>);

impl Failures {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    // 出现失败的目标名称（去重，保持首次出现顺序）
    pub fn targets(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for failure in &self.0 {
            if !names.contains(&failure.target.as_str()) {
                names.push(failure.target.as_str());
            }
        }
        names
    }
}

impl fmt::Display for Failures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", lines.join("\n"))
    }
}

impl From<Vec<TargetFailure>> for Failures {
    fn from(failures: Vec<TargetFailure>) -> Self {
        Self(failures)
    }
}

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("无效的代理服务器地址 \"{0}\"，应为 host:port")]
    InvalidServer(String),

    #[error("未找到可配置的网络服务")]
    NoTargets,

    #[error("执行 {program} {args} 失败：{reason}")]
    Command {
        program: String,
        args: String,
        reason: String,
    },

    #[error("设置存储{operation}失败：{reason}")]
    Store { operation: String, reason: String },

    #[error("代理设置失败：\n{0}")]
    Apply(Failures),

    #[error("查询 {target} 代理配置失败：{reason}")]
    Query { target: String, reason: String },

    #[error("读取配置失败：{0}")]
    Settings(String),

    #[error("网络变化监听失败：{0}")]
    Watch(String),

    #[error("当前平台不支持系统代理设置")]
    Unsupported,

    #[error("I/O 错误：{0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    pub fn store(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Store {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn query(target: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Query {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
