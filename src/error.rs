//! 错误类型
//!
//! 按恢复粒度划分：
//! - `ConfigError`：配置或题目清单有误，整个运行在触碰任何提交之前中止
//! - `SubmissionError`：单个提交的完整性问题，该提交在本阶段被跳过
//! - `LlmError` / `PlatformError`：外部调用失败，区分可重试与不可重试
//! - `DependencyError`：阶段的前置产物不存在
//! - `StoreError`：产物读写失败

use std::path::PathBuf;
use thiserror::Error;

use crate::workflow::Stage;

/// 配置错误
///
/// 题目清单是之后所有保证的基础，因此任何不一致都是致命的。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("无法读取配置文件 {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("配置文件 {path} 解析失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// 必填字段缺失
    #[error("缺少必填配置项: {field}")]
    MissingField { field: &'static str },
    /// 字段取值非法
    #[error("配置项 {field} 取值非法: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    /// 题目清单某一行无法解析
    #[error("题目清单第 {line} 行无法解析 ('{text}'): {reason}")]
    SchemaSyntax {
        line: usize,
        text: String,
        reason: String,
    },
    /// 题目清单内部不一致
    #[error("题目清单不一致: {0}")]
    SchemaInconsistent(String),
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: &'static str,
        value: String,
        expected_type: &'static str,
    },
}

/// 提交完整性错误
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// 标题格式不符合 `HW1-学号-姓名`
    #[error("提交标题格式错误: '{title}'")]
    BadTitle { title: String },
    /// 同一学生的重复提交
    #[error("学生 {student_id} 的重复提交 '{title}'，保留先到的一份")]
    Duplicate { student_id: String, title: String },
    /// 压缩包中可识别的源文件不是恰好一个
    #[error("提交 {submission_id} 的压缩包包含 {found} 个可识别源文件 ({names:?})，需要恰好 1 个")]
    MalformedArchive {
        submission_id: String,
        found: usize,
        names: Vec<String>,
    },
    /// 条目路径会逃出提交目录（`..`、绝对路径）
    #[error("提交 {submission_id} 的压缩包包含越界路径 {names:?}")]
    EscapingEntry {
        submission_id: String,
        names: Vec<String>,
    },
}

/// LLM 调用错误
#[derive(Debug, Error)]
pub enum LlmError {
    /// 可重试的失败（超时、限流、网络、服务端 5xx）
    #[error("LLM 调用暂时失败 (模型: {model}): {message}")]
    Transient { model: String, message: String },
    /// 不可重试的失败（请求被拒绝等）
    #[error("LLM 调用被拒绝 (模型: {model}): {message}")]
    Rejected { model: String, message: String },
    /// 返回内容为空
    #[error("LLM 返回内容为空 (模型: {model})")]
    EmptyContent { model: String },
}

/// 提交平台错误
#[derive(Debug, Error)]
pub enum PlatformError {
    /// 可重试的失败
    #[error("平台调用暂时失败 ({endpoint}): {message}")]
    Transient { endpoint: String, message: String },
    /// 不可重试的失败
    #[error("平台调用失败 ({endpoint}): {message}")]
    Rejected { endpoint: String, message: String },
    /// 本地 IO 失败
    #[error("平台本地文件操作失败 ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 阶段依赖错误：前置阶段的产物不存在
#[derive(Debug, Error)]
#[error("阶段 {stage} 无法处理提交 {submission_id}: 缺少前置产物 {missing}")]
pub struct DependencyError {
    pub stage: Stage,
    pub submission_id: String,
    pub missing: PathBuf,
}

/// 产物存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 读取失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 写入失败
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// JSON 编解码失败
    #[error("JSON 处理失败 ({path}): {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PlatformError {
    /// 本地文件操作失败按种类归类：中断、超时可重试，权限不足不可重试
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let path = path.into();
        match source.kind() {
            ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => PlatformError::Transient {
                endpoint: path.display().to_string(),
                message: source.to_string(),
            },
            ErrorKind::PermissionDenied => PlatformError::Rejected {
                endpoint: path.display().to_string(),
                message: source.to_string(),
            },
            _ => PlatformError::Io { path, source },
        }
    }
}

/// 判断一次外部调用失败是否值得重试
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transient { .. })
    }
}

impl Transient for PlatformError {
    fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Transient { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_platform_io_failures_classified_by_kind() {
        let timed_out = PlatformError::from_io("/inbox", IoError::new(ErrorKind::TimedOut, "挂载点无响应"));
        assert!(matches!(timed_out, PlatformError::Transient { .. }));
        assert!(timed_out.is_transient());

        let denied = PlatformError::from_io("/outbox/a.md", IoError::from(ErrorKind::PermissionDenied));
        assert!(matches!(denied, PlatformError::Rejected { ref endpoint, .. } if endpoint == "/outbox/a.md"));
        assert!(!denied.is_transient());

        let missing = PlatformError::from_io("/inbox", IoError::from(ErrorKind::NotFound));
        assert!(matches!(missing, PlatformError::Io { .. }));
        assert!(!missing.is_transient());
    }
}
