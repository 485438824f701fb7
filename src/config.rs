//! 程序配置
//!
//! 从 TOML 文件加载，再用环境变量覆盖敏感或常调的项。
//! 任何配置错误（包括题目清单）都在触碰提交之前报出。

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::models::SchemaExpectation;
use crate::services::prompts;

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
pub struct MarkerConfig {
    /// 作业编号，`HW1` 中的 `1`
    pub assignment_id: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub schema: SchemaConfig,
    #[serde(default)]
    pub prompts: PromptTemplates,
}

/// 目录配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// 产物根目录，作业产物在 `<workspace>/HW{n}/` 下
    pub workspace: PathBuf,
    /// 本地平台的收件目录（每个提交一个子目录）
    pub inbox: PathBuf,
    /// 本地平台的发布目录
    pub outbox: PathBuf,
    /// 参考答案与题目描述所在目录
    pub reference: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("workspace"),
            inbox: PathBuf::from("inbox"),
            outbox: PathBuf::from("outbox"),
            reference: PathBuf::from("reference"),
        }
    }
}

/// LLM 配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_base_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            model_name: "gpt-4o".to_string(),
            temperature: 0.5,
            max_tokens: 4096,
        }
    }
}

/// 调度配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 同时在途的模型调用上限（全局唯一的并发旋钮）
    pub max_in_flight: usize,
    /// 每次模型调用的最大尝试次数
    pub max_attempts: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            max_attempts: 5,
            backoff_base_ms: 2_000,
            backoff_max_ms: 120_000,
        }
    }
}

/// 题目清单
#[derive(Clone, Debug, Deserialize)]
pub struct SchemaConfig {
    /// 每行一章，如 `chapter 1: 1, 2, 4(1)(2)`
    pub problems: String,
}

/// 批改提示词模板
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PromptTemplates {
    #[serde(rename = "no_subproblem_template")]
    pub no_subproblem: String,
    #[serde(rename = "subproblem_first_round_template")]
    pub subproblem_first_round: String,
    #[serde(rename = "subproblem_round_template")]
    pub subproblem_round: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            no_subproblem: prompts::DEFAULT_NO_SUBPROBLEM.to_string(),
            subproblem_first_round: prompts::DEFAULT_SUBPROBLEM_FIRST_ROUND.to_string(),
            subproblem_round: prompts::DEFAULT_SUBPROBLEM_ROUND.to_string(),
        }
    }
}

impl MarkerConfig {
    /// 读取配置文件并应用环境变量覆盖
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.with_env_overrides()
    }

    /// 环境变量覆盖：`LLM_API_KEY`、`LLM_API_BASE_URL`、`LLM_MODEL_NAME`、`MAX_IN_FLIGHT`
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            self.llm.api_key = v;
        }
        if let Ok(v) = std::env::var("LLM_API_BASE_URL") {
            self.llm.api_base_url = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL_NAME") {
            self.llm.model_name = v;
        }
        if let Ok(v) = std::env::var("MAX_IN_FLIGHT") {
            self.scheduler.max_in_flight =
                v.parse().map_err(|_| ConfigError::EnvVarParseFailed {
                    var_name: "MAX_IN_FLIGHT",
                    value: v.clone(),
                    expected_type: "usize",
                })?;
        }
        Ok(self)
    }

    /// 校验配置并解析题目清单
    pub fn validate(&self) -> Result<SchemaExpectation, ConfigError> {
        if self.assignment_id.is_empty() || !self.assignment_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::InvalidValue {
                field: "assignment_id",
                reason: format!("'{}' 不是作业编号（应为数字）", self.assignment_id),
            });
        }
        if self.scheduler.max_in_flight == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.max_in_flight",
                reason: "至少为 1".to_string(),
            });
        }
        if self.scheduler.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.max_attempts",
                reason: "至少为 1".to_string(),
            });
        }
        if self.scheduler.backoff_base_ms > self.scheduler.backoff_max_ms {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.backoff_base_ms",
                reason: "不能大于 backoff_max_ms".to_string(),
            });
        }
        for (field, template) in [
            ("prompts.no_subproblem_template", &self.prompts.no_subproblem),
            (
                "prompts.subproblem_first_round_template",
                &self.prompts.subproblem_first_round,
            ),
            ("prompts.subproblem_round_template", &self.prompts.subproblem_round),
        ] {
            if template.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "模板不能为空".to_string(),
                });
            }
        }
        SchemaExpectation::parse(&self.schema.problems)
    }

    /// 需要调用模型的阶段才检查密钥
    pub fn require_api_key(&self) -> Result<(), ConfigError> {
        if self.llm.api_key.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "llm.api_key",
            });
        }
        Ok(())
    }

    /// 作业目录名 `HW{n}`
    pub fn homework_dir_name(&self) -> String {
        format!("HW{}", self.assignment_id)
    }
}
