//! LLM 服务 - 业务能力层
//!
//! 只负责"调用一次模型"能力，不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, DeepSeek, Doubao 等）

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::LlmError;

const SYSTEM_PROMPT: &str = "你是一名严谨、耐心的大学课程助教，负责批改学生作业。";

/// 对话中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// 对话中的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// 采样参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl From<&LlmConfig> for CompletionParams {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// 一次调用的输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// 模型公开推理过程时才有
    pub reasoning: Option<String>,
}

/// 聊天补全响应中用到的部分
///
/// 标准响应类型里没有推理字段，DeepSeek 等服务把推理过程放在 `reasoning_content`
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "reasoning")]
    reasoning_content: Option<String>,
}

impl ChatResponse {
    fn into_completion(self, model: &str) -> Result<Completion, LlmError> {
        let message = self.choices.into_iter().next().map(|choice| choice.message);
        let (content, reasoning) = match message {
            Some(message) => (message.content, message.reasoning_content),
            None => (None, None),
        };
        let text = content
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| LlmError::EmptyContent {
                model: model.to_string(),
            })?;

        Ok(Completion {
            text: text.trim().to_string(),
            reasoning: reasoning
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
        })
    }
}

/// 语言模型
///
/// 职责：
/// - 发送一段对话，返回模型回复
/// - 把失败区分为可重试 / 不可重试
/// - 不重试、不限流，这些由调度器负责
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// 模型名（用于日志和错误信息）
    fn name(&self) -> &str;

    async fn complete(
        &self,
        prompt: &[ChatTurn],
        params: &CompletionParams,
    ) -> Result<Completion, LlmError>;
}

/// 基于 OpenAI 兼容接口的模型
pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl OpenAiModel {
    /// 创建新的模型客户端
    pub fn new(config: &LlmConfig) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.api_key)
            .with_api_base(&config.api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.model_name.clone(),
        }
    }

    fn build_messages(&self, prompt: &[ChatTurn]) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut messages = Vec::with_capacity(prompt.len() + 1);
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_PROMPT)
            .build()?;
        messages.push(ChatCompletionRequestMessage::System(system));

        for turn in prompt {
            let message = match turn.role {
                ChatRole::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(turn.content.as_str())
                        .build()?,
                ),
                ChatRole::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(turn.content.as_str())
                        .build()?,
                ),
            };
            messages.push(message);
        }
        Ok(messages)
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn complete(
        &self,
        prompt: &[ChatTurn],
        params: &CompletionParams,
    ) -> Result<Completion, LlmError> {
        debug!(
            "调用 LLM API，模型: {}，消息数: {}，总长度: {} 字符",
            self.model_name,
            prompt.len(),
            prompt.iter().map(|t| t.content.chars().count()).sum::<usize>()
        );

        let messages = self
            .build_messages(prompt)
            .map_err(|e| classify(&self.model_name, e))?;

        // 构建请求
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(params.temperature)
            .max_tokens(params.max_tokens)
            .build()
            .map_err(|e| classify(&self.model_name, e))?;

        // 调用 API
        let response: ChatResponse = self.client.chat().create_byot(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            classify(&self.model_name, e)
        })?;

        debug!("LLM API 调用成功");

        response.into_completion(&self.model_name)
    }
}

/// 把客户端错误分成可重试和不可重试两类
fn classify(model: &str, error: OpenAIError) -> LlmError {
    let message = error.to_string();
    let transient = match &error {
        OpenAIError::Reqwest(_) => true,
        OpenAIError::ApiError(api) => {
            is_transient_message(&api.message)
                || api.code.as_deref().is_some_and(is_transient_message)
                || api.r#type.as_deref().is_some_and(is_transient_message)
        }
        _ => is_transient_message(&message),
    };
    if transient {
        LlmError::Transient {
            model: model.to_string(),
            message,
        }
    } else {
        LlmError::Rejected {
            model: model.to_string(),
            message,
        }
    }
}

/// 超时、限流、网络、服务端 5xx
fn is_transient_message(message: &str) -> bool {
    const MARKERS: &[&str] = &[
        "rate limit",
        "rate_limit",
        "too many requests",
        "429",
        "timeout",
        "timed out",
        "connection",
        "overloaded",
        "server_error",
        "internal server error",
        "bad gateway",
        "service unavailable",
        "gateway timeout",
        "500",
        "502",
        "503",
        "504",
    ];
    let lower = message.to_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_messages() {
        assert!(is_transient_message("Rate limit reached for requests"));
        assert!(is_transient_message("upstream returned 503 Service Unavailable"));
        assert!(is_transient_message("operation timed out"));
        assert!(!is_transient_message("Invalid API key provided"));
        assert!(!is_transient_message("model not found"));
    }

    #[test]
    fn test_classify_invalid_argument_is_rejected() {
        let error = classify("m", OpenAIError::InvalidArgument("messages 为空".into()));
        assert!(matches!(error, LlmError::Rejected { .. }));
    }

    #[test]
    fn test_response_keeps_reasoning_content() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"id":"x","choices":[{"index":0,"finish_reason":"stop","message":{"role":"assistant","content":" 得分: 9/10 ","reasoning_content":"先检查边界条件"}}]}"#,
        )
        .unwrap();
        let completion = response.into_completion("m").unwrap();
        assert_eq!(completion.text, "得分: 9/10");
        assert_eq!(completion.reasoning.as_deref(), Some("先检查边界条件"));
    }

    #[test]
    fn test_response_without_reasoning_or_content() {
        let plain: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":"好"}}]}"#).unwrap();
        assert_eq!(plain.into_completion("m").unwrap().reasoning, None);

        let empty: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#).unwrap();
        assert!(matches!(
            empty.into_completion("m"),
            Err(LlmError::EmptyContent { .. })
        ));
    }

    #[test]
    fn test_build_messages_keeps_order() {
        let model = OpenAiModel::new(&LlmConfig {
            api_key: "sk-test".into(),
            ..LlmConfig::default()
        });
        let messages = model
            .build_messages(&[
                ChatTurn::user("读题"),
                ChatTurn::assistant("好的"),
                ChatTurn::user("批改 (a)"),
            ])
            .unwrap();
        assert_eq!(messages.len(), 4);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[2], ChatCompletionRequestMessage::Assistant(_)));
    }
}
