//! 业务能力层（Services）
//!
//! 每个服务描述"我能做什么"，只处理单个对象，不关心流程顺序。

pub mod artifact_store;
pub mod llm_service;
pub mod platform;
pub mod prompts;
pub mod reference;
pub mod retry;
pub mod schema_matcher;
pub mod warn_writer;

pub use artifact_store::{ArtifactStore, PublishChannel};
pub use llm_service::{ChatRole, ChatTurn, Completion, CompletionParams, LanguageModel, OpenAiModel};
pub use platform::{LocalPlatform, PublishReceipt, SubmissionPlatform};
pub use reference::{FsReferenceLoader, ReferenceLoader, SourceDocument};
pub use retry::{call_with_retry, Attempted, RetryPolicy};
pub use schema_matcher::reconcile;
pub use warn_writer::WarnWriter;
