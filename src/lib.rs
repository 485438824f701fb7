//! # Auto Marker
//!
//! 一个用于作业自动批改的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 数据与解析（Models / Parser）
//! - `models/` - 题目编号、题目树、题目清单、提交、批改结果、警告
//! - `parser/` - 把 Markdown / LaTeX 作答解析成题目树
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，不关心流程
//! - `ArtifactStore` - 产物目录与原子写入
//! - `SubmissionPlatform` / `ReferenceLoader` - 拉取提交、发布结果、读取参考材料
//! - `LanguageModel` - LLM 对话能力
//! - `reconcile` - 题目树与题目清单对齐
//! - `WarnWriter` - 写阶段警告日志能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义阶段约定和"一道题"的批改流程
//! - `MarkingCtx` - 上下文封装（submission_id + problem_id）
//! - `ProblemFlow` - 多轮批改对话（prompt → LLM → 评判 → trace）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/stage_controller` - 阶段控制器，管理依赖和统计
//! - `orchestrator/mark_scheduler` - 批改调度器，管理并发和屏障
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::MarkerConfig;
pub use models::{ProblemId, ProblemTree, SchemaExpectation};
pub use orchestrator::{App, Collaborators, RunOptions, StageStats};
pub use workflow::{MarkingCtx, ProblemFlow, Stage};
