//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责阶段调度、批量处理和统计，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `stage_controller` - 阶段控制器
//! - 管理应用生命周期（初始化、运行）
//! - 按固定顺序执行请求的阶段
//! - 检查每份提交的前置产物
//! - 写阶段警告日志，输出全局统计信息
//!
//! ### `submission_processor` - 单份提交处理器
//! - 抓取落盘、解析对齐、参考材料、组装批改任务
//!
//! ### `mark_scheduler` - 批改调度器
//! - 一道题一个任务，全部同时派发
//! - 每份提交的任务全部结束后交付结果
//!
//! ### `assembler` - 结果汇总器
//! - 拼出自动版与人工复核版 Markdown
//!
//! ## 层次关系
//!
//! ```text
//! stage_controller (处理 Vec<Stage>)
//!     ↓
//! submission_processor / mark_scheduler (处理 Vec<Submission>)
//!     ↓
//! workflow::ProblemFlow (处理单道题)
//!     ↓
//! services (能力层：store / platform / llm / retry / warn)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：控制器管阶段，处理器管单份提交
//! 2. **资源隔离**：只有编排层持有信号量和外部协作者
//! 3. **向下依赖**：编排层 → workflow → services → models
//! 4. **失败隔离**：单份提交的失败只计入统计，不中止阶段

pub mod assembler;
pub mod mark_scheduler;
pub mod stage_controller;
pub mod submission_processor;

// 重新导出主要类型
pub use assembler::{assemble, HumanCopy, MarkWriter};
pub use mark_scheduler::{MarkScheduler, MarkSink, MarkStats, SubmissionJobs};
pub use stage_controller::{App, Collaborators, RunOptions, StageStats};
pub use submission_processor::{build_jobs, process_submission, store_archives, FetchStats, ProcessOutcome};
