//! 流程层（Workflow）
//!
//! - `stage` - 六个阶段及其产物约定
//! - `marking_ctx` - 批改上下文（提交编号 + 题目编号）
//! - `problem_flow` - 一道题的多轮批改对话

pub mod marking_ctx;
pub mod problem_flow;
pub mod stage;

pub use marking_ctx::MarkingCtx;
pub use problem_flow::{render_trace, MarkJob, ProblemFlow};
pub use stage::{Stage, StageState};
