//! 批改上下文
//!
//! 封装"我正在批改哪份提交的哪道题"这一信息

use std::fmt::Display;

use crate::models::ProblemId;

/// 批改上下文
#[derive(Debug, Clone)]
pub struct MarkingCtx {
    /// 提交编号（学号）
    pub submission_id: String,

    /// 题目编号
    pub problem_id: ProblemId,
}

impl MarkingCtx {
    pub fn new(submission_id: impl Into<String>, problem_id: ProblemId) -> Self {
        Self {
            submission_id: submission_id.into(),
            problem_id,
        }
    }
}

impl Display for MarkingCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[提交 {} 题目 {}]", self.submission_id, self.problem_id)
    }
}
