//! 警告记录
//!
//! 警告从不中止所属提交的处理。每个阶段调用都拿到一个显式的 `WarningSink`，
//! 阶段结束时把收集到的警告交还给调用方，由调用方写入阶段日志。

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use super::problem_id::ProblemId;

/// 警告类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningCategory {
    /// 题目清单要求但提交中缺失
    MissingSubproblem,
    /// 提交中存在但题目清单未要求
    ExtraSubproblem,
    /// 压缩包内容不符合要求
    MalformedArchive,
    /// 同一学生的重复提交
    DuplicateSubmission,
    /// 提交标题格式错误
    BadTitleFormat,
    /// 可选内容格式有误（无标题表格、被丢弃的图片、未闭合的代码块等）
    MalformedContent,
    /// 已存在的人工批改副本被保留未动
    HumanCopyRetained,
}

impl WarningCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCategory::MissingSubproblem => "missing-subproblem",
            WarningCategory::ExtraSubproblem => "extra-subproblem",
            WarningCategory::MalformedArchive => "malformed-archive",
            WarningCategory::DuplicateSubmission => "duplicate-submission",
            WarningCategory::BadTitleFormat => "bad-title-format",
            WarningCategory::MalformedContent => "malformed-content",
            WarningCategory::HumanCopyRetained => "human-copy-retained",
        }
    }
}

impl fmt::Display for WarningCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条警告
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub submission_id: Option<String>,
    pub problem_id: Option<ProblemId>,
    pub category: WarningCategory,
    pub message: String,
}

impl Warning {
    pub fn new(category: WarningCategory, message: impl Into<String>) -> Self {
        Self {
            submission_id: None,
            problem_id: None,
            category,
            message: message.into(),
        }
    }

    pub fn with_problem(mut self, problem_id: ProblemId) -> Self {
        self.problem_id = Some(problem_id);
        self
    }

    pub fn with_submission(mut self, submission_id: impl Into<String>) -> Self {
        self.submission_id = Some(submission_id.into());
        self
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.category)?;
        if let Some(submission_id) = &self.submission_id {
            write!(f, " 提交 {}", submission_id)?;
        }
        if let Some(problem_id) = &self.problem_id {
            write!(f, " 题目 {}", problem_id)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// 警告收集器
///
/// 绑定了提交编号的收集器会给没有提交编号的警告补上编号。
/// 只有阶段级的收集器会把警告打到日志里，内部收集器的警告由上层转交后再打印。
#[derive(Debug, Default)]
pub struct WarningSink {
    submission_id: Option<String>,
    log: bool,
    warnings: Vec<Warning>,
}

impl WarningSink {
    /// 不属于任何提交的收集器（解析器、匹配器内部使用）
    pub fn detached() -> Self {
        Self::default()
    }

    /// 属于某个提交的收集器
    pub fn for_submission(submission_id: impl Into<String>) -> Self {
        Self {
            submission_id: Some(submission_id.into()),
            log: true,
            warnings: Vec::new(),
        }
    }

    /// 作业级（不属于单个提交）的收集器
    pub fn for_assignment() -> Self {
        Self {
            submission_id: None,
            log: true,
            warnings: Vec::new(),
        }
    }

    pub fn push(&mut self, mut warning: Warning) {
        if warning.submission_id.is_none() {
            warning.submission_id = self.submission_id.clone();
        }
        if self.log {
            warn!("⚠️ {}", warning);
        }
        self.warnings.push(warning);
    }

    /// 记录一条警告
    pub fn warn(
        &mut self,
        category: WarningCategory,
        problem_id: Option<&ProblemId>,
        message: impl Into<String>,
    ) {
        let mut warning = Warning::new(category, message);
        warning.problem_id = problem_id.cloned();
        self.push(warning);
    }

    pub fn extend(&mut self, warnings: impl IntoIterator<Item = Warning>) {
        for warning in warnings {
            self.push(warning);
        }
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    /// 某类警告的数量
    pub fn count(&self, category: WarningCategory) -> usize {
        self.warnings
            .iter()
            .filter(|w| w.category == category)
            .count()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn into_vec(self) -> Vec<Warning> {
        self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_stamps_submission_id() {
        let mut sink = WarningSink::for_submission("2300017000");
        sink.warn(
            WarningCategory::MissingSubproblem,
            Some(&ProblemId::new("1", "1").child("2")),
            "缺少子题",
        );
        sink.push(Warning::new(WarningCategory::BadTitleFormat, "x").with_submission("other"));

        let warnings = sink.into_vec();
        assert_eq!(warnings[0].submission_id.as_deref(), Some("2300017000"));
        assert_eq!(warnings[1].submission_id.as_deref(), Some("other"));
        assert_eq!(
            warnings[0].to_string(),
            "[missing-subproblem] 提交 2300017000 题目 chap1.prob1(2): 缺少子题"
        );
    }

    #[test]
    fn test_category_serializes_kebab_case() {
        let json = serde_json::to_string(&WarningCategory::ExtraSubproblem).unwrap();
        assert_eq!(json, "\"extra-subproblem\"");
    }
}
