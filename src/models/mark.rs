//! 批改结果

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use super::problem_id::ProblemId;

static SCORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:得分|分数|score)\s*[:：]\s*\**\s*(\d+(?:\.\d+)?)\s*(?:/\s*(\d+(?:\.\d+)?))?")
        .expect("score regex")
});

static QUALITATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:结论|判定|verdict)\s*[:：]\s*\**\s*([^\n*]+)").expect("verdict regex")
});

/// 评判结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    Score { value: f64, out_of: Option<f64> },
    Qualitative { text: String },
}

impl Verdict {
    /// 从模型回复中抽取评判，分数优先
    pub fn extract(response: &str) -> Option<Self> {
        if let Some(caps) = SCORE_RE.captures(response) {
            let value = caps[1].parse().ok()?;
            let out_of = caps.get(2).and_then(|m| m.as_str().parse().ok());
            return Some(Verdict::Score { value, out_of });
        }
        QUALITATIVE_RE.captures(response).and_then(|caps| {
            let text = caps[1].trim().to_string();
            (!text.is_empty()).then_some(Verdict::Qualitative { text })
        })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Score {
                value,
                out_of: Some(total),
            } => write!(f, "{}/{}", value, total),
            Verdict::Score { value, out_of: None } => write!(f, "{}", value),
            Verdict::Qualitative { text } => f.write_str(text),
        }
    }
}

/// 一轮对话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTrace {
    pub round: usize,
    /// 本轮针对的子题标签，首轮读题或无子题时为空
    pub subproblem: Option<String>,
    pub prompt: String,
    pub reasoning: Option<String>,
    pub response: String,
}

/// 子题反馈
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubFeedback {
    pub label: String,
    pub verdict: Option<Verdict>,
    pub feedback: String,
}

/// 一道题的批改结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkResult {
    pub problem_id: ProblemId,
    pub success: bool,
    pub verdict: Option<Verdict>,
    /// 总体反馈；失败时是错误信息
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_feedback: Vec<SubFeedback>,
    pub trace: Vec<RoundTrace>,
    pub attempts: usize,
}

impl MarkResult {
    pub fn failed(problem_id: ProblemId, message: impl Into<String>, attempts: usize) -> Self {
        Self {
            problem_id,
            success: false,
            verdict: None,
            feedback: message.into(),
            sub_feedback: Vec::new(),
            trace: Vec::new(),
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_score() {
        let v = Verdict::extract("分析……\n**得分：** 8/10\n").unwrap();
        assert_eq!(
            v,
            Verdict::Score {
                value: 8.0,
                out_of: Some(10.0)
            }
        );
        assert_eq!(v.to_string(), "8/10");

        let v = Verdict::extract("Score: 7.5").unwrap();
        assert_eq!(v.to_string(), "7.5");
    }

    #[test]
    fn test_extract_qualitative() {
        let v = Verdict::extract("结论：正确\n理由……").unwrap();
        assert_eq!(v.to_string(), "正确");
        assert_eq!(Verdict::extract("没有结论"), None);
    }
}
