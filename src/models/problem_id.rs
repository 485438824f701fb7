//! 题目编号
//!
//! 形如 `chap1.prob4(2)(a)`：第 1 章、第 4 题、子题路径 (2) → (a)。
//! 它是之后所有阶段的连接键。

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static PROBLEM_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^chap([^.]+)\.prob([^()]+)((?:\([^()]+\))*)$").expect("problem id regex")
});

static PATH_SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([^()]+)\)").expect("path segment regex"));

/// 题目编号
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProblemId {
    /// 章节编号
    pub chapter: String,
    /// 题目编号（数字或 `extra`）
    pub problem: String,
    /// 子题路径，空表示题目本身
    pub path: Vec<String>,
}

impl ProblemId {
    /// 创建题目级编号
    pub fn new(chapter: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            chapter: chapter.into(),
            problem: problem.into(),
            path: Vec::new(),
        }
    }

    /// 子节点编号
    pub fn child(&self, label: impl Into<String>) -> Self {
        let mut path = self.path.clone();
        path.push(label.into());
        Self {
            chapter: self.chapter.clone(),
            problem: self.problem.clone(),
            path,
        }
    }

    /// 所属题目的编号（去掉子题路径）
    pub fn problem_root(&self) -> Self {
        Self::new(self.chapter.clone(), self.problem.clone())
    }

    /// 子题深度，题目本身为 0
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    pub fn is_problem(&self) -> bool {
        self.path.is_empty()
    }

    /// 本节点自己的标签
    pub fn label(&self) -> &str {
        self.path.last().unwrap_or(&self.problem)
    }

    /// 用于文件名的形式
    pub fn file_stem(&self) -> String {
        self.to_string()
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '.' | '(' | ')' | '-' | '_' | '~') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for ProblemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chap{}.prob{}", self.chapter, self.problem)?;
        for segment in &self.path {
            write!(f, "({})", segment)?;
        }
        Ok(())
    }
}

/// 题目编号解析失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemIdParseError(pub String);

impl fmt::Display for ProblemIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "无效的题目编号: '{}'", self.0)
    }
}

impl std::error::Error for ProblemIdParseError {}

impl FromStr for ProblemId {
    type Err = ProblemIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = PROBLEM_ID_RE
            .captures(s.trim())
            .ok_or_else(|| ProblemIdParseError(s.to_string()))?;

        let path = PATH_SEGMENT_RE
            .captures_iter(&caps[3])
            .map(|c| c[1].to_string())
            .collect();

        Ok(Self {
            chapter: caps[1].to_string(),
            problem: caps[2].to_string(),
            path,
        })
    }
}

impl TryFrom<String> for ProblemId {
    type Error = ProblemIdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProblemId> for String {
    fn from(value: ProblemId) -> Self {
        value.to_string()
    }
}

impl Ord for ProblemId {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_segment(&self.chapter, &other.chapter)
            .then_with(|| compare_segment(&self.problem, &other.problem))
            .then_with(|| {
                for (a, b) in self.path.iter().zip(other.path.iter()) {
                    let ord = compare_segment(a, b);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                self.path.len().cmp(&other.path.len())
            })
    }
}

impl PartialOrd for ProblemId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 两段都是数字时按数值比较，数字排在非数字之前，其余按字典序
pub fn compare_segment(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let id = ProblemId::new("1", "4").child("2").child("a");
        assert_eq!(id.to_string(), "chap1.prob4(2)(a)");
        assert_eq!("chap1.prob4(2)(a)".parse::<ProblemId>().unwrap(), id);
        assert_eq!(id.label(), "a");
        assert_eq!(id.depth(), 2);
        assert_eq!(id.problem_root(), ProblemId::new("1", "4"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("prob1".parse::<ProblemId>().is_err());
        assert!("chap1.prob".parse::<ProblemId>().is_err());
    }

    #[test]
    fn test_numeric_ordering() {
        let mut ids: Vec<ProblemId> = ["chap2.prob1", "chap1.probextra", "chap1.prob10", "chap1.prob2"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        ids.sort();
        let rendered: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["chap1.prob2", "chap1.prob10", "chap1.probextra", "chap2.prob1"]
        );
    }

    #[test]
    fn test_serde_as_string() {
        let id = ProblemId::new("3", "1").child("b");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"chap3.prob1(b)\"");
        let back: ProblemId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
