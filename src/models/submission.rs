//! 提交元数据

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use super::mark::MarkResult;
use super::tree::ProblemTree;
use super::warning::Warning;
use crate::error::SubmissionError;

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:HW|hw)\[?(\d+)\]?[-_](\d+)[-_](.+)$").expect("submission title regex")
});

/// 源文件方言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Markdown,
    Tex,
}

impl Dialect {
    /// 根据文件扩展名判断方言
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "md" | "markdown" => Some(Dialect::Markdown),
            "tex" => Some(Dialect::Tex),
            _ => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Markdown => write!(f, "markdown"),
            Dialect::Tex => write!(f, "tex"),
        }
    }
}

/// 解析后的提交标题，形如 `HW1-2300017000-李二`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionTitle {
    pub homework_id: String,
    pub student_id: String,
    pub student_name: String,
}

impl SubmissionTitle {
    pub fn parse(title: &str) -> Result<Self, SubmissionError> {
        let caps = TITLE_RE
            .captures(title.trim())
            .ok_or_else(|| SubmissionError::BadTitle {
                title: title.to_string(),
            })?;
        Ok(Self {
            homework_id: caps[1].to_string(),
            student_id: caps[2].to_string(),
            student_name: caps[3].trim().to_string(),
        })
    }
}

/// 抓取阶段写下的提交清单 `raw/<sid>/submission.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionManifest {
    /// 平台侧的提交编号
    pub platform_id: String,
    pub title: String,
    pub homework_id: String,
    pub student_id: String,
    pub student_name: String,
    /// 过滤后的文件列表（相对 `files/`）
    pub entries: Vec<String>,
}

impl SubmissionManifest {
    /// 本地使用的提交编号：学号
    pub fn submission_id(&self) -> &str {
        &self.student_id
    }
}

/// 处理阶段的产物 `processed/<sid>.json`
///
/// 批改阶段把批改结果补写进来；重新处理会清掉旧的批改结果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSubmission {
    pub submission_id: String,
    pub student_name: String,
    /// 源文件在 `files/` 下的相对路径
    pub source: String,
    pub dialect: Dialect,
    pub tree: ProblemTree,
    pub warnings: Vec<Warning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marks: Option<Vec<MarkResult>>,
}

/// 参考材料（参考答案或题目描述）解析并对齐后的产物
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceMaterial {
    pub source: String,
    pub dialect: Dialect,
    pub tree: ProblemTree,
    pub warnings: Vec<Warning>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_title_variants() {
        let t = SubmissionTitle::parse("HW1-2300017000-李二").unwrap();
        assert_eq!(t.homework_id, "1");
        assert_eq!(t.student_id, "2300017000");
        assert_eq!(t.student_name, "李二");

        let t = SubmissionTitle::parse("hw[3]_2300017001_Zhang San").unwrap();
        assert_eq!(t.homework_id, "3");
        assert_eq!(t.student_name, "Zhang San");
    }

    #[test]
    fn test_bad_title() {
        for bad in ["作业1-2300017000-李二", "HW1-李二", "HW-2300017000-x"] {
            assert!(matches!(
                SubmissionTitle::parse(bad),
                Err(SubmissionError::BadTitle { .. })
            ));
        }
    }

    #[test]
    fn test_dialect_from_path() {
        assert_eq!(Dialect::from_path("a/HW1.MD"), Some(Dialect::Markdown));
        assert_eq!(Dialect::from_path("main.tex"), Some(Dialect::Tex));
        assert_eq!(Dialect::from_path("main.pdf"), None);
    }
}
