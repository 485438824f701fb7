//! 题目清单
//!
//! 每章一行：
//!
//! ```text
//! chapter 1: 1, 2, 3, 4(1)(2)
//! chapter 2: 1, 2{3}, extra
//! ```
//!
//! `4(1)(2)` 表示第 4 题有带标签的子题 (1)、(2)；
//! `2{3}` 表示第 2 题是分类讨论，需要 3 个顶层分支，按位置匹配。

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use super::problem_id::ProblemId;
use crate::error::ConfigError;

static CHAPTER_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^chapter\s+([0-9A-Za-z_]+)\s*[:：]\s*(.*)$").expect("chapter line regex")
});

static ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+|extra)((?:\([^()\s]+\))*)(?:\{([0-9]+)\})?$").expect("schema item regex")
});

static SUB_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([^()\s]+)\)").expect("sub label regex"));

/// 一道题期望的形状
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProblemShape {
    /// 没有要求子题
    Plain,
    /// 要求这些带标签的子题
    Labelled(Vec<String>),
    /// 分类讨论，要求这么多个顶层分支
    Outline(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemSchema {
    pub label: String,
    pub shape: ProblemShape,
}

impl ProblemSchema {
    /// 该题要求的子题标签（分类讨论按位置编号 1..=n）
    pub fn sub_labels(&self) -> Vec<String> {
        match &self.shape {
            ProblemShape::Plain => Vec::new(),
            ProblemShape::Labelled(labels) => labels.clone(),
            ProblemShape::Outline(n) => (1..=*n).map(|k| k.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterSchema {
    pub id: String,
    pub problems: Vec<ProblemSchema>,
}

/// 一次作业的题目清单，只读
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaExpectation {
    pub chapters: Vec<ChapterSchema>,
}

impl SchemaExpectation {
    /// 解析题目清单
    ///
    /// 空行和 `#` 开头的注释行被跳过；其余任何无法解析或不一致之处都是致命错误。
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut chapters: Vec<ChapterSchema> = Vec::new();
        let mut seen_chapters = HashSet::new();

        for (index, raw_line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let syntax_error = |reason: &str| ConfigError::SchemaSyntax {
                line: line_no,
                text: line.to_string(),
                reason: reason.to_string(),
            };

            let caps = CHAPTER_LINE_RE
                .captures(line)
                .ok_or_else(|| syntax_error("应为 'chapter <编号>: <题目列表>'"))?;
            let chapter_id = caps[1].to_string();
            if !seen_chapters.insert(chapter_id.clone()) {
                return Err(syntax_error("章节重复"));
            }

            let mut problems = Vec::new();
            let mut seen_problems = HashSet::new();
            for item in caps[2].split([',', '，']) {
                let item: String = item.chars().filter(|c| !c.is_whitespace()).collect();
                if item.is_empty() {
                    continue;
                }
                let problem = parse_item(&item).map_err(|reason| syntax_error(&reason))?;
                if !seen_problems.insert(problem.label.clone()) {
                    return Err(syntax_error(&format!("题目 {} 重复", problem.label)));
                }
                problems.push(problem);
            }

            if problems.is_empty() {
                return Err(syntax_error("该章没有任何题目"));
            }
            chapters.push(ChapterSchema {
                id: chapter_id,
                problems,
            });
        }

        if chapters.is_empty() {
            return Err(ConfigError::SchemaInconsistent(
                "题目清单为空".to_string(),
            ));
        }

        Ok(Self { chapters })
    }

    pub fn chapter(&self, id: &str) -> Option<&ChapterSchema> {
        self.chapters.iter().find(|c| c.id == id)
    }

    pub fn problem(&self, id: &ProblemId) -> Option<&ProblemSchema> {
        self.chapter(&id.chapter)
            .and_then(|c| c.problems.iter().find(|p| p.label == id.problem))
    }

    /// 题目总数
    pub fn problem_count(&self) -> usize {
        self.chapters.iter().map(|c| c.problems.len()).sum()
    }
}

fn parse_item(item: &str) -> Result<ProblemSchema, String> {
    let caps = ITEM_RE
        .captures(item)
        .ok_or_else(|| format!("无法识别的题目 '{}'", item))?;

    let label = caps[1].to_string();
    let labels: Vec<String> = SUB_LABEL_RE
        .captures_iter(&caps[2])
        .map(|c| c[1].to_string())
        .collect();

    let shape = match caps.get(3) {
        Some(_) if !labels.is_empty() => {
            return Err(format!("题目 '{}' 不能同时使用 () 和 {{}}", item));
        }
        Some(count) => {
            let n: usize = count
                .as_str()
                .parse()
                .map_err(|_| format!("分支数量 '{}' 无效", count.as_str()))?;
            if n == 0 {
                return Err(format!("题目 '{}' 的分支数量不能为 0", item));
            }
            ProblemShape::Outline(n)
        }
        None if labels.is_empty() => ProblemShape::Plain,
        None => {
            let mut seen = HashSet::new();
            if let Some(dup) = labels.iter().find(|l| !seen.insert(l.as_str())) {
                return Err(format!("题目 '{}' 的子题 ({}) 重复", item, dup));
            }
            ProblemShape::Labelled(labels)
        }
    };

    Ok(ProblemSchema { label, shape })
}
