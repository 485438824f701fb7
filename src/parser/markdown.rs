//! Markdown 方言
//!
//! `##` 开章，`###` 开题，`####` 及更深开子题（深度 = 级别 − 3）。
//! 子题标记依次接受：`(1)`、`extra.`、按缩进嵌套的 `- (a)` 大纲。
//! 其余标题作为额外子题保留并告警。代码块内的标题一律视为正文。

use regex::Regex;
use std::sync::LazyLock;

use super::numerals::{chapter_label, problem_label};
use super::{ChapterDraft, Draft};
use crate::models::{Marker, WarningCategory, WarningSink};

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})[ \t]+(.*?)[ \t#]*$").expect("heading regex"));

static SUB_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[(（]\s*([0-9A-Za-z]+)\s*[)）]\s*[.．、:：]?\s*(.*)$").expect("sub label regex")
});

static SENTINEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^extra\b\s*[.．:：]?\s*(.*)$").expect("sentinel regex"));

static OUTLINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([ \t]*)[-*+][ \t]+[(（]\s*([0-9A-Za-z]+)\s*[)）]\s*(.*)$").expect("outline bullet regex")
});

/// 大纲状态：锚定的标题深度与缩进栈
struct Outline {
    anchor_depth: usize,
    indents: Vec<usize>,
}

struct Splitter<'w> {
    sink: &'w mut WarningSink,
    chapters: Vec<ChapterDraft>,
    /// 章节出现前的正文是否已经告警过
    preamble_warned: bool,
    /// 章节标题与第一题之间的正文是否已经告警过
    chapter_text_warned: bool,
    outline: Option<Outline>,
    fence: Option<&'static str>,
}

/// 把 Markdown 文档切成章节草稿
pub(crate) fn split(text: &str, sink: &mut WarningSink) -> Vec<ChapterDraft> {
    let mut splitter = Splitter {
        sink,
        chapters: Vec::new(),
        preamble_warned: false,
        chapter_text_warned: false,
        outline: None,
        fence: None,
    };
    for line in text.lines() {
        splitter.line(line.trim_end_matches('\r'));
    }
    splitter.chapters
}

impl Splitter<'_> {
    fn line(&mut self, line: &str) {
        if let Some(fence) = self.fence {
            if line.trim_start().starts_with(fence) {
                self.fence = None;
            }
            self.text(line);
            return;
        }
        let trimmed = line.trim_start();
        if let Some(fence) = ["```", "~~~"].into_iter().find(|f| trimmed.starts_with(f)) {
            self.fence = Some(fence);
            self.text(line);
            return;
        }

        if let Some(caps) = HEADING_RE.captures(line) {
            let level = caps[1].len();
            let title = caps[2].trim().to_string();
            self.heading(level, title, line);
            return;
        }

        if let Some(caps) = OUTLINE_RE.captures(line) {
            let indent = indent_width(&caps[1]);
            let label = caps[2].to_string();
            let title = caps[3].trim().to_string();
            if self.outline_item(indent, label, title) {
                return;
            }
        }

        self.text(line);
    }

    fn heading(&mut self, level: usize, title: String, raw: &str) {
        self.outline = None;
        match level {
            1 => {
                // 文档标题；章节内出现时当作正文
                if !self.chapters.is_empty() {
                    self.text(raw);
                }
            }
            2 => {
                self.chapter_text_warned = false;
                self.chapters.push(ChapterDraft {
                    label: chapter_label(&title),
                    title,
                    implicit: false,
                    problems: Vec::new(),
                });
            }
            3 => {
                let draft = match problem_label(&title) {
                    Some((label, rest)) => {
                        let marker = if label == "extra" {
                            Marker::Sentinel
                        } else {
                            Marker::Labelled
                        };
                        Draft::new(0, Some(label), rest, marker)
                    }
                    None => Draft::new(0, None, title.clone(), Marker::Positional).with_note(
                        WarningCategory::MalformedContent,
                        format!("无法识别题号 '{}'，按位置编号", title),
                    ),
                };
                self.open_chapter().problems.push(draft);
            }
            _ => {
                let depth = level - 3;
                self.ensure_problem();
                let draft = sub_heading(depth, &title);
                self.current_chapter_problems().push(draft);
            }
        }
    }

    /// 处理一个 `- (a)` 大纲条目，没有可挂靠的题目时返回 false
    fn outline_item(&mut self, indent: usize, label: String, title: String) -> bool {
        let anchor_depth = match self.chapters.last().and_then(|c| c.problems.last()) {
            Some(last) => last.depth,
            None => return false,
        };

        let outline = self.outline.get_or_insert(Outline {
            anchor_depth,
            indents: Vec::new(),
        });
        while outline.indents.last().is_some_and(|&top| top >= indent) {
            outline.indents.pop();
        }
        let depth = outline.anchor_depth + 1 + outline.indents.len();
        outline.indents.push(indent);

        self.current_chapter_problems()
            .push(Draft::new(depth, Some(label), title, Marker::Outline));
        true
    }

    fn text(&mut self, line: &str) {
        match self.chapters.last_mut() {
            None => {
                if !line.trim().is_empty() && !self.preamble_warned {
                    self.preamble_warned = true;
                    self.sink.warn(
                        WarningCategory::MalformedContent,
                        None,
                        "第一个章节标题之前的内容被忽略",
                    );
                }
            }
            Some(chapter) => match chapter.problems.last_mut() {
                Some(draft) => draft.push_line(line),
                None => {
                    if !line.trim().is_empty() && !self.chapter_text_warned {
                        self.chapter_text_warned = true;
                        let message = format!("章节 '{}' 标题与第一题之间的内容被忽略", chapter.title);
                        self.sink
                            .warn(WarningCategory::MalformedContent, None, message);
                    }
                }
            },
        }
    }

    /// 当前章节；还没有章节时补一个隐式章节
    fn open_chapter(&mut self) -> &mut ChapterDraft {
        if self.chapters.is_empty() {
            self.sink.warn(
                WarningCategory::MalformedContent,
                None,
                "题目出现在任何章节标题之前，归入隐式章节",
            );
            self.chapters.push(ChapterDraft {
                label: None,
                title: String::new(),
                implicit: true,
                problems: Vec::new(),
            });
        }
        let last = self.chapters.len() - 1;
        &mut self.chapters[last]
    }

    /// 子题标题之前必须有题目，没有则补一个按位置编号的题目
    fn ensure_problem(&mut self) {
        let chapter = self.open_chapter();
        if chapter.problems.is_empty() {
            chapter.problems.push(
                Draft::new(0, None, "", Marker::Positional).with_note(
                    WarningCategory::MalformedContent,
                    "子题出现在任何题目标题之前，归入按位置编号的题目",
                ),
            );
        }
    }

    fn current_chapter_problems(&mut self) -> &mut Vec<Draft> {
        &mut self.open_chapter().problems
    }
}

/// 解析 `####` 及更深的标题
fn sub_heading(depth: usize, title: &str) -> Draft {
    if let Some(caps) = SUB_LABEL_RE.captures(title) {
        return Draft::new(depth, Some(caps[1].to_string()), caps[2].trim(), Marker::Labelled);
    }
    if let Some(caps) = SENTINEL_RE.captures(title) {
        return Draft::new(depth, Some("extra".to_string()), caps[1].trim(), Marker::Sentinel);
    }

    let label = sanitize_label(title);
    Draft::new(depth, label, title, Marker::Unrecognized).with_note(
        WarningCategory::ExtraSubproblem,
        format!("无法识别的子题标题 '{}'，作为额外子题保留", title),
    )
}

/// 把无法识别的标题文本变成可用作编号的标签
pub(super) fn sanitize_label(title: &str) -> Option<String> {
    let label: String = title
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | '（' | '）' | '*' | '_' | '`'))
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .collect();
    let label = label.trim_matches('-').to_string();
    (!label.is_empty()).then_some(label)
}

fn indent_width(indent: &str) -> usize {
    indent.chars().map(|c| if c == '\t' { 4 } else { 1 }).sum()
}

#[cfg(test)]
mod tests {
    use super::super::parse;
    use crate::models::{ContentBlock, Dialect, Marker, ProblemId, WarningCategory};

    fn ids(doc: &str) -> Vec<String> {
        let (tree, _) = parse(doc, Dialect::Markdown);
        tree.nodes().iter().map(|n| n.id.to_string()).collect()
    }

    #[test]
    fn test_basic_structure() {
        let doc = "# 作业一\n\n## 第一章\n### 1.\n答案一\n### 2.\n#### (1)\n甲\n#### (2)\n乙\n## 第二章\n### extra.\n附加\n";
        let (tree, warnings) = parse(doc, Dialect::Markdown);
        assert!(warnings.is_empty(), "{:?}", warnings);
        assert_eq!(
            tree.nodes().iter().map(|n| n.id.to_string()).collect::<Vec<_>>(),
            vec![
                "chap1.prob1",
                "chap1.prob2",
                "chap1.prob2(1)",
                "chap1.prob2(2)",
                "chap2.probextra"
            ]
        );
        let extra = tree.find(&ProblemId::new("2", "extra")).unwrap();
        assert_eq!(extra.marker, Marker::Sentinel);
        assert_eq!(extra.own_blocks(), &[ContentBlock::paragraph("附加")]);
    }

    #[test]
    fn test_emphasis_heading_is_extra_node() {
        let doc = "## 第一章\n### 1.\n#### (1)\n甲\n#### 注意\n乙\n";
        let (tree, warnings) = parse(doc, Dialect::Markdown);

        let extra: Vec<_> = warnings
            .iter()
            .filter(|w| w.category == WarningCategory::ExtraSubproblem)
            .collect();
        assert_eq!(extra.len(), 1);
        let node = tree.find(extra[0].problem_id.as_ref().unwrap()).unwrap();
        assert_eq!(node.marker, Marker::Unrecognized);
        assert!(node.flagged);
        assert_eq!(node.own_blocks(), &[ContentBlock::paragraph("乙")]);
    }

    #[test]
    fn test_outline_nesting_by_indent() {
        let doc = "## 第一章\n### 2.\n分类讨论：\n- (a) 当 x>0\n  说明\n  - (i) x>1\n  - (ii) x<=1\n- (b) 当 x<=0\n";
        assert_eq!(
            ids(doc),
            vec![
                "chap1.prob2",
                "chap1.prob2(a)",
                "chap1.prob2(a)(i)",
                "chap1.prob2(a)(ii)",
                "chap1.prob2(b)"
            ]
        );
    }

    #[test]
    fn test_outline_under_sub_heading() {
        let doc = "## 第一章\n### 3.\n#### (2)\n- (a) 一\n- (b) 二\n";
        assert_eq!(
            ids(doc),
            vec!["chap1.prob3", "chap1.prob3(2)", "chap1.prob3(2)(a)", "chap1.prob3(2)(b)"]
        );
    }

    #[test]
    fn test_headings_inside_fence_ignored() {
        let doc = "## 第一章\n### 1.\n```python\n### 2.\n# comment\n```\n";
        assert_eq!(ids(doc), vec!["chap1.prob1"]);
    }

    #[test]
    fn test_preamble_and_implicit_chapter() {
        let doc = "前言\n### 1.\n答";
        let (tree, warnings) = parse(doc, Dialect::Markdown);
        assert_eq!(tree.chapters.len(), 1);
        assert_eq!(tree.chapters[0].id, "1");
        assert_eq!(
            warnings
                .iter()
                .filter(|w| w.category == WarningCategory::MalformedContent)
                .count(),
            2
        );
    }

    #[test]
    fn test_unlabelled_chapter_uses_ordinal() {
        let (tree, warnings) = parse("## 附录\n### 1.\n", Dialect::Markdown);
        assert_eq!(tree.chapters[0].id, "1");
        assert_eq!(warnings.len(), 1);
    }
}
