//! LaTeX 方言
//!
//! - 去掉未转义的 `%` 注释，只看 `document` 环境的正文
//! - `\section{…}` 开章，章内第一个顶层 `enumerate` 的 `\item[1.]` 是题目
//! - 题目内最后一个顶层 `enumerate` 是子题列表：`\item[(a)]` 用标签，否则按位置编号；
//!   列表前的文字是题目引言，列表后的文字并入最后一个子题
//! - 子题内带标签的嵌套 `enumerate` 继续展开为更深的子题

use regex::Regex;
use std::sync::LazyLock;

use super::numerals::{chapter_label, problem_label};
use super::markdown::sanitize_label;
use super::{ChapterDraft, Draft};
use crate::models::{Marker, WarningCategory, WarningSink};

static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(^|[^\\])%.*$").expect("comment regex"));

static SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\section\*?\s*\{([^}]*)\}").expect("section regex"));

static ITEM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\item\b").expect("item regex"));

static ITEM_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*\[([^\]\n]*)\]").expect("item label regex"));

static ENV_OPTIONS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*\[[^\]]*\]").expect("env options regex"));

static SUB_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[(（]?\s*([0-9A-Za-z]+)\s*[)）.．]?$").expect("tex sub label regex")
});

const ENUMERATE: &str = "enumerate";

/// 环境在文本中的位置
#[derive(Debug, Clone, Copy)]
struct EnvSpan {
    /// `\begin` 的起点
    start: usize,
    /// 正文起点（跳过可选参数）
    content_start: usize,
    /// 正文终点（`\end` 的起点）
    content_end: usize,
    /// `\end{…}` 之后
    end: usize,
}

enum EnvSearch {
    Found(EnvSpan),
    Unclosed,
    Absent,
}

/// 一个顶层 `\item`
#[derive(Debug, Clone)]
struct Item {
    label: Option<String>,
    body: String,
}

/// 把 LaTeX 文档切成章节草稿
pub(crate) fn split(text: &str, sink: &mut WarningSink) -> Vec<ChapterDraft> {
    let text = strip_comments(text);
    let body = match (text.find("\\begin{document}"), text.find("\\end{document}")) {
        (Some(begin), Some(end)) if begin < end => &text[begin + "\\begin{document}".len()..end],
        _ => {
            sink.warn(
                WarningCategory::MalformedContent,
                None,
                "没有找到 document 环境，按全文解析",
            );
            text.as_str()
        }
    };

    let sections: Vec<_> = SECTION_RE.captures_iter(body).collect();
    if sections.is_empty() {
        sink.warn(
            WarningCategory::MalformedContent,
            None,
            "没有找到 \\section，全文归入隐式章节",
        );
        let mut chapter = ChapterDraft {
            implicit: true,
            ..Default::default()
        };
        chapter.problems = split_chapter(body, "", sink);
        return vec![chapter];
    }

    let first_start = sections[0].get(0).map_or(0, |m| m.start());
    if !body[..first_start].trim().is_empty() {
        sink.warn(
            WarningCategory::MalformedContent,
            None,
            "第一个 \\section 之前的内容被忽略",
        );
    }

    let mut chapters = Vec::with_capacity(sections.len());
    for (index, caps) in sections.iter().enumerate() {
        let title = caps[1].trim().to_string();
        let content_start = caps.get(0).map_or(0, |m| m.end());
        let content_end = sections
            .get(index + 1)
            .and_then(|next| next.get(0))
            .map_or(body.len(), |m| m.start());
        let problems = split_chapter(&body[content_start..content_end], &title, sink);
        chapters.push(ChapterDraft {
            label: chapter_label(&title),
            title,
            implicit: false,
            problems,
        });
    }
    chapters
}

fn strip_comments(text: &str) -> String {
    COMMENT_RE.replace_all(text, "${1}").into_owned()
}

/// 章内第一个顶层 enumerate 的每一项是一道题
fn split_chapter(content: &str, title: &str, sink: &mut WarningSink) -> Vec<Draft> {
    let span = match find_env(content, ENUMERATE, 0) {
        EnvSearch::Found(span) => span,
        EnvSearch::Unclosed => {
            sink.warn(
                WarningCategory::MalformedContent,
                None,
                format!("章节 '{}' 的题目列表 enumerate 没有闭合", title),
            );
            return Vec::new();
        }
        EnvSearch::Absent => {
            sink.warn(
                WarningCategory::MalformedContent,
                None,
                format!("章节 '{}' 中没有题目列表 enumerate", title),
            );
            return Vec::new();
        }
    };

    let outside = format!("{}{}", &content[..span.start], &content[span.end..]);
    if !outside.trim().is_empty() {
        sink.warn(
            WarningCategory::MalformedContent,
            None,
            format!("章节 '{}' 中题目列表以外的内容被忽略", title),
        );
    }

    let (preamble, items) = top_level_items(&content[span.content_start..span.content_end]);
    if !preamble.is_empty() {
        sink.warn(
            WarningCategory::MalformedContent,
            None,
            format!("章节 '{}' 的题目列表在第一个 \\item 之前有内容，已忽略", title),
        );
    }

    let mut drafts = Vec::new();
    for item in items {
        let parsed = item.label.as_deref().and_then(problem_label);
        let root = match parsed {
            Some((label, _)) => {
                let marker = if label == "extra" {
                    Marker::Sentinel
                } else {
                    Marker::Labelled
                };
                Draft::new(0, Some(label), "", marker)
            }
            None => {
                let shown = item.label.clone().unwrap_or_default();
                Draft::new(0, None, "", Marker::Positional).with_note(
                    WarningCategory::MalformedContent,
                    format!("无法识别题号 '{}'，按位置编号", shown),
                )
            }
        };
        split_problem(root, item.body, &mut drafts);
    }
    drafts
}

/// 一项工作：待细分的节点
struct Pending {
    draft: Draft,
    body: String,
}

/// 把一道题细分为引言和子题，结果按先序追加到 `out`
fn split_problem(root: Draft, body: String, out: &mut Vec<Draft>) {
    let mut stack = vec![Pending { draft: root, body }];

    while let Some(Pending { mut draft, body }) = stack.pop() {
        let split = last_env(&body, ENUMERATE).and_then(|span| {
            let (preamble, mut items) = top_level_items(&body[span.content_start..span.content_end]);
            // 题目层总是展开；更深的层只展开带标签的列表
            let expand = draft.depth == 0 || items.iter().any(|i| i.label.is_some());
            if items.is_empty() || !expand {
                return None;
            }
            let after = body[span.end..].trim();
            if !after.is_empty() {
                if let Some(last) = items.last_mut() {
                    last.body = format!("{}\n\n{}", last.body, after);
                }
            }
            let mut intro = body[..span.start].trim().to_string();
            if !preamble.is_empty() {
                if !intro.is_empty() {
                    intro.push_str("\n\n");
                }
                intro.push_str(&preamble);
            }
            Some((intro, items))
        });

        match split {
            Some((intro, items)) => {
                draft.text = intro;
                let depth = draft.depth + 1;
                out.push(draft);
                for item in items.into_iter().rev() {
                    stack.push(Pending {
                        draft: sub_draft(depth, item.label.as_deref()),
                        body: item.body,
                    });
                }
            }
            None => {
                draft.text = body.trim().to_string();
                out.push(draft);
            }
        }
    }
}

fn sub_draft(depth: usize, label: Option<&str>) -> Draft {
    match label {
        None => Draft::new(depth, None, "", Marker::Positional),
        Some(raw) if raw.trim().is_empty() => Draft::new(depth, None, "", Marker::Positional),
        Some(raw) => match SUB_LABEL_RE.captures(raw.trim()) {
            Some(caps) => Draft::new(depth, Some(caps[1].to_string()), "", Marker::Labelled),
            None => Draft::new(depth, sanitize_label(raw.trim()), raw.trim(), Marker::Unrecognized).with_note(
                WarningCategory::ExtraSubproblem,
                format!("无法识别的子题标签 '{}'，作为额外子题保留", raw.trim()),
            ),
        },
    }
}

/// 顶层 `\item` 列表，返回 (第一个 item 之前的内容, items)
fn top_level_items(content: &str) -> (String, Vec<Item>) {
    let mut level: i64 = 0;
    let mut last_end = 0;
    let mut tops = Vec::new();

    for m in ITEM_RE.find_iter(content) {
        let between = &content[last_end..m.start()];
        level += between.matches("\\begin{").count() as i64;
        level -= between.matches("\\end{").count() as i64;
        last_end = m.end();
        if level <= 0 {
            tops.push(m);
        }
    }

    let Some(first) = tops.first() else {
        return (content.trim().to_string(), Vec::new());
    };
    let preamble = content[..first.start()].trim().to_string();

    let items = tops
        .iter()
        .enumerate()
        .map(|(index, m)| {
            let end = tops.get(index + 1).map_or(content.len(), |next| next.start());
            let raw = &content[m.end()..end];
            match ITEM_LABEL_RE.captures(raw) {
                Some(caps) => Item {
                    label: Some(caps[1].trim().to_string()),
                    body: raw[caps.get(0).map_or(0, |c| c.end())..].trim().to_string(),
                },
                None => Item {
                    label: None,
                    body: raw.trim().to_string(),
                },
            }
        })
        .collect();

    (preamble, items)
}

/// 从 `from` 开始找第一个完整的 `name` 环境（支持同名嵌套）
fn find_env(text: &str, name: &str, from: usize) -> EnvSearch {
    let begin_tag = format!("\\begin{{{}}}", name);
    let end_tag = format!("\\end{{{}}}", name);

    let Some(offset) = text[from..].find(&begin_tag) else {
        return EnvSearch::Absent;
    };
    let start = from + offset;
    let mut pos = start + begin_tag.len();
    let content_start = pos + ENV_OPTIONS_RE.find(&text[pos..]).map_or(0, |m| m.end());
    let mut depth = 1usize;

    loop {
        let Some(end_at) = text[pos..].find(&end_tag).map(|p| p + pos) else {
            return EnvSearch::Unclosed;
        };
        match text[pos..].find(&begin_tag).map(|p| p + pos) {
            Some(begin_at) if begin_at < end_at => {
                depth += 1;
                pos = begin_at + begin_tag.len();
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return EnvSearch::Found(EnvSpan {
                        start,
                        content_start,
                        content_end: end_at,
                        end: end_at + end_tag.len(),
                    });
                }
                pos = end_at + end_tag.len();
            }
        }
    }
}

/// 最后一个完整的顶层 `name` 环境
fn last_env(text: &str, name: &str) -> Option<EnvSpan> {
    let mut last = None;
    let mut from = 0;
    while let EnvSearch::Found(span) = find_env(text, name, from) {
        from = span.end;
        last = Some(span);
    }
    last
}

#[cfg(test)]
mod tests {
    use super::super::parse;
    use super::*;
    use crate::models::{ContentBlock, Dialect, ProblemId};

    const DOC: &str = r"\documentclass{article}
\begin{document}
\section{第一章作业}
\begin{enumerate}
\item[1.] 第一题答案 % 注释
\item[2.] 引言
  \begin{enumerate}
  \item 子题一
  \item 子题二
  \end{enumerate}
  补充说明
\item[extra.] 附加 50\% 完成
\end{enumerate}
\section{第二章作业}
\begin{enumerate}
\item[3.]
  \begin{enumerate}
  \item[(a)] 情形甲
    \begin{enumerate}
    \item[(i)] 细分一
    \item[(ii)] 细分二
    \end{enumerate}
  \item[(b)] 情形乙
    \begin{enumerate}
    \item 步骤
    \end{enumerate}
  \end{enumerate}
\end{enumerate}
\end{document}
";

    #[test]
    fn test_tex_structure() {
        let (tree, warnings) = parse(DOC, Dialect::Tex);
        assert!(warnings.is_empty(), "{:?}", warnings);

        let ids: Vec<String> = tree.nodes().iter().map(|n| n.id.to_string()).collect();
        assert_eq!(
            ids,
            vec![
                "chap1.prob1",
                "chap1.prob2",
                "chap1.prob2(1)",
                "chap1.prob2(2)",
                "chap1.probextra",
                "chap2.prob3",
                "chap2.prob3(a)",
                "chap2.prob3(a)(i)",
                "chap2.prob3(a)(ii)",
                "chap2.prob3(b)",
            ]
        );

        let p1 = tree.find(&ProblemId::new("1", "1")).unwrap();
        assert_eq!(p1.own_blocks(), &[ContentBlock::paragraph("第一题答案")]);

        let p2 = tree.find(&ProblemId::new("1", "2")).unwrap();
        assert_eq!(p2.own_blocks(), &[ContentBlock::paragraph("引言")]);
        let last = tree.find(&ProblemId::new("1", "2").child("2")).unwrap();
        assert_eq!(
            last.own_blocks(),
            &[ContentBlock::paragraph("子题二"), ContentBlock::paragraph("补充说明")]
        );

        let extra = tree.find(&ProblemId::new("1", "extra")).unwrap();
        assert_eq!(extra.own_blocks(), &[ContentBlock::paragraph("附加 50\\% 完成")]);

        // 不带标签的嵌套列表留在正文里
        let b = tree.find(&ProblemId::new("2", "3").child("b")).unwrap();
        assert!(!b.has_children());
    }

    #[test]
    fn test_missing_document_and_sections() {
        let (tree, warnings) = parse("\\begin{enumerate}\\item[1.] x\\end{enumerate}", Dialect::Tex);
        assert_eq!(tree.chapters.len(), 1);
        assert_eq!(tree.chapters[0].problems.len(), 1);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_find_env_nested() {
        let text = "a\\begin{enumerate}[label=(\\alph*)]x\\begin{enumerate}y\\end{enumerate}z\\end{enumerate}b";
        let EnvSearch::Found(span) = find_env(text, ENUMERATE, 0) else {
            panic!("enumerate not found");
        };
        assert_eq!(&text[span.content_start..span.content_end], "x\\begin{enumerate}y\\end{enumerate}z");
        assert_eq!(&text[span.end..], "b");
        assert!(matches!(
            find_env("\\begin{enumerate}x", ENUMERATE, 0),
            EnvSearch::Unclosed
        ));
    }

    #[test]
    fn test_unknown_item_label_is_flagged_not_positional() {
        let doc = "\\begin{document}\\section{第一章}\n\\begin{enumerate}\n\\item[1.] \\begin{enumerate}\n\\item[(a)] 甲\n\\item[Case A] 乙\n\\end{enumerate}\n\\end{enumerate}\n\\end{document}";
        let (tree, warnings) = parse(doc, Dialect::Tex);
        assert_eq!(warnings.len(), 1, "{:?}", warnings);
        assert_eq!(warnings[0].category, WarningCategory::ExtraSubproblem);

        let node = tree.find(&ProblemId::new("1", "1").child("Case-A")).unwrap();
        assert_eq!(node.marker, Marker::Unrecognized);
        assert!(node.flagged);
        assert_eq!(node.own_blocks(), &[ContentBlock::paragraph("乙")]);
    }
}
