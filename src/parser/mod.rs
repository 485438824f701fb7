//! 结构解析器
//!
//! 把一份提交文档（Markdown 或 LaTeX）解析成题目树。
//!
//! 两种方言各自只负责把文档切成"草稿"：带深度、标签、标记和原始正文的先序列表。
//! 编号分配、标签去重、内容块切分和建树在这里统一完成，保证两种方言的行为一致。
//!
//! 解析从不失败：格式问题降级为警告加尽力而为的树。相同输入字节总是得到相同输出。

pub mod blocks;
mod markdown;
pub mod numerals;
mod tex;

use std::collections::HashSet;

use crate::models::tree::build_from_preorder;
use crate::models::{
    Chapter, Dialect, Marker, Node, NodeBody, ProblemId, ProblemTree, Warning, WarningCategory,
    WarningSink,
};

/// 一个待建的节点
#[derive(Debug, Clone)]
pub(crate) struct Draft {
    /// 0 表示题目，1 表示子题，依此类推
    pub depth: usize,
    /// `None` 表示按位置编号
    pub label: Option<String>,
    pub title: String,
    pub marker: Marker,
    pub text: String,
    /// 建树时要发出的警告
    pub note: Option<(WarningCategory, String)>,
}

impl Draft {
    pub fn new(depth: usize, label: Option<String>, title: impl Into<String>, marker: Marker) -> Self {
        Self {
            depth,
            label,
            title: title.into(),
            marker,
            text: String::new(),
            note: None,
        }
    }

    pub fn with_note(mut self, category: WarningCategory, message: impl Into<String>) -> Self {
        self.note = Some((category, message.into()));
        self
    }

    pub fn push_line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
    }
}

/// 一个待建的章节
#[derive(Debug, Clone, Default)]
pub(crate) struct ChapterDraft {
    pub label: Option<String>,
    pub title: String,
    /// 文档没有章节标题时补出来的章节
    pub implicit: bool,
    pub problems: Vec<Draft>,
}

/// 解析一份文档
pub fn parse(text: &str, dialect: Dialect) -> (ProblemTree, Vec<Warning>) {
    let mut sink = WarningSink::detached();
    let chapters = match dialect {
        Dialect::Markdown => markdown::split(text, &mut sink),
        Dialect::Tex => tex::split(text, &mut sink),
    };
    let tree = assemble(chapters, dialect, &mut sink);
    (tree, sink.into_vec())
}

fn assemble(chapters: Vec<ChapterDraft>, dialect: Dialect, sink: &mut WarningSink) -> ProblemTree {
    let mut used = HashSet::new();
    let mut tree = ProblemTree::default();

    for (index, draft) in chapters.into_iter().enumerate() {
        let ordinal = (index + 1).to_string();
        let base = match draft.label {
            Some(label) => label,
            None => {
                if !draft.implicit {
                    sink.warn(
                        WarningCategory::MalformedContent,
                        None,
                        format!("无法识别章节 '{}' 的编号，按位置记为 {}", draft.title, ordinal),
                    );
                }
                ordinal
            }
        };
        let id = if used.contains(&base) {
            let id = disambiguate(&base, &used);
            sink.warn(
                WarningCategory::MalformedContent,
                None,
                format!("章节编号 {} 重复，改记为 {}", base, id),
            );
            id
        } else {
            base
        };
        used.insert(id.clone());

        let problems = assemble_problems(&id, draft.problems, dialect, sink);
        tree.chapters.push(Chapter {
            id,
            title: draft.title,
            problems,
        });
    }

    tree
}

/// 建树时一层的状态
struct Frame {
    id: Option<ProblemId>,
    used: HashSet<String>,
    count: usize,
}

impl Frame {
    fn new(id: Option<ProblemId>) -> Self {
        Self {
            id,
            used: HashSet::new(),
            count: 0,
        }
    }
}

fn assemble_problems(
    chapter_id: &str,
    drafts: Vec<Draft>,
    dialect: Dialect,
    sink: &mut WarningSink,
) -> Vec<Node> {
    let mut frames = vec![Frame::new(None)];
    let mut items = Vec::with_capacity(drafts.len());

    for draft in drafts {
        let depth = draft.depth.min(frames.len() - 1);
        frames.truncate(depth + 1);
        let parent = &mut frames[depth];
        parent.count += 1;

        let base = draft
            .label
            .clone()
            .unwrap_or_else(|| parent.count.to_string());
        let mut note = draft.note;
        let label = if parent.used.contains(&base) {
            let label = disambiguate(&base, &parent.used);
            note = Some((
                WarningCategory::ExtraSubproblem,
                format!("标签 '{}' 与前面的兄弟节点重复，改记为 '{}'", base, label),
            ));
            label
        } else {
            base
        };
        parent.used.insert(label.clone());

        let id = match &parent.id {
            Some(parent_id) => parent_id.child(label),
            None => ProblemId::new(chapter_id, label),
        };

        if depth < draft.depth {
            sink.warn(
                WarningCategory::MalformedContent,
                Some(&id),
                format!("标题层级跳跃，第 {} 层的节点被挂到第 {} 层", draft.depth, depth),
            );
        }

        let blocks = blocks::parse_blocks(&draft.text, dialect, Some(&id), sink);
        let mut node = Node::leaf(id.clone(), draft.title, draft.marker);
        node.body = NodeBody::Leaf(blocks);
        if let Some((category, message)) = note {
            node.flagged = category == WarningCategory::ExtraSubproblem;
            sink.warn(category, Some(&id), message);
        }

        items.push((depth, node));
        frames.push(Frame::new(Some(id)));
    }

    match build_from_preorder(items) {
        Ok(problems) => problems,
        Err(e) => {
            sink.warn(WarningCategory::MalformedContent, None, e.to_string());
            Vec::new()
        }
    }
}

/// 给重复的标签加后缀 `~2`、`~3`……
pub(crate) fn disambiguate(base: &str, used: &HashSet<String>) -> String {
    let mut k = 2;
    loop {
        let candidate = format!("{}~{}", base, k);
        if !used.contains(&candidate) {
            return candidate;
        }
        k += 1;
    }
}
