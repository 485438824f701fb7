//! 题目树
//!
//! 章 → 题 → 子题（可任意嵌套）→ 内容块。
//!
//! 所有遍历都使用显式栈；持久化时每章的题目被展平成带深度标注的先序列表，
//! 反序列化的递归深度不随嵌套层数增长。

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use super::problem_id::ProblemId;

/// 缺失题目的占位文本
pub const NO_ANSWER: &str = "No answer provided";

/// 公式样式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaStyle {
    /// 段落内唯一的 `$…$`
    Inline,
    /// 单行独立公式
    Display,
    /// 多行公式
    MultiLine,
    /// 带 `\tag{}` 或 `\label{}` 的编号公式
    Numbered,
}

/// 内容块
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    Paragraph {
        text: String,
    },
    Table {
        /// 表格源码行
        rows: Vec<String>,
        caption: Option<String>,
    },
    Formula {
        style: FormulaStyle,
        /// 公式源码（不含外层定界符）
        body: String,
        tag: Option<String>,
    },
    /// 代码或算法块，原样保存
    Code {
        language: Option<String>,
        text: String,
    },
    Image {
        alt: String,
        path: String,
    },
    /// 缺失题目的占位
    Placeholder {
        text: String,
    },
}

impl ContentBlock {
    pub fn paragraph(text: impl Into<String>) -> Self {
        ContentBlock::Paragraph { text: text.into() }
    }

    pub fn placeholder() -> Self {
        ContentBlock::Placeholder {
            text: NO_ANSWER.to_string(),
        }
    }

    /// 渲染为 Markdown
    pub fn to_markdown(&self) -> String {
        match self {
            ContentBlock::Paragraph { text } => text.clone(),
            ContentBlock::Table { rows, caption } => {
                let mut out = rows.join("\n");
                if let Some(caption) = caption {
                    out.push('\n');
                    out.push_str(caption);
                }
                out
            }
            ContentBlock::Formula { style, body, .. } => match style {
                FormulaStyle::Inline => format!("${}$", body),
                _ => format!("$$\n{}\n$$", body),
            },
            ContentBlock::Code { language, text } => format!(
                "```{}\n{}\n```",
                language.as_deref().unwrap_or_default(),
                text
            ),
            ContentBlock::Image { alt, path } => format!("![{}]({})", alt, path),
            ContentBlock::Placeholder { text } => text.clone(),
        }
    }
}

/// 把一组内容块渲染为 Markdown，块之间空一行
pub fn render_blocks(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .map(ContentBlock::to_markdown)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 节点是如何被识别出来的
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Marker {
    /// 带标签的标题：`### 1.`、`#### (1)`、`\item[(a)]`
    Labelled,
    /// `extra.`
    Sentinel,
    /// 列表大纲 `- (a) …`
    Outline,
    /// 无标签，按位置编号
    Positional,
    /// 无法识别的标题，作为额外子题保留
    Unrecognized,
    /// 匹配器补上的占位
    Placeholder,
}

/// 节点内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeBody {
    Leaf(Vec<ContentBlock>),
    Branch {
        intro: Vec<ContentBlock>,
        children: Vec<Node>,
    },
}

impl NodeBody {
    /// 没有子节点时退化为叶子
    pub fn from_parts(intro: Vec<ContentBlock>, children: Vec<Node>) -> Self {
        if children.is_empty() {
            NodeBody::Leaf(intro)
        } else {
            NodeBody::Branch { intro, children }
        }
    }
}

/// 题目或子题节点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: ProblemId,
    /// 原始标题文本（去掉标签后）
    pub title: String,
    pub marker: Marker,
    /// 解析阶段已经为该节点发出过警告
    pub flagged: bool,
    pub body: NodeBody,
}

impl Node {
    pub fn leaf(id: ProblemId, title: impl Into<String>, marker: Marker) -> Self {
        Self {
            id,
            title: title.into(),
            marker,
            flagged: false,
            body: NodeBody::Leaf(Vec::new()),
        }
    }

    /// 占位叶子
    pub fn placeholder(id: ProblemId) -> Self {
        Self {
            id,
            title: String::new(),
            marker: Marker::Placeholder,
            flagged: false,
            body: NodeBody::Leaf(vec![ContentBlock::placeholder()]),
        }
    }

    pub fn label(&self) -> &str {
        self.id.label()
    }

    pub fn children(&self) -> &[Node] {
        match &self.body {
            NodeBody::Leaf(_) => &[],
            NodeBody::Branch { children, .. } => children,
        }
    }

    /// 叶子的内容或分支的引言
    pub fn own_blocks(&self) -> &[ContentBlock] {
        match &self.body {
            NodeBody::Leaf(blocks) => blocks,
            NodeBody::Branch { intro, .. } => intro,
        }
    }

    pub fn has_children(&self) -> bool {
        !self.children().is_empty()
    }

    pub fn is_placeholder(&self) -> bool {
        self.marker == Marker::Placeholder
    }

    /// 追加一个子节点，叶子会变成分支
    pub fn push_child(&mut self, child: Node) {
        match &mut self.body {
            NodeBody::Leaf(blocks) => {
                let intro = std::mem::take(blocks);
                self.body = NodeBody::Branch {
                    intro,
                    children: vec![child],
                };
            }
            NodeBody::Branch { children, .. } => children.push(child),
        }
    }

    /// 先序遍历，返回 (相对深度, 节点)
    pub fn walk(&self) -> Vec<(usize, &Node)> {
        let mut out = Vec::new();
        let mut stack = vec![(0usize, self)];
        while let Some((depth, node)) = stack.pop() {
            out.push((depth, node));
            for child in node.children().iter().rev() {
                stack.push((depth + 1, child));
            }
        }
        out
    }

    /// 重设本节点编号，子树编号随之更新
    pub fn set_id(&mut self, id: ProblemId) {
        self.id = id;
        let mut stack: Vec<&mut Node> = vec![self];
        while let Some(node) = stack.pop() {
            let Node { id, body, .. } = node;
            if let NodeBody::Branch { children, .. } = body {
                for child in children.iter_mut() {
                    child.id = id.child(child.id.label().to_string());
                    stack.push(child);
                }
            }
        }
    }

    /// 在子树中按编号查找
    pub fn find(&self, target: &ProblemId) -> Option<&Node> {
        self.walk()
            .into_iter()
            .map(|(_, node)| node)
            .find(|node| &node.id == target)
    }

    /// 子树的全部文本，子题以 `(label)` 标题分隔
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (depth, node) in self.walk() {
            if depth > 0 {
                if !out.is_empty() {
                    out.push_str("\n\n");
                }
                let _ = write!(out, "{} ({})", "#".repeat(3 + depth), node.label());
                if !node.title.is_empty() {
                    let _ = write!(out, " {}", node.title);
                }
            }
            let text = render_blocks(node.own_blocks());
            if !text.is_empty() {
                if !out.is_empty() {
                    out.push_str("\n\n");
                }
                out.push_str(&text);
            }
        }
        out
    }
}

/// 章节
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub title: String,
    #[serde(with = "flat")]
    pub problems: Vec<Node>,
}

/// 一份文档的题目树
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemTree {
    pub chapters: Vec<Chapter>,
}

impl ProblemTree {
    /// 按文档顺序列出所有题目
    pub fn problems(&self) -> impl Iterator<Item = &Node> {
        self.chapters.iter().flat_map(|c| c.problems.iter())
    }

    /// 按文档顺序列出所有节点
    pub fn nodes(&self) -> Vec<&Node> {
        self.problems()
            .flat_map(|p| p.walk().into_iter().map(|(_, n)| n))
            .collect()
    }

    pub fn find(&self, id: &ProblemId) -> Option<&Node> {
        let root = id.problem_root();
        self.problems()
            .find(|p| p.id == root)
            .and_then(|p| p.find(id))
    }

    pub fn chapter(&self, id: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == id)
    }
}

/// 展平后的一个节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatNode {
    pub depth: usize,
    pub id: ProblemId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    pub marker: Marker,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub flagged: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<ContentBlock>,
}

/// 先序列表中出现了非法的深度跳变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthJump {
    pub index: usize,
    pub depth: usize,
    pub expected_at_most: usize,
}

impl std::fmt::Display for DepthJump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "第 {} 个节点深度为 {}，最多允许 {}",
            self.index, self.depth, self.expected_at_most
        )
    }
}

impl std::error::Error for DepthJump {}

/// 把题目展平成带深度的先序列表
pub fn flatten(problems: &[Node]) -> Vec<FlatNode> {
    let mut out = Vec::new();
    for problem in problems {
        for (depth, node) in problem.walk() {
            out.push(FlatNode {
                depth,
                id: node.id.clone(),
                title: node.title.clone(),
                marker: node.marker,
                flagged: node.flagged,
                blocks: node.own_blocks().to_vec(),
            });
        }
    }
    out
}

/// 由带深度的先序列表重建森林
///
/// 输入节点的 body 是叶子，子节点在这里挂上。
pub fn build_from_preorder<I>(items: I) -> Result<Vec<Node>, DepthJump>
where
    I: IntoIterator<Item = (usize, Node)>,
{
    let mut roots = Vec::new();
    let mut stack: Vec<Node> = Vec::new();

    for (index, (depth, node)) in items.into_iter().enumerate() {
        if depth > stack.len() {
            return Err(DepthJump {
                index,
                depth,
                expected_at_most: stack.len(),
            });
        }
        while stack.len() > depth {
            close_top(&mut stack, &mut roots);
        }
        stack.push(node);
    }
    while !stack.is_empty() {
        close_top(&mut stack, &mut roots);
    }

    Ok(roots)
}

fn close_top(stack: &mut Vec<Node>, roots: &mut Vec<Node>) {
    if let Some(done) = stack.pop() {
        match stack.last_mut() {
            Some(parent) => parent.push_child(done),
            None => roots.push(done),
        }
    }
}

/// 由展平列表重建题目
pub fn unflatten(flat: Vec<FlatNode>) -> Result<Vec<Node>, DepthJump> {
    build_from_preorder(flat.into_iter().map(|f| {
        (
            f.depth,
            Node {
                id: f.id,
                title: f.title,
                marker: f.marker,
                flagged: f.flagged,
                body: NodeBody::Leaf(f.blocks),
            },
        )
    }))
}

mod flat {
    use super::{flatten, unflatten, FlatNode, Node};
    use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(problems: &[Node], serializer: S) -> Result<S::Ok, S::Error> {
        flatten(problems).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Node>, D::Error> {
        let flat = Vec::<FlatNode>::deserialize(deserializer)?;
        unflatten(flat).map_err(D::Error::custom)
    }
}
