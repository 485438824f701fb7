//! 题目清单匹配服务 - 业务能力层
//!
//! 把解析得到的题目树和题目清单对齐：
//! - 清单要求但缺失的题目/子题 → 占位叶子（"No answer provided"）+ 一条 missing-subproblem 警告。
//!   整道题缺失只告警一次，其子题占位静默补上
//! - 树中存在但清单未要求的节点 → 保留并告警 extra-subproblem，解析阶段已告警过的不重复告警
//! - 分类讨论题按位置匹配：第 k 个顶层分支改记为 `(k)`
//! - 比清单更深的后代归属于匹配上的祖先，不告警
//!
//! 输出按文档顺序，占位插在清单中的对应位置。重命名后兄弟节点的编号仍然唯一。

use std::collections::HashSet;

use crate::models::tree::NodeBody;
use crate::models::{
    Chapter, ChapterSchema, ContentBlock, Marker, Node, ProblemId, ProblemSchema, ProblemShape,
    ProblemTree, SchemaExpectation, Warning, WarningCategory, WarningSink,
};
use crate::parser::disambiguate;

/// 合并后的一个位置
enum Slot<T> {
    Present(T),
    Missing(String),
}

/// 把清单中缺失的键按清单位置插入文档顺序
///
/// 缺失项紧跟在它之前最近一个已出现的清单项后面。
fn merge_in_order<T>(present: Vec<T>, expected: &[String], key: impl Fn(&T) -> String) -> Vec<Slot<T>> {
    let mut slots: Vec<Slot<T>> = present.into_iter().map(Slot::Present).collect();
    let mut anchor = 0;
    for label in expected {
        let found = slots
            .iter()
            .position(|slot| matches!(slot, Slot::Present(item) if key(item) == *label));
        match found {
            Some(pos) => anchor = pos + 1,
            None => {
                slots.insert(anchor, Slot::Missing(label.clone()));
                anchor += 1;
            }
        }
    }
    slots
}

/// 对齐题目树与题目清单
pub fn reconcile(tree: ProblemTree, expectation: &SchemaExpectation) -> (ProblemTree, Vec<Warning>) {
    let mut sink = WarningSink::detached();
    let expected: Vec<String> = expectation.chapters.iter().map(|c| c.id.clone()).collect();

    let mut chapters = Vec::new();
    for slot in merge_in_order(tree.chapters, &expected, |c| c.id.clone()) {
        let chapter = match slot {
            Slot::Present(chapter) => chapter,
            Slot::Missing(id) => Chapter {
                id,
                title: String::new(),
                problems: Vec::new(),
            },
        };
        let schema = expectation.chapter(&chapter.id);
        chapters.push(reconcile_chapter(chapter, schema, &mut sink));
    }

    (ProblemTree { chapters }, sink.into_vec())
}

fn reconcile_chapter(chapter: Chapter, schema: Option<&ChapterSchema>, sink: &mut WarningSink) -> Chapter {
    let Some(schema) = schema else {
        for problem in chapter.problems.iter().filter(|p| !p.flagged) {
            sink.warn(
                WarningCategory::ExtraSubproblem,
                Some(&problem.id),
                format!("第 {} 章不在题目清单中", chapter.id),
            );
        }
        return chapter;
    };

    let labels: Vec<String> = schema.problems.iter().map(|p| p.label.clone()).collect();
    let mut problems = Vec::new();
    for slot in merge_in_order(chapter.problems, &labels, |p| p.label().to_string()) {
        match slot {
            Slot::Present(problem) => {
                match schema.problems.iter().find(|p| p.label == problem.label()) {
                    Some(expected) => problems.push(reconcile_problem(problem, expected, sink)),
                    None => {
                        if !problem.flagged {
                            sink.warn(
                                WarningCategory::ExtraSubproblem,
                                Some(&problem.id),
                                "该题不在题目清单中",
                            );
                        }
                        problems.push(problem);
                    }
                }
            }
            Slot::Missing(label) => {
                let id = ProblemId::new(chapter.id.clone(), label.clone());
                sink.warn(WarningCategory::MissingSubproblem, Some(&id), "缺少该题的作答");
                if let Some(expected) = schema.problems.iter().find(|p| p.label == label) {
                    problems.push(missing_problem(id, expected));
                }
            }
        }
    }

    Chapter {
        id: chapter.id,
        title: chapter.title,
        problems,
    }
}

/// 整道题缺失：题目占位及其子题占位
fn missing_problem(id: ProblemId, schema: &ProblemSchema) -> Node {
    let mut node = Node::placeholder(id.clone());
    for label in schema.sub_labels() {
        node.push_child(Node::placeholder(id.child(label)));
    }
    node
}

fn reconcile_problem(mut node: Node, schema: &ProblemSchema, sink: &mut WarningSink) -> Node {
    let (intro, children) = match std::mem::replace(&mut node.body, NodeBody::Leaf(Vec::new())) {
        NodeBody::Leaf(blocks) => (blocks, Vec::new()),
        NodeBody::Branch { intro, children } => (intro, children),
    };
    let all_positional = !children.is_empty() && children.iter().all(|c| c.marker == Marker::Positional);

    node.body = match &schema.shape {
        ProblemShape::Plain if all_positional => NodeBody::Leaf(fold_children(intro, &children)),
        ProblemShape::Plain => {
            flag_extras(&children, sink);
            NodeBody::from_parts(intro, children)
        }
        ProblemShape::Labelled(labels) => {
            let mut children = match_labelled(&node.id, children, labels, all_positional, sink);
            dedupe_siblings(&node.id, &mut children, sink);
            NodeBody::from_parts(intro, children)
        }
        ProblemShape::Outline(count) => {
            let mut children = match_outline(&node.id, children, *count, sink);
            dedupe_siblings(&node.id, &mut children, sink);
            NodeBody::from_parts(intro, children)
        }
    };
    node
}

/// 重命名可能让兄弟节点撞号：清单匹配上的节点先占号，其余按文档顺序改记为 `~2`、`~3`……
fn dedupe_siblings(parent: &ProblemId, children: &mut [Node], sink: &mut WarningSink) {
    let mut used = HashSet::new();
    let mut clashes = Vec::new();
    for pass_flagged in [false, true] {
        for (index, child) in children.iter().enumerate() {
            if child.flagged == pass_flagged && !used.insert(child.label().to_string()) {
                clashes.push(index);
            }
        }
    }
    clashes.sort_unstable();

    for index in clashes {
        let child = &mut children[index];
        let base = child.label().to_string();
        let label = disambiguate(&base, &used);
        used.insert(label.clone());
        child.set_id(parent.child(label.clone()));
        child.flagged = true;
        sink.warn(
            WarningCategory::ExtraSubproblem,
            Some(&child.id),
            format!("子题标签 '{}' 与兄弟节点重复，改记为 '{}'", base, label),
        );
    }
}

fn flag_extras(children: &[Node], sink: &mut WarningSink) {
    for child in children.iter().filter(|c| !c.flagged) {
        sink.warn(
            WarningCategory::ExtraSubproblem,
            Some(&child.id),
            "该子题不在题目清单中",
        );
    }
}

/// 题目清单不要求子题、而解析出的都是按位置编号的列表项时，把它们并回题目正文
fn fold_children(mut blocks: Vec<ContentBlock>, children: &[Node]) -> Vec<ContentBlock> {
    for child in children {
        for (_, node) in child.walk() {
            blocks.push(ContentBlock::paragraph(format!("({})", node.label())));
            blocks.extend(node.own_blocks().iter().cloned());
        }
    }
    blocks
}

fn match_labelled(
    parent: &ProblemId,
    mut children: Vec<Node>,
    labels: &[String],
    all_positional: bool,
    sink: &mut WarningSink,
) -> Vec<Node> {
    // 不带标签的列表项按位置对应到清单标签
    if all_positional {
        for (child, label) in children.iter_mut().zip(labels) {
            child.set_id(parent.child(label.clone()));
        }
    }

    let normalized: Vec<String> = labels.iter().map(|l| l.to_lowercase()).collect();
    let mut out = Vec::new();
    for slot in merge_in_order(children, &normalized, |c| c.label().to_lowercase()) {
        match slot {
            Slot::Present(mut child) => {
                let wanted = labels
                    .iter()
                    .find(|l| l.to_lowercase() == child.label().to_lowercase());
                match wanted {
                    Some(label) => {
                        if child.label() != label {
                            child.set_id(parent.child(label.clone()));
                        }
                    }
                    None if !child.flagged => sink.warn(
                        WarningCategory::ExtraSubproblem,
                        Some(&child.id),
                        "该子题不在题目清单中",
                    ),
                    None => {}
                }
                out.push(child);
            }
            Slot::Missing(normalized_label) => {
                let label = labels
                    .iter()
                    .find(|l| l.to_lowercase() == normalized_label)
                    .cloned()
                    .unwrap_or(normalized_label);
                let id = parent.child(label);
                sink.warn(WarningCategory::MissingSubproblem, Some(&id), "缺少该子题的作答");
                out.push(Node::placeholder(id));
            }
        }
    }
    out
}

fn match_outline(parent: &ProblemId, mut children: Vec<Node>, count: usize, sink: &mut WarningSink) -> Vec<Node> {
    let mut position = 0;
    for child in children.iter_mut().filter(|c| !c.flagged) {
        position += 1;
        child.set_id(parent.child(position.to_string()));
        if position > count {
            sink.warn(
                WarningCategory::ExtraSubproblem,
                Some(&child.id),
                format!("分类讨论只要求 {} 个分支", count),
            );
        }
    }
    for missing in position + 1..=count {
        let id = parent.child(missing.to_string());
        sink.warn(WarningCategory::MissingSubproblem, Some(&id), "缺少该分支的讨论");
        children.push(Node::placeholder(id));
    }
    children
}
