//! 结果汇总器 - 编排层
//!
//! ## 职责
//!
//! 把一份提交的批改结果按文档顺序拼成 Markdown：
//! - 自动版 `marks/<sid>.auto.md` 每次批改都刷新
//! - 人工版 `marks/<sid>.human.md` 第一次创建时逐字节复制自动版，之后保持不动，
//!   除非显式要求重新播种（`--reseed-human`）
//! - 播种清单 `marks/<sid>.human.seed.json` 记下播种时的内容摘要和题目集合，
//!   用来报告人工版是否被编辑过、自动流程增删了哪些题目

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Mutex;
use tracing::info;

use crate::models::{MarkResult, ProblemTree, ProcessedSubmission, Verdict, Warning, WarningCategory};
use crate::orchestrator::mark_scheduler::MarkSink;
use crate::services::ArtifactStore;
use crate::utils::logging::truncate_text;

/// 学生作答摘录的最大字符数
const EXCERPT_CHARS: usize = 400;

/// 播种清单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedManifest {
    pub seeded_at: String,
    /// 播种内容的 SHA-256
    pub sha256: String,
    /// 播种时的题目集合（文档顺序）
    pub problem_ids: Vec<String>,
    /// 题目集合的 SHA-256（按行拼接）
    pub problem_set_sha256: String,
}

impl SeedManifest {
    fn new(content: &str, problem_ids: Vec<String>) -> Self {
        Self {
            seeded_at: chrono::Local::now().to_rfc3339(),
            sha256: sha256_hex(content.as_bytes()),
            problem_set_sha256: sha256_hex(problem_ids.join("\n").as_bytes()),
            problem_ids,
        }
    }
}

/// 人工版的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanCopy {
    /// 新建或重新播种
    Seeded,
    /// 保留了已有的人工版
    Retained {
        /// 人工版内容与播种时不同
        edited: bool,
        added: Vec<String>,
        removed: Vec<String>,
    },
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// 拼出自动版与人工版 Markdown（人工版即播种内容，与自动版相同）
pub fn assemble(
    submission_id: &str,
    student_name: &str,
    tree: Option<&ProblemTree>,
    results: &[MarkResult],
) -> (String, String) {
    let automated = render_markdown(submission_id, student_name, tree, results);
    let human = automated.clone();
    (automated, human)
}

fn render_markdown(
    submission_id: &str,
    student_name: &str,
    tree: Option<&ProblemTree>,
    results: &[MarkResult],
) -> String {
    MarkReport {
        submission_id,
        student_name,
        tree,
        results,
    }
    .to_string()
}

/// 一份提交的批改结果文档
struct MarkReport<'a> {
    submission_id: &'a str,
    student_name: &'a str,
    tree: Option<&'a ProblemTree>,
    results: &'a [MarkResult],
}

impl fmt::Display for MarkReport<'_> {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(out, "# 批改结果 - {} ({})", self.student_name, self.submission_id)?;
        for result in self.results {
            self.write_result(out, result)?;
        }
        Ok(())
    }
}

impl MarkReport<'_> {
    fn write_result(&self, out: &mut fmt::Formatter<'_>, result: &MarkResult) -> fmt::Result {
        writeln!(out, "\n## {}\n", result.problem_id)?;
        if !result.success {
            writeln!(out, "**评判**: ❌ 自动批改失败\n")?;
            return writeln!(out, "> {}", result.feedback.replace('\n', "\n> "));
        }
        writeln!(out, "**评判**: {}", verdict_text(result.verdict.as_ref()))?;

        if let Some(node) = self.tree.and_then(|t| t.find(&result.problem_id)) {
            let excerpt = truncate_text(&node.render(), EXCERPT_CHARS);
            if !excerpt.trim().is_empty() {
                writeln!(out, "\n<details><summary>学生作答摘录</summary>\n")?;
                writeln!(out, "{}\n", excerpt)?;
                writeln!(out, "</details>")?;
            }
        }

        if !result.feedback.trim().is_empty() {
            writeln!(out, "\n{}", result.feedback.trim())?;
        }
        for sub in &result.sub_feedback {
            writeln!(out, "\n### ({})\n", sub.label)?;
            writeln!(out, "**评判**: {}\n", verdict_text(sub.verdict.as_ref()))?;
            writeln!(out, "{}", sub.feedback.trim())?;
        }
        Ok(())
    }
}

fn verdict_text(verdict: Option<&Verdict>) -> String {
    verdict
        .map(|v| v.to_string())
        .unwrap_or_else(|| "未识别".to_string())
}

/// 写出自动版，并按规则处理人工版
pub fn write_marks(
    store: &ArtifactStore,
    submission_id: &str,
    automated: &str,
    human_seed: &str,
    problem_ids: Vec<String>,
    reseed: bool,
) -> Result<HumanCopy> {
    store.write_text(&store.auto_markdown_path(submission_id), automated)?;

    let human_path = store.human_markdown_path(submission_id);
    let seed_path = store.seed_manifest_path(submission_id);
    if reseed || !human_path.exists() {
        store.write_text(&human_path, human_seed)?;
        store.write_json(&seed_path, &SeedManifest::new(human_seed, problem_ids))?;
        return Ok(HumanCopy::Seeded);
    }

    let current = store.read_bytes(&human_path)?;
    let (edited, added, removed) = match store.read_json::<SeedManifest>(&seed_path) {
        Ok(seed) => {
            let before: BTreeSet<&String> = seed.problem_ids.iter().collect();
            let after: BTreeSet<&String> = problem_ids.iter().collect();
            (
                sha256_hex(&current) != seed.sha256,
                after.difference(&before).map(|s| s.to_string()).collect(),
                before.difference(&after).map(|s| s.to_string()).collect(),
            )
        }
        // 没有播种清单时无法判断，按已编辑处理
        Err(_) => (true, Vec::new(), Vec::new()),
    };
    Ok(HumanCopy::Retained {
        edited,
        added,
        removed,
    })
}

/// 保留人工版时的警告
fn retained_warning(submission_id: &str, edited: bool, added: &[String], removed: &[String]) -> Warning {
    let mut message = format!(
        "已存在人工复核版，保持不变（{}）",
        if edited { "人工已编辑" } else { "未编辑" }
    );
    if !added.is_empty() {
        message.push_str(&format!("；自动流程新增题目: {}", added.join(", ")));
    }
    if !removed.is_empty() {
        message.push_str(&format!("；自动流程移除题目: {}", removed.join(", ")));
    }
    if !added.is_empty() || !removed.is_empty() {
        message.push_str("；如需同步请使用 --reseed-human");
    }
    Warning::new(WarningCategory::HumanCopyRetained, message).with_submission(submission_id)
}

/// 批改阶段的结果接收者：补写处理产物、写出两份 Markdown
pub struct MarkWriter {
    store: ArtifactStore,
    reseed: bool,
    warnings: Mutex<Vec<Warning>>,
}

impl MarkWriter {
    pub fn new(store: ArtifactStore, reseed: bool) -> Self {
        Self {
            store,
            reseed,
            warnings: Mutex::new(Vec::new()),
        }
    }

    /// 取出累计的警告
    pub fn take_warnings(&self) -> Vec<Warning> {
        match self.warnings.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// 警告由阶段收集器统一打印
    fn push_warning(&self, warning: Warning) {
        match self.warnings.lock() {
            Ok(mut guard) => guard.push(warning),
            Err(poisoned) => poisoned.into_inner().push(warning),
        }
    }
}

#[async_trait]
impl MarkSink for MarkWriter {
    async fn deliver(&self, submission_id: &str, results: Vec<MarkResult>) -> Result<()> {
        let processed_path = self.store.processed_path(submission_id);
        let mut processed: ProcessedSubmission = self
            .store
            .read_json(&processed_path)
            .with_context(|| format!("读取提交 {} 的处理产物失败", submission_id))?;

        let (automated, human) = assemble(
            submission_id,
            &processed.student_name,
            Some(&processed.tree),
            &results,
        );
        let problem_ids = results.iter().map(|r| r.problem_id.to_string()).collect();

        processed.marks = Some(results);
        self.store.write_json(&processed_path, &processed)?;

        match write_marks(&self.store, submission_id, &automated, &human, problem_ids, self.reseed)? {
            HumanCopy::Seeded => info!("[提交 {}] ✓ 已生成自动版与人工复核版", submission_id),
            HumanCopy::Retained {
                edited,
                added,
                removed,
            } => {
                info!("[提交 {}] ✓ 已刷新自动版，人工复核版保持不变", submission_id);
                self.push_warning(retained_warning(submission_id, edited, &added, &removed));
            }
        }
        Ok(())
    }
}
