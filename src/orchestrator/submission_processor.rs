//! 单份提交处理器 - 编排层
//!
//! ## 职责
//!
//! 每个函数处理一份提交（或一份参考材料）在某个阶段的工作：
//! 1. **抓取**：解析标题、过滤其他作业、去重、过滤垃圾文件后落盘
//! 2. **处理**：找唯一源文件 → 解析 → 对齐题目清单 → 写处理产物
//! 3. **参考材料**：用同一套解析和对齐处理参考答案与题目描述
//! 4. **批改任务**：把处理产物和参考材料组装成批改任务
//!
//! 所有函数都只做单份对象的工作，失败和警告交给阶段控制器汇总。

use anyhow::{Context, Result};
use std::collections::HashSet;
use tracing::{debug, error, info};

use crate::error::SubmissionError;
use crate::models::{
    recognized_sources, Dialect, ProcessedSubmission, ProblemTree, RawArchive, ReferenceMaterial,
    SchemaExpectation, SubmissionManifest, SubmissionTitle, Warning, WarningCategory, WarningSink,
};
use crate::orchestrator::mark_scheduler::SubmissionJobs;
use crate::parser;
use crate::services::{reconcile, ArtifactStore, SourceDocument};
use crate::workflow::{MarkJob, MarkingCtx};

/// 抓取统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchStats {
    pub stored: usize,
    pub skipped: usize,
    /// 落盘失败的提交
    pub failed: usize,
    /// 其他作业的提交
    pub ignored: usize,
}

/// 把平台交回的提交落盘
///
/// 同一学生的多份提交只保留先到的一份。单份提交落盘失败只计入统计。
pub fn store_archives(
    store: &ArtifactStore,
    assignment_id: &str,
    archives: &[RawArchive],
    sink: &mut WarningSink,
) -> FetchStats {
    let mut stats = FetchStats::default();
    let mut seen = HashSet::new();

    for archive in archives {
        let title = match SubmissionTitle::parse(&archive.title) {
            Ok(title) => title,
            Err(e) => {
                sink.push(Warning::new(WarningCategory::BadTitleFormat, e.to_string()));
                stats.skipped += 1;
                continue;
            }
        };
        if title.homework_id != assignment_id {
            debug!("忽略其他作业的提交: {}", archive.title);
            stats.ignored += 1;
            continue;
        }
        if !seen.insert(title.student_id.clone()) {
            let e = SubmissionError::Duplicate {
                student_id: title.student_id.clone(),
                title: archive.title.clone(),
            };
            sink.push(Warning::new(WarningCategory::DuplicateSubmission, e.to_string()).with_submission(&title.student_id));
            stats.skipped += 1;
            continue;
        }

        let escaping = archive.escaping_entries();
        if !escaping.is_empty() {
            let e = SubmissionError::EscapingEntry {
                submission_id: title.student_id.clone(),
                names: escaping.iter().map(|n| n.to_string()).collect(),
            };
            sink.push(Warning::new(WarningCategory::MalformedArchive, e.to_string()).with_submission(&title.student_id));
            stats.skipped += 1;
            continue;
        }

        let submission_id = title.student_id.clone();
        match store_one(store, archive, title) {
            Ok(manifest) => {
                info!(
                    "[提交 {}] ✓ 已保存 {} 个文件",
                    submission_id,
                    manifest.entries.len()
                );
                stats.stored += 1;
            }
            Err(e) => {
                error!("[提交 {}] ❌ 保存失败: {:#}", submission_id, e);
                stats.failed += 1;
            }
        }
    }
    stats
}

fn store_one(store: &ArtifactStore, archive: &RawArchive, title: SubmissionTitle) -> Result<SubmissionManifest> {
    let submission_id = title.student_id.clone();
    let files_dir = store.files_dir(&submission_id);
    // 重新抓取时先清掉旧文件，保证产物只反映本次内容
    store.remove_dir(&files_dir)?;

    let entries = archive.cleaned_entries();
    for entry in &entries {
        store.write_atomic(&files_dir.join(&entry.name), &entry.bytes)?;
    }

    let manifest = SubmissionManifest {
        platform_id: archive.platform_id.clone(),
        title: archive.title.clone(),
        homework_id: title.homework_id,
        student_id: title.student_id,
        student_name: title.student_name,
        entries: entries.into_iter().map(|e| e.name).collect(),
    };
    // 清单最后写，它的存在表示抓取完成
    store.write_json(&store.manifest_path(&submission_id), &manifest)?;
    Ok(manifest)
}

/// 解析并对齐一份文档
fn parse_and_reconcile(text: &str, dialect: Dialect, expectation: &SchemaExpectation) -> (ProblemTree, Vec<Warning>) {
    let (tree, mut warnings) = parser::parse(text, dialect);
    let (tree, more) = reconcile(tree, expectation);
    warnings.extend(more);
    (tree, warnings)
}

/// 处理阶段的结果
#[derive(Debug)]
pub enum ProcessOutcome {
    Processed(Box<ProcessedSubmission>),
    /// 压缩包不合格，本阶段跳过
    Skipped(Warning),
}

/// 处理一份提交
pub fn process_submission(
    store: &ArtifactStore,
    submission_id: &str,
    expectation: &SchemaExpectation,
) -> Result<ProcessOutcome> {
    let manifest: SubmissionManifest = store
        .read_json(&store.manifest_path(submission_id))
        .with_context(|| format!("读取提交 {} 的清单失败", submission_id))?;
    // 旧的处理产物不能留给批改阶段
    store.remove_file(&store.processed_path(submission_id))?;

    let entries: Vec<_> = manifest
        .entries
        .iter()
        .map(|name| crate::models::ArchiveEntry::new(name.as_str(), Vec::new()))
        .collect();
    let sources = recognized_sources(&entries);
    if sources.len() != 1 {
        let e = SubmissionError::MalformedArchive {
            submission_id: submission_id.to_string(),
            found: sources.len(),
            names: sources.iter().map(|s| s.name.clone()).collect(),
        };
        let warning = Warning::new(WarningCategory::MalformedArchive, e.to_string()).with_submission(submission_id);
        return Ok(ProcessOutcome::Skipped(warning));
    }

    let source = sources[0].name.clone();
    let dialect = sources[0].dialect().unwrap_or(Dialect::Markdown);
    let bytes = store.read_bytes(&store.files_dir(submission_id).join(&source))?;
    let text = String::from_utf8_lossy(&bytes);

    let (tree, warnings) = parse_and_reconcile(&text, dialect, expectation);
    let warnings = warnings
        .into_iter()
        .map(|w| w.with_submission(submission_id))
        .collect();

    let processed = ProcessedSubmission {
        submission_id: submission_id.to_string(),
        student_name: manifest.student_name,
        source,
        dialect,
        tree,
        warnings,
        marks: None,
    };
    store.write_json(&store.processed_path(submission_id), &processed)?;
    Ok(ProcessOutcome::Processed(Box::new(processed)))
}

/// 解析并对齐一份参考材料
pub fn reference_material(document: SourceDocument, expectation: &SchemaExpectation) -> ReferenceMaterial {
    let (tree, warnings) = parse_and_reconcile(&document.text, document.dialect, expectation);
    ReferenceMaterial {
        source: document.name,
        dialect: document.dialect,
        tree,
        warnings,
    }
}

/// 把一份提交的题目组装成批改任务，按文档顺序
pub fn build_jobs(
    processed: &ProcessedSubmission,
    answer: &ReferenceMaterial,
    description: &ReferenceMaterial,
) -> SubmissionJobs {
    let jobs = processed
        .tree
        .problems()
        .map(|problem| MarkJob {
            ctx: MarkingCtx::new(processed.submission_id.as_str(), problem.id.clone()),
            student: problem.clone(),
            reference: answer.tree.find(&problem.id).cloned(),
            description: description.tree.find(&problem.id).cloned(),
        })
        .collect();
    SubmissionJobs {
        submission_id: processed.submission_id.clone(),
        jobs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArchiveEntry;

    fn archive(title: &str, files: &[(&str, &str)]) -> RawArchive {
        RawArchive {
            platform_id: title.to_string(),
            title: title.to_string(),
            entries: files
                .iter()
                .map(|(name, text)| ArchiveEntry::new(*name, text.as_bytes()))
                .collect(),
        }
    }

    #[test]
    fn test_fetch_filters_titles_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut sink = WarningSink::for_assignment();
        let stats = store_archives(
            &store,
            "1",
            &[
                archive("HW1-2300017000-李二", &[("hw/a.md", "## 第一章"), ("hw/a.aux", "")]),
                archive("HW1-2300017000-李二", &[("b.md", "")]),
                archive("HW2-2300017001-张三", &[("c.md", "")]),
                archive("作业一", &[("d.md", "")]),
            ],
            &mut sink,
        );
        assert_eq!(
            stats,
            FetchStats {
                stored: 1,
                skipped: 2,
                failed: 0,
                ignored: 1
            }
        );
        assert_eq!(sink.count(WarningCategory::DuplicateSubmission), 1);
        assert_eq!(sink.count(WarningCategory::BadTitleFormat), 1);

        let manifest: SubmissionManifest = store.read_json(&store.manifest_path("2300017000")).unwrap();
        assert_eq!(manifest.entries, vec!["a.md"]);
        assert!(store.files_dir("2300017000").join("a.md").is_file());
    }

    #[test]
    fn test_two_sources_is_malformed_archive() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut sink = WarningSink::for_assignment();
        store_archives(
            &store,
            "1",
            &[archive("HW1-2300017000-李二", &[("a.md", ""), ("b.tex", "")])],
            &mut sink,
        );

        let expectation = SchemaExpectation::parse("chapter 1: 1").unwrap();
        // 上一次抓取时是合格的
        std::fs::create_dir_all(store.processed_path("2300017000").parent().unwrap()).unwrap();
        std::fs::write(store.processed_path("2300017000"), "{}").unwrap();
        match process_submission(&store, "2300017000", &expectation).unwrap() {
            ProcessOutcome::Skipped(w) => assert_eq!(w.category, WarningCategory::MalformedArchive),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!store.processed_path("2300017000").exists());
    }

    #[test]
    fn test_build_jobs_in_document_order() {
        let expectation = SchemaExpectation::parse("chapter 1: 1, 2\nchapter 2: 1").unwrap();
        let (tree, warnings) = parse_and_reconcile(
            "## 第一章\n### 2.\n乙\n### 1.\n甲\n## 第二章\n### 1.\n丙\n",
            Dialect::Markdown,
            &expectation,
        );
        assert!(warnings.is_empty());
        let processed = ProcessedSubmission {
            submission_id: "s".into(),
            student_name: "李二".into(),
            source: "a.md".into(),
            dialect: Dialect::Markdown,
            tree,
            warnings,
            marks: None,
        };
        let empty = ReferenceMaterial {
            source: String::new(),
            dialect: Dialect::Markdown,
            tree: ProblemTree::default(),
            warnings: Vec::new(),
        };
        let jobs = build_jobs(&processed, &empty, &empty);
        let ids: Vec<String> = jobs.jobs.iter().map(|j| j.ctx.problem_id.to_string()).collect();
        assert_eq!(ids, vec!["chap1.prob2", "chap1.prob1", "chap2.prob1"]);
        assert!(jobs.jobs[0].reference.is_none());
    }

    #[test]
    fn test_escaping_entry_skips_only_that_submission() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("ws");
        let store = ArtifactStore::new(&workspace);
        let mut sink = WarningSink::for_assignment();
        let stats = store_archives(
            &store,
            "1",
            &[
                archive("HW1-2300017000-李二", &[("a.md", "## 第一章"), ("../../../../escape.md", "x")]),
                archive("HW1-2300017001-张三", &[("a.md", "## 第一章")]),
            ],
            &mut sink,
        );
        assert_eq!((stats.stored, stats.skipped), (1, 1));
        assert_eq!(sink.count(WarningCategory::MalformedArchive), 1);
        assert!(!dir.path().join("escape.md").exists());
        assert!(!store.manifest_path("2300017000").exists());
        assert!(store.manifest_path("2300017001").is_file());
    }

    #[test]
    fn test_store_failure_counts_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        // 提交目录被一个普通文件占住，第一份提交无法落盘
        let blocked = store.raw_dir("2300017000");
        std::fs::create_dir_all(blocked.parent().unwrap()).unwrap();
        std::fs::write(&blocked, "not a directory").unwrap();

        let mut sink = WarningSink::for_assignment();
        let stats = store_archives(
            &store,
            "1",
            &[
                archive("HW1-2300017000-李二", &[("a.md", "## 第一章")]),
                archive("HW1-2300017001-张三", &[("a.md", "## 第一章")]),
            ],
            &mut sink,
        );
        assert_eq!((stats.stored, stats.failed), (1, 1));
        assert!(store.manifest_path("2300017001").is_file());
    }
}
