//! 工作流阶段
//!
//! 六个阶段严格有序。一个 (提交, 阶段) 的状态只由该阶段的产物是否存在决定，
//! 不单独存储。

use std::fmt;
use std::path::PathBuf;

use crate::services::{ArtifactStore, PublishChannel};

/// 工作流阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Downloaded,
    ReferenceLoaded,
    Processed,
    Marked,
    PublishedAutomated,
    PublishedHuman,
}

/// (提交, 阶段) 的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    NotRun,
    Done,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Downloaded,
        Stage::ReferenceLoaded,
        Stage::Processed,
        Stage::Marked,
        Stage::PublishedAutomated,
        Stage::PublishedHuman,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Downloaded => "downloaded",
            Stage::ReferenceLoaded => "reference-loaded",
            Stage::Processed => "processed",
            Stage::Marked => "marked",
            Stage::PublishedAutomated => "published-automated",
            Stage::PublishedHuman => "published-human",
        }
    }

    /// 按固定顺序排列并去重
    pub fn ordered(requested: &[Stage]) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| requested.contains(stage))
            .collect()
    }

    /// 本阶段对某个提交的产物；作业级阶段返回作业级产物
    pub fn output(&self, store: &ArtifactStore, submission_id: &str) -> PathBuf {
        match self {
            Stage::Downloaded => store.manifest_path(submission_id),
            Stage::ReferenceLoaded => store.reference_answer_path(),
            Stage::Processed => store.processed_path(submission_id),
            Stage::Marked => store.auto_markdown_path(submission_id),
            Stage::PublishedAutomated => store.receipt_path(submission_id, PublishChannel::Automated),
            Stage::PublishedHuman => store.receipt_path(submission_id, PublishChannel::Human),
        }
    }

    /// 本阶段处理某个提交前必须存在的产物
    pub fn required_inputs(&self, store: &ArtifactStore, submission_id: &str) -> Vec<PathBuf> {
        match self {
            Stage::Downloaded | Stage::ReferenceLoaded => Vec::new(),
            Stage::Processed => vec![
                store.manifest_path(submission_id),
                store.reference_answer_path(),
            ],
            Stage::Marked => vec![
                store.processed_path(submission_id),
                store.reference_answer_path(),
                store.reference_description_path(),
            ],
            Stage::PublishedAutomated => vec![store.auto_markdown_path(submission_id)],
            Stage::PublishedHuman => vec![
                store.receipt_path(submission_id, PublishChannel::Automated),
                store.human_markdown_path(submission_id),
            ],
        }
    }

    pub fn state(&self, store: &ArtifactStore, submission_id: &str) -> StageState {
        if self.output(store, submission_id).is_file() {
            StageState::Done
        } else {
            StageState::NotRun
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
