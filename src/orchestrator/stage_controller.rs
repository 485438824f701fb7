//! 阶段控制器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责按固定顺序执行被请求的阶段。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：校验配置与题目清单（任何错误在触碰提交之前中止）
//! 2. **阶段排序**：无论以什么顺序请求，都按 下载 → 参考材料 → 处理 → 批改 → 发布 的顺序执行
//! 3. **依赖检查**：前置产物不存在时对该提交报依赖错误，不中止阶段
//! 4. **失败隔离**：单份提交失败不影响其他提交
//! 5. **阶段日志**：每个阶段的警告写入 `logs/<stage>.log`
//! 6. **全局统计**：每个阶段的成功 / 跳过 / 失败数量

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::config::MarkerConfig;
use crate::error::{ConfigError, DependencyError};
use crate::models::{ProcessedSubmission, ReferenceMaterial, SchemaExpectation, WarningSink};
use crate::orchestrator::assembler::MarkWriter;
use crate::orchestrator::mark_scheduler::{MarkScheduler, SubmissionJobs};
use crate::orchestrator::submission_processor::{self, ProcessOutcome};
use crate::services::{
    call_with_retry, ArtifactStore, CompletionParams, FsReferenceLoader, LanguageModel, LocalPlatform,
    OpenAiModel, PublishChannel, ReferenceLoader, RetryPolicy, SubmissionPlatform, WarnWriter,
};
use crate::utils::logging;
use crate::workflow::{ProblemFlow, Stage};

/// 外部协作者
#[derive(Clone)]
pub struct Collaborators {
    pub platform: Arc<dyn SubmissionPlatform>,
    pub references: Arc<dyn ReferenceLoader>,
    /// 只有批改阶段需要
    pub model: Option<Arc<dyn LanguageModel>>,
}

impl Collaborators {
    /// 本地目录平台 + OpenAI 兼容模型（未配置密钥时不创建模型）
    pub fn from_config(config: &MarkerConfig) -> Self {
        let model: Option<Arc<dyn LanguageModel>> = config
            .require_api_key()
            .ok()
            .map(|()| Arc::new(OpenAiModel::new(&config.llm)) as Arc<dyn LanguageModel>);
        Self {
            platform: Arc::new(LocalPlatform::new(&config.paths.inbox, &config.paths.outbox)),
            references: Arc::new(FsReferenceLoader::new(&config.paths.reference)),
            model,
        }
    }
}

/// 运行选项
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// 用新的自动版覆盖已有的人工复核版
    pub reseed_human: bool,
}

/// 一个阶段的统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStats {
    pub stage: Stage,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub warnings: usize,
}

impl StageStats {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            warnings: 0,
        }
    }
}

/// 应用主结构
pub struct App {
    config: MarkerConfig,
    expectation: Arc<SchemaExpectation>,
    collaborators: Collaborators,
    options: RunOptions,
    store: ArtifactStore,
    semaphore: Arc<Semaphore>,
    policy: RetryPolicy,
}

impl App {
    /// 初始化应用
    ///
    /// 配置或题目清单有误时直接返回错误，不触碰任何提交。
    pub fn initialize(config: MarkerConfig, collaborators: Collaborators, options: RunOptions) -> Result<Self, ConfigError> {
        let expectation = config.validate()?;
        let store = ArtifactStore::new(config.paths.workspace.join(config.homework_dir_name()));
        let semaphore = Arc::new(Semaphore::new(config.scheduler.max_in_flight));
        let policy = RetryPolicy::from(&config.scheduler);

        logging::log_startup(&config.homework_dir_name(), config.scheduler.max_in_flight, expectation.problem_count());

        Ok(Self {
            config,
            expectation: Arc::new(expectation),
            collaborators,
            options,
            store,
            semaphore,
            policy,
        })
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// 按固定顺序执行请求的阶段
    pub async fn run(&self, requested: &[Stage]) -> Result<Vec<StageStats>> {
        let stages = Stage::ordered(requested);
        if stages.is_empty() {
            warn!("⚠️ 没有请求任何阶段，程序结束");
            return Ok(Vec::new());
        }
        if stages.contains(&Stage::Marked) && self.collaborators.model.is_none() {
            return Err(ConfigError::MissingField {
                field: "llm.api_key",
            }
            .into());
        }

        let mut summary = Vec::with_capacity(stages.len());
        for stage in stages {
            logging::log_stage_start(stage);
            let writer = WarnWriter::for_stage(self.store.root(), stage);
            writer.init(stage)?;

            let mut sink = WarningSink::for_assignment();
            let mut stats = match stage {
                Stage::Downloaded => self.fetch(&mut sink).await,
                Stage::ReferenceLoaded => self.load_reference(&mut sink).await,
                Stage::Processed => self.process(&mut sink),
                Stage::Marked => self.mark(&mut sink).await,
                Stage::PublishedAutomated => self.publish(PublishChannel::Automated).await,
                Stage::PublishedHuman => self.publish(PublishChannel::Human).await,
            }
            .with_context(|| format!("阶段 {} 执行失败", stage))?;

            stats.warnings = sink.len();
            writer.write_all(sink.warnings())?;
            logging::log_stage_complete(&stats, writer.path());
            summary.push(stats);
        }

        logging::print_final_stats(&summary);
        Ok(summary)
    }

    /// 本阶段要处理的提交；前置产物缺失的提交报依赖错误并计入失败
    fn ready_submissions(&self, stage: Stage, stats: &mut StageStats) -> Result<Vec<String>> {
        let mut ready = Vec::new();
        for submission_id in self.store.downloaded_submissions()? {
            let missing = stage
                .required_inputs(&self.store, &submission_id)
                .into_iter()
                .find(|path| !path.is_file());
            match missing {
                Some(missing) => {
                    let e = DependencyError {
                        stage,
                        submission_id,
                        missing,
                    };
                    error!("❌ {}", e);
                    stats.failed += 1;
                }
                None => ready.push(submission_id),
            }
        }
        Ok(ready)
    }

    // ========== 各阶段 ==========

    async fn fetch(&self, sink: &mut WarningSink) -> Result<StageStats> {
        let mut stats = StageStats::new(Stage::Downloaded);
        let platform = self.collaborators.platform.clone();
        let assignment_id = self.config.assignment_id.as_str();

        let outcome = call_with_retry(&self.policy, &self.semaphore, "[抓取]", || {
            platform.fetch_submissions(assignment_id)
        })
        .await;
        let archives = match outcome.result {
            Ok(archives) => archives,
            Err(e) => {
                error!("❌ 拉取提交失败（尝试 {} 次）: {}", outcome.attempts, e);
                stats.failed += 1;
                return Ok(stats);
            }
        };
        info!("✓ 平台返回 {} 份提交", archives.len());

        let fetched = submission_processor::store_archives(&self.store, assignment_id, &archives, sink);
        stats.succeeded = fetched.stored;
        stats.skipped = fetched.skipped;
        stats.failed = fetched.failed;
        Ok(stats)
    }

    async fn load_reference(&self, sink: &mut WarningSink) -> Result<StageStats> {
        let mut stats = StageStats::new(Stage::ReferenceLoaded);
        if self.store.downloaded_submissions()?.is_empty() {
            let e = DependencyError {
                stage: Stage::ReferenceLoaded,
                submission_id: self.config.homework_dir_name(),
                missing: self.store.root().join("raw"),
            };
            error!("❌ {}", e);
            stats.failed += 1;
            return Ok(stats);
        }

        let references = self.collaborators.references.clone();
        let assignment_id = self.config.assignment_id.as_str();
        let outcome = call_with_retry(&self.policy, &self.semaphore, "[参考材料]", || {
            references.load(assignment_id)
        })
        .await;
        let (answer, description) = match outcome.result {
            Ok(docs) => docs,
            Err(e) => {
                error!("❌ 加载参考材料失败: {}", e);
                stats.failed += 1;
                return Ok(stats);
            }
        };

        for (document, path) in [
            (answer, self.store.reference_answer_path()),
            (description, self.store.reference_description_path()),
        ] {
            let material = submission_processor::reference_material(document, &self.expectation);
            info!(
                "✓ 参考材料 {}: {} 道题，{} 条警告",
                material.source,
                material.tree.problems().count(),
                material.warnings.len()
            );
            sink.extend(material.warnings.iter().cloned());
            self.store.write_json(&path, &material)?;
            stats.succeeded += 1;
        }
        Ok(stats)
    }

    fn process(&self, sink: &mut WarningSink) -> Result<StageStats> {
        let mut stats = StageStats::new(Stage::Processed);
        for submission_id in self.ready_submissions(Stage::Processed, &mut stats)? {
            match submission_processor::process_submission(&self.store, &submission_id, &self.expectation) {
                Ok(ProcessOutcome::Processed(processed)) => {
                    info!(
                        "[提交 {}] ✓ 解析完成: {} 道题，{} 条警告",
                        submission_id,
                        processed.tree.problems().count(),
                        processed.warnings.len()
                    );
                    sink.extend(processed.warnings);
                    stats.succeeded += 1;
                }
                Ok(ProcessOutcome::Skipped(warning)) => {
                    sink.push(warning);
                    stats.skipped += 1;
                }
                Err(e) => {
                    error!("[提交 {}] ❌ 处理失败: {:#}", submission_id, e);
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn mark(&self, sink: &mut WarningSink) -> Result<StageStats> {
        let mut stats = StageStats::new(Stage::Marked);
        let Some(model) = self.collaborators.model.clone() else {
            return Err(ConfigError::MissingField {
                field: "llm.api_key",
            }
            .into());
        };

        let ready = self.ready_submissions(Stage::Marked, &mut stats)?;
        if ready.is_empty() {
            return Ok(stats);
        }
        let answer: ReferenceMaterial = self.store.read_json(&self.store.reference_answer_path())?;
        let description: ReferenceMaterial = self.store.read_json(&self.store.reference_description_path())?;

        let mut batches: Vec<SubmissionJobs> = Vec::with_capacity(ready.len());
        for submission_id in ready {
            match self.store.read_json::<ProcessedSubmission>(&self.store.processed_path(&submission_id)) {
                Ok(processed) => batches.push(submission_processor::build_jobs(&processed, &answer, &description)),
                Err(e) => {
                    error!("[提交 {}] ❌ 读取处理产物失败: {}", submission_id, e);
                    stats.failed += 1;
                }
            }
        }

        let flow = ProblemFlow::new(
            model,
            CompletionParams::from(&self.config.llm),
            self.config.prompts.clone(),
            self.policy,
            self.semaphore.clone(),
            self.store.clone(),
        );
        let writer = Arc::new(MarkWriter::new(self.store.clone(), self.options.reseed_human));
        let marked = MarkScheduler::new(Arc::new(flow)).mark(batches, writer.clone()).await;

        info!(
            "📊 题目批改: 成功 {}，失败 {}",
            marked.succeeded, marked.failed
        );
        sink.extend(writer.take_warnings());
        stats.succeeded += marked.submissions;
        stats.failed += marked.sink_failures;
        Ok(stats)
    }

    async fn publish(&self, channel: PublishChannel) -> Result<StageStats> {
        let stage = match channel {
            PublishChannel::Automated => Stage::PublishedAutomated,
            PublishChannel::Human => Stage::PublishedHuman,
        };
        let mut stats = StageStats::new(stage);

        for submission_id in self.ready_submissions(stage, &mut stats)? {
            let source: PathBuf = match channel {
                PublishChannel::Automated => self.store.auto_markdown_path(&submission_id),
                PublishChannel::Human => self.store.human_markdown_path(&submission_id),
            };
            let markdown = match self.store.read_text(&source) {
                Ok(markdown) => markdown,
                Err(e) => {
                    error!("[提交 {}] ❌ {}", submission_id, e);
                    stats.failed += 1;
                    continue;
                }
            };

            let platform = &self.collaborators.platform;
            let context = format!("[提交 {}]", submission_id);
            let outcome = call_with_retry(&self.policy, &self.semaphore, &context, || {
                platform.publish(&submission_id, &markdown)
            })
            .await;
            match outcome.result {
                Ok(receipt) => {
                    self.store
                        .write_json(&self.store.receipt_path(&submission_id, channel), &receipt)?;
                    info!("[提交 {}] 📤 已发布{}", submission_id, channel_name(channel));
                    stats.succeeded += 1;
                }
                Err(e) => {
                    error!("[提交 {}] ❌ 发布失败（尝试 {} 次）: {}", submission_id, outcome.attempts, e);
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }
}

fn channel_name(channel: PublishChannel) -> &'static str {
    match channel {
        PublishChannel::Automated => "自动版",
        PublishChannel::Human => "人工复核版",
    }
}
