//! 批改调度器 - 编排层
//!
//! ## 职责
//!
//! 一个任务 = 一份提交的一道题。所有任务同时派发，真正的并发由
//! `ProblemFlow` 内部的全局信号量在模型调用处限制。
//!
//! 每份提交的任务全部结束（成功或失败）后，按文档顺序把结果交给 `MarkSink`。
//! 这个屏障用 join 一组 future 实现，不用共享计数器。
//! 提交之间没有顺序要求。

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info};

use crate::models::MarkResult;
use crate::workflow::{MarkJob, ProblemFlow};

/// 一份提交的全部任务（已按文档顺序排列）
#[derive(Debug, Clone)]
pub struct SubmissionJobs {
    pub submission_id: String,
    pub jobs: Vec<MarkJob>,
}

/// 接收一份提交的全部批改结果
#[async_trait]
pub trait MarkSink: Send + Sync {
    async fn deliver(&self, submission_id: &str, results: Vec<MarkResult>) -> Result<()>;
}

/// 调度统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MarkStats {
    /// 成功交付的提交数
    pub submissions: usize,
    /// 交付失败的提交数
    pub sink_failures: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// 批改调度器
pub struct MarkScheduler {
    flow: Arc<ProblemFlow>,
}

impl MarkScheduler {
    pub fn new(flow: Arc<ProblemFlow>) -> Self {
        Self { flow }
    }

    /// 派发所有任务，返回汇总统计
    pub async fn mark(&self, batches: Vec<SubmissionJobs>, sink: Arc<dyn MarkSink>) -> MarkStats {
        let total_jobs: usize = batches.iter().map(|b| b.jobs.len()).sum();
        info!("📋 共 {} 份提交、{} 个批改任务", batches.len(), total_jobs);

        let handles: Vec<_> = batches
            .into_iter()
            .map(|batch| {
                let flow = self.flow.clone();
                let sink = sink.clone();
                tokio::spawn(async move { mark_submission(flow, batch, sink).await })
            })
            .collect();

        let mut stats = MarkStats::default();
        for outcome in join_all(handles).await {
            match outcome {
                Ok(one) => {
                    stats.submissions += one.submissions;
                    stats.sink_failures += one.sink_failures;
                    stats.succeeded += one.succeeded;
                    stats.failed += one.failed;
                }
                Err(e) => {
                    error!("提交任务执行失败: {}", e);
                    stats.sink_failures += 1;
                }
            }
        }
        stats
    }
}

/// 一份提交：派发全部题目，等待全部结束后交付
async fn mark_submission(flow: Arc<ProblemFlow>, batch: SubmissionJobs, sink: Arc<dyn MarkSink>) -> MarkStats {
    let SubmissionJobs { submission_id, jobs } = batch;
    info!("[提交 {}] 🚀 派发 {} 个批改任务", submission_id, jobs.len());

    let ids: Vec<_> = jobs.iter().map(|j| j.ctx.problem_id.clone()).collect();
    let handles: Vec<_> = jobs
        .into_iter()
        .map(|job| {
            let flow = flow.clone();
            tokio::spawn(async move { flow.run(&job).await })
        })
        .collect();

    // 屏障：全部任务到达终态
    let results: Vec<MarkResult> = join_all(handles)
        .await
        .into_iter()
        .zip(ids)
        .map(|(outcome, problem_id)| match outcome {
            Ok(result) => result,
            Err(e) => {
                error!("[提交 {}] 题目 {} 的任务异常退出: {}", submission_id, problem_id, e);
                MarkResult::failed(problem_id, format!("任务异常退出: {}", e), 0)
            }
        })
        .collect();

    let succeeded = results.iter().filter(|r| r.success).count();
    let mut stats = MarkStats {
        succeeded,
        failed: results.len() - succeeded,
        ..MarkStats::default()
    };
    info!(
        "[提交 {}] ✓ 批改结束: 成功 {}/{}",
        submission_id,
        stats.succeeded,
        results.len()
    );

    match sink.deliver(&submission_id, results).await {
        Ok(()) => stats.submissions = 1,
        Err(e) => {
            error!("[提交 {}] ❌ 写出批改结果失败: {:#}", submission_id, e);
            stats.sink_failures = 1;
        }
    }
    stats
}
