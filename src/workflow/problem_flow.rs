//! 一道题的批改流程 - 流程层
//!
//! 核心职责：定义"一道题"的完整批改对话
//!
//! 流程顺序：
//! 1. 没有子题：一轮给出题目描述、参考答案、学生作答
//! 2. 有子题：首轮只读题，之后每个子题一轮（第一个子题这一轮同时带上题目引言）
//! 3. 任务终止时（成功或失败）写出交互记录 `traces/<sid>/<problem-id>.txt`

use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::config::PromptTemplates;
use crate::error::LlmError;
use crate::models::tree::render_blocks;
use crate::models::{MarkResult, Node, ProblemId, RoundTrace, SubFeedback, Verdict};
use crate::services::prompts::{fill, section, PromptFields};
use crate::services::{call_with_retry, ArtifactStore, ChatTurn, CompletionParams, LanguageModel, RetryPolicy};
use crate::workflow::marking_ctx::MarkingCtx;

const TRACE_WIDTH: usize = 90;

/// 一个批改任务：一份提交的一道题
#[derive(Debug, Clone)]
pub struct MarkJob {
    pub ctx: MarkingCtx,
    /// 学生作答（题目级节点）
    pub student: Node,
    pub reference: Option<Node>,
    pub description: Option<Node>,
}

/// 一道题的对话状态
#[derive(Default)]
struct Conversation {
    turns: Vec<ChatTurn>,
    traces: Vec<RoundTrace>,
    attempts: usize,
}

/// 题目批改流程
///
/// - 编排一道题的多轮对话
/// - 每次模型调用都经过全局信号量和重试策略
/// - 失败不外抛，降级为失败的批改结果
pub struct ProblemFlow {
    model: Arc<dyn LanguageModel>,
    params: CompletionParams,
    templates: PromptTemplates,
    policy: RetryPolicy,
    semaphore: Arc<Semaphore>,
    store: ArtifactStore,
}

impl ProblemFlow {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        params: CompletionParams,
        templates: PromptTemplates,
        policy: RetryPolicy,
        semaphore: Arc<Semaphore>,
        store: ArtifactStore,
    ) -> Self {
        Self {
            model,
            params,
            templates,
            policy,
            semaphore,
            store,
        }
    }

    /// 批改一道题，并写出交互记录
    pub async fn run(&self, job: &MarkJob) -> MarkResult {
        let ctx = &job.ctx;
        info!("{} 📝 开始批改（模型: {}）", ctx, self.model.name());

        let mut conversation = Conversation::default();
        let result = match self.converse(job, &mut conversation).await {
            Ok(result) => {
                info!(
                    "{} ✓ 批改完成，评判: {}",
                    ctx,
                    result
                        .verdict
                        .as_ref()
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "未识别".to_string())
                );
                result
            }
            Err(e) => {
                error!("{} ❌ 批改失败: {}", ctx, e);
                let mut failed = MarkResult::failed(ctx.problem_id.clone(), e.to_string(), conversation.attempts);
                failed.trace = conversation.traces;
                failed
            }
        };

        let path = self.store.trace_path(&ctx.submission_id, &ctx.problem_id);
        let failure = (!result.success).then_some(result.feedback.as_str());
        let text = render_trace(&ctx.problem_id, &result.trace, failure);
        if let Err(e) = self.store.write_text(&path, &text) {
            error!("{} 写入交互记录失败: {}", ctx, e);
        }

        result
    }

    async fn converse(&self, job: &MarkJob, conversation: &mut Conversation) -> Result<MarkResult, LlmError> {
        let student = &job.student;
        let children = student.children();

        if children.is_empty() {
            let prompt = fill(
                &self.templates.no_subproblem,
                &PromptFields {
                    problem_description: &section("题目描述", &render(job.description.as_ref())),
                    reference_answer: &section("参考答案", &render(job.reference.as_ref())),
                    student_answer: &section("学生作答", &student.render()),
                    subproblem_nums: 0,
                    subproblem_id: "",
                },
            );
            let response = self.round(&job.ctx, conversation, None, prompt).await?;
            return Ok(MarkResult {
                problem_id: job.ctx.problem_id.clone(),
                success: true,
                verdict: Verdict::extract(&response),
                feedback: response,
                sub_feedback: Vec::new(),
                trace: std::mem::take(&mut conversation.traces),
                attempts: conversation.attempts,
            });
        }

        // 首轮：只读题
        let prompt = fill(
            &self.templates.subproblem_first_round,
            &PromptFields {
                problem_description: &render(job.description.as_ref()),
                subproblem_nums: children.len(),
                ..PromptFields::default()
            },
        );
        self.round(&job.ctx, conversation, None, prompt).await?;

        let mut sub_feedback = Vec::with_capacity(children.len());
        for (index, child) in children.iter().enumerate() {
            let label = child.label();
            let description = sub_material(job.description.as_ref(), label);
            let mut reference = section(&format!("参考答案 ({})", label), &sub_material(job.reference.as_ref(), label));
            let mut answer = section(&format!("学生作答 ({})", label), &child.render());
            if index == 0 {
                reference = join_intro(&intro(job.reference.as_ref()), reference);
                answer = join_intro(&render_blocks(student.own_blocks()), answer);
            }

            let prompt = fill(
                &self.templates.subproblem_round,
                &PromptFields {
                    problem_description: &section(&format!("题目描述 ({})", label), &description),
                    reference_answer: &reference,
                    student_answer: &answer,
                    subproblem_nums: children.len(),
                    subproblem_id: label,
                },
            );
            let response = self
                .round(&job.ctx, conversation, Some(label.to_string()), prompt)
                .await?;
            sub_feedback.push(SubFeedback {
                label: label.to_string(),
                verdict: Verdict::extract(&response),
                feedback: response,
            });
        }

        Ok(MarkResult {
            problem_id: job.ctx.problem_id.clone(),
            success: true,
            verdict: sum_scores(&sub_feedback),
            feedback: String::new(),
            sub_feedback,
            trace: std::mem::take(&mut conversation.traces),
            attempts: conversation.attempts,
        })
    }

    /// 一轮对话：追加用户消息，调用模型，记录回复
    async fn round(
        &self,
        ctx: &MarkingCtx,
        conversation: &mut Conversation,
        subproblem: Option<String>,
        prompt: String,
    ) -> Result<String, LlmError> {
        conversation.turns.push(ChatTurn::user(prompt.clone()));
        debug!(
            "{} 第 {} 轮，提示词长度: {} 字符",
            ctx,
            conversation.traces.len() + 1,
            prompt.chars().count()
        );

        let context = ctx.to_string();
        let turns = &conversation.turns;
        let outcome = call_with_retry(&self.policy, &self.semaphore, &context, || {
            self.model.complete(turns, &self.params)
        })
        .await;
        conversation.attempts += outcome.attempts;
        let completion = outcome.result?;

        conversation.turns.push(ChatTurn::assistant(completion.text.clone()));
        conversation.traces.push(RoundTrace {
            round: conversation.traces.len() + 1,
            subproblem,
            prompt,
            reasoning: completion.reasoning,
            response: completion.text.clone(),
        });
        Ok(completion.text)
    }
}

fn render(node: Option<&Node>) -> String {
    node.map(Node::render).unwrap_or_default()
}

fn intro(node: Option<&Node>) -> String {
    node.map(|n| render_blocks(n.own_blocks())).unwrap_or_default()
}

/// 参考材料中与子题标签对应的部分
fn sub_material(node: Option<&Node>, label: &str) -> String {
    node.and_then(|n| n.children().iter().find(|c| c.label() == label))
        .map(Node::render)
        .unwrap_or_default()
}

fn join_intro(intro: &str, rest: String) -> String {
    if intro.trim().is_empty() {
        rest
    } else {
        format!("{}\n\n{}", intro.trim(), rest)
    }
}

/// 所有子题都给出分数时求和
fn sum_scores(subs: &[SubFeedback]) -> Option<Verdict> {
    let mut total = 0.0;
    let mut out_of = Some(0.0);
    for sub in subs {
        match &sub.verdict {
            Some(Verdict::Score { value, out_of: max }) => {
                total += value;
                out_of = match (out_of, max) {
                    (Some(sum), Some(max)) => Some(sum + max),
                    _ => None,
                };
            }
            _ => return None,
        }
    }
    (!subs.is_empty()).then_some(Verdict::Score { value: total, out_of })
}

/// 交互记录文件内容
pub fn render_trace(problem_id: &ProblemId, rounds: &[RoundTrace], failure: Option<&str>) -> String {
    let mut out = format!("Problem ID: {}\n\n", problem_id);
    for round in rounds {
        let suffix = round
            .subproblem
            .as_ref()
            .map(|label| format!(" (Subproblem {})", label))
            .unwrap_or_default();
        out.push_str(&format!("Round {} starts{}\n", round.round, suffix));
        out.push_str(&format!("{:=^width$}\n", "User Message", width = TRACE_WIDTH));
        out.push_str(&format!("{}\n\n", round.prompt));
        out.push_str(&format!("{:=^width$}\n", "Reasoning Content", width = TRACE_WIDTH));
        match &round.reasoning {
            Some(reasoning) if !reasoning.is_empty() => out.push_str(&format!("{}\n\n", reasoning)),
            _ => out.push_str("No reasoning content available\n\n"),
        }
        out.push_str(&format!("{:=^width$}\n", "LLM Output", width = TRACE_WIDTH));
        out.push_str(&format!("{}\n\n", round.response));
        out.push_str(&format!("Round {} ends{}\n\n", round.round, suffix));
    }
    if let Some(message) = failure {
        out.push_str(&format!("{:=^width$}\n", "Marking Failed", width = TRACE_WIDTH));
        out.push_str(message);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Dialect, ProblemTree};
    use crate::services::Completion;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// 按调用顺序返回预设回复，并记下每次收到的对话
    struct Scripted {
        replies: Mutex<Vec<Result<String, LlmError>>>,
        seen: Mutex<Vec<Vec<ChatTurn>>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, prompt: &[ChatTurn], _: &CompletionParams) -> Result<Completion, LlmError> {
            self.seen.lock().unwrap().push(prompt.to_vec());
            let reply = self.replies.lock().unwrap().pop().unwrap_or_else(|| Ok("得分: 1/1".into()));
            reply.map(|text| Completion { text, reasoning: None })
        }
    }

    fn tree(doc: &str) -> ProblemTree {
        crate::parser::parse(doc, Dialect::Markdown).0
    }

    fn flow(model: Arc<Scripted>, store: ArtifactStore) -> ProblemFlow {
        ProblemFlow::new(
            model,
            CompletionParams {
                temperature: 0.0,
                max_tokens: 100,
            },
            PromptTemplates::default(),
            RetryPolicy {
                max_attempts: 2,
                base: Duration::from_millis(1),
                max: Duration::from_millis(1),
            },
            Arc::new(Semaphore::new(1)),
            store,
        )
    }

    fn job(student: &ProblemTree, reference: &ProblemTree, id: &str) -> MarkJob {
        let id: ProblemId = id.parse().unwrap();
        MarkJob {
            ctx: MarkingCtx::new("2300017000", id.clone()),
            student: student.find(&id).unwrap().clone(),
            reference: reference.find(&id).cloned(),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_single_round_without_subproblems() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let model = Arc::new(Scripted::new(vec![Ok("推导正确。\n得分: 9/10".into())]));
        let student = tree("## 第一章\n### 1.\nx = 2\n");
        let reference = tree("## 第一章\n### 1.\nx = 2，因为……\n");

        let result = flow(model.clone(), store.clone())
            .run(&job(&student, &reference, "chap1.prob1"))
            .await;
        assert!(result.success);
        assert_eq!(result.verdict.unwrap().to_string(), "9/10");
        assert_eq!(result.trace.len(), 1);

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0][0].content.contains("x = 2，因为"));

        let trace = std::fs::read_to_string(store.trace_path("2300017000", &"chap1.prob1".parse().unwrap())).unwrap();
        assert!(trace.starts_with("Problem ID: chap1.prob1\n\nRound 1 starts\n"));
        assert!(trace.contains(&format!("{:=^90}", "User Message")));
        assert!(trace.contains("No reasoning content available"));
    }

    #[tokio::test]
    async fn test_subproblem_rounds_share_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let model = Arc::new(Scripted::new(vec![
            Ok("已读题".into()),
            Ok("得分: 3/5".into()),
            Ok("得分: 4/5".into()),
        ]));
        let student = tree("## 第一章\n### 2.\n设 f(x)=x\n#### (a)\n甲\n#### (b)\n乙\n");
        let reference = tree("## 第一章\n### 2.\n#### (a)\n参考甲\n#### (b)\n参考乙\n");

        let result = flow(model.clone(), store)
            .run(&job(&student, &reference, "chap1.prob2"))
            .await;
        assert!(result.success);
        assert_eq!(result.sub_feedback.len(), 2);
        assert_eq!(result.verdict.unwrap().to_string(), "7/10");
        assert_eq!(result.trace[1].subproblem.as_deref(), Some("a"));

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        // 第一个子题带上题目引言，第二个不带
        assert!(seen[1][2].content.contains("设 f(x)=x"));
        assert!(seen[1][2].content.contains("参考甲"));
        assert!(!seen[2][4].content.contains("设 f(x)=x"));
        assert_eq!(seen[2].len(), 5);
    }

    #[tokio::test]
    async fn test_failure_degrades_and_still_writes_trace() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let transient = || LlmError::Transient {
            model: "scripted".into(),
            message: "503".into(),
        };
        let model = Arc::new(Scripted::new(vec![Err(transient()), Err(transient())]));
        let student = tree("## 第一章\n### 1.\n答\n");

        let result = flow(model, store.clone())
            .run(&job(&student, &ProblemTree::default(), "chap1.prob1"))
            .await;
        assert!(!result.success);
        assert_eq!(result.attempts, 2);
        let trace = std::fs::read_to_string(store.trace_path("2300017000", &"chap1.prob1".parse().unwrap())).unwrap();
        assert!(trace.contains("Marking Failed"));
    }

    struct Reasoning;

    #[async_trait]
    impl LanguageModel for Reasoning {
        fn name(&self) -> &str {
            "reasoning"
        }

        async fn complete(&self, _: &[ChatTurn], _: &CompletionParams) -> Result<Completion, LlmError> {
            Ok(Completion {
                text: "得分: 4/5".into(),
                reasoning: Some("先核对单位，再看推导".into()),
            })
        }
    }

    #[tokio::test]
    async fn test_reasoning_content_written_to_trace() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let student = tree("## 第一章\n### 1.\n答\n");
        let flow = ProblemFlow::new(
            Arc::new(Reasoning),
            CompletionParams {
                temperature: 0.0,
                max_tokens: 100,
            },
            PromptTemplates::default(),
            RetryPolicy {
                max_attempts: 1,
                base: Duration::from_millis(1),
                max: Duration::from_millis(1),
            },
            Arc::new(Semaphore::new(1)),
            store.clone(),
        );

        let result = flow.run(&job(&student, &student, "chap1.prob1")).await;
        assert_eq!(result.trace[0].reasoning.as_deref(), Some("先核对单位，再看推导"));

        let trace = std::fs::read_to_string(store.trace_path("2300017000", &"chap1.prob1".parse().unwrap())).unwrap();
        let header = format!("{:=^90}\n", "Reasoning Content");
        assert!(trace.contains(&format!("{}先核对单位，再看推导\n\n", header)));
        assert!(!trace.contains("No reasoning content available"));
    }
}
