//! 阶段控制器端到端测试：本地目录平台 + 脚本化模型

use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use auto_marker::error::LlmError;
use auto_marker::orchestrator::{App, Collaborators, RunOptions, StageStats};
use auto_marker::services::{
    ChatTurn, Completion, CompletionParams, FsReferenceLoader, LanguageModel, LocalPlatform,
};
use auto_marker::{MarkerConfig, Stage};

/// 回复里带上调用序号，方便区分两次批改的产物
struct CountingModel {
    calls: AtomicUsize,
}

#[async_trait]
impl LanguageModel for CountingModel {
    fn name(&self) -> &str {
        "counting"
    }

    async fn complete(&self, _: &[ChatTurn], _: &CompletionParams) -> Result<Completion, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Completion {
            text: format!("第 {} 次批改，思路清晰。\n得分: 8/10", n),
            reasoning: None,
        })
    }
}

const SCHEMA: &str = "chapter 1: 1, 2(a)(b)\nchapter 2: 1";

const ANSWER: &str = "## 第一章\n### 1.\n参考一\n### 2.\n#### (a)\n参考甲\n#### (b)\n参考乙\n## 第二章\n### 1.\n参考三\n";

const STUDENT: &str = "## 第一章\n### 1.\n作答一\n### 2.\n#### (a)\n作答甲\n#### (b)\n作答乙\n## 第二章\n### 1.\n作答三\n";

fn write(path: &Path, text: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
}

impl Fixture {
    /// 三份提交，其中 2300017002 的压缩包里有两个源文件
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        write(&root.join("inbox/HW1-2300017000-李二/hw1/answer.md"), STUDENT);
        write(&root.join("inbox/HW1-2300017000-李二/hw1/.DS_Store"), "");
        write(&root.join("inbox/HW1-2300017001-张三/main.tex"), "\\section{第一章}\n\\subsection{1.}\n作答\n");
        write(&root.join("inbox/HW1-2300017002-王五/a.md"), STUDENT);
        write(&root.join("inbox/HW1-2300017002-王五/b.tex"), "");
        write(&root.join("reference/HW1-answer.md"), ANSWER);
        write(&root.join("reference/HW1-description.md"), ANSWER);
        Self { _dir: dir, root }
    }

    fn config(&self) -> MarkerConfig {
        let mut config: MarkerConfig = toml::from_str(&format!(
            "assignment_id = \"1\"\n[schema]\nproblems = \"\"\"\n{}\n\"\"\"\n",
            SCHEMA
        ))
        .unwrap();
        config.paths.workspace = self.root.join("workspace");
        config.paths.inbox = self.root.join("inbox");
        config.paths.outbox = self.root.join("outbox");
        config.paths.reference = self.root.join("reference");
        config.scheduler.max_in_flight = 2;
        config.scheduler.backoff_base_ms = 1;
        config.scheduler.backoff_max_ms = 1;
        config
    }

    fn app(&self, model: Option<Arc<dyn LanguageModel>>, reseed_human: bool) -> App {
        let config = self.config();
        let collaborators = Collaborators {
            platform: Arc::new(LocalPlatform::new(&config.paths.inbox, &config.paths.outbox)),
            references: Arc::new(FsReferenceLoader::new(&config.paths.reference)),
            model,
        };
        App::initialize(config, collaborators, RunOptions { reseed_human }).unwrap()
    }

    fn homework(&self) -> std::path::PathBuf {
        self.root.join("workspace/HW1")
    }
}

fn model() -> Option<Arc<dyn LanguageModel>> {
    Some(Arc::new(CountingModel {
        calls: AtomicUsize::new(0),
    }))
}

fn stats(summary: &[StageStats], stage: Stage) -> &StageStats {
    summary.iter().find(|s| s.stage == stage).unwrap()
}

#[tokio::test]
async fn test_stages_run_in_fixed_order() {
    let fixture = Fixture::new();
    let app = fixture.app(model(), false);

    let summary = app
        .run(&[Stage::Marked, Stage::Processed, Stage::ReferenceLoaded, Stage::Downloaded])
        .await
        .unwrap();
    let order: Vec<Stage> = summary.iter().map(|s| s.stage).collect();
    assert_eq!(
        order,
        vec![Stage::Downloaded, Stage::ReferenceLoaded, Stage::Processed, Stage::Marked]
    );

    assert_eq!(stats(&summary, Stage::Downloaded).succeeded, 3);
    assert_eq!(stats(&summary, Stage::ReferenceLoaded).succeeded, 2);

    // 两个源文件的压缩包只跳过自己
    let processed = stats(&summary, Stage::Processed);
    assert_eq!((processed.succeeded, processed.skipped), (2, 1));
    let log = fs::read_to_string(fixture.homework().join("logs/processed.log")).unwrap();
    assert_eq!(log.matches("[malformed-archive]").count(), 1);

    let marked = stats(&summary, Stage::Marked);
    assert_eq!((marked.succeeded, marked.failed), (2, 1));
    let auto = fs::read_to_string(fixture.homework().join("marks/2300017000.auto.md")).unwrap();
    assert!(auto.starts_with("# 批改结果 - 李二 (2300017000)"));
    let p1 = auto.find("## chap1.prob1").unwrap();
    let p2 = auto.find("## chap1.prob2").unwrap();
    let p3 = auto.find("## chap2.prob1").unwrap();
    assert!(p1 < p2 && p2 < p3);
    assert!(fixture
        .homework()
        .join("traces/2300017000/chap1.prob2.txt")
        .is_file());
}

#[tokio::test]
async fn test_processing_twice_is_byte_identical() {
    let fixture = Fixture::new();
    let app = fixture.app(None, false);
    app.run(&[Stage::Downloaded, Stage::ReferenceLoaded, Stage::Processed])
        .await
        .unwrap();
    let path = fixture.homework().join("processed/2300017001.json");
    let first = fs::read(&path).unwrap();

    app.run(&[Stage::Processed]).await.unwrap();
    assert_eq!(fs::read(&path).unwrap(), first);
}

#[tokio::test]
async fn test_marking_before_processing_is_dependency_failure() {
    let fixture = Fixture::new();
    let app = fixture.app(model(), false);
    app.run(&[Stage::Downloaded, Stage::ReferenceLoaded]).await.unwrap();

    let summary = app.run(&[Stage::Marked]).await.unwrap();
    let marked = stats(&summary, Stage::Marked);
    assert_eq!((marked.succeeded, marked.failed), (0, 3));
    assert!(!fixture.homework().join("marks").exists());
}

#[tokio::test]
async fn test_marking_without_model_is_fatal() {
    let fixture = Fixture::new();
    let app = fixture.app(None, false);
    assert!(app.run(&[Stage::Downloaded, Stage::Marked]).await.is_err());
    // 在触碰任何提交之前中止
    assert!(!fixture.homework().join("raw").exists());
}

#[tokio::test]
async fn test_remark_keeps_human_copy() {
    let fixture = Fixture::new();
    let app = fixture.app(model(), false);
    app.run(&[Stage::Downloaded, Stage::ReferenceLoaded, Stage::Processed, Stage::Marked])
        .await
        .unwrap();

    let auto_path = fixture.homework().join("marks/2300017000.auto.md");
    let human_path = fixture.homework().join("marks/2300017000.human.md");
    assert_eq!(fs::read(&auto_path).unwrap(), fs::read(&human_path).unwrap());

    let edited = format!("{}\n助教批注：第 2 题扣分偏重。\n", fs::read_to_string(&human_path).unwrap());
    fs::write(&human_path, &edited).unwrap();
    let auto_before = fs::read(&auto_path).unwrap();

    let summary = app.run(&[Stage::Marked]).await.unwrap();
    assert!(stats(&summary, Stage::Marked).warnings >= 1);
    assert_eq!(fs::read_to_string(&human_path).unwrap(), edited);
    assert_ne!(fs::read(&auto_path).unwrap(), auto_before);
    let log = fs::read_to_string(fixture.homework().join("logs/marked.log")).unwrap();
    assert!(log.contains("[human-copy-retained] 提交 2300017000"));

    // 发布人工版需要先发布自动版
    let summary = app.run(&[Stage::PublishedHuman]).await.unwrap();
    assert_eq!(stats(&summary, Stage::PublishedHuman).failed, 3);

    let summary = app
        .run(&[Stage::PublishedHuman, Stage::PublishedAutomated])
        .await
        .unwrap();
    assert_eq!(stats(&summary, Stage::PublishedAutomated).succeeded, 2);
    assert_eq!(stats(&summary, Stage::PublishedHuman).succeeded, 2);
    let published = fs::read_to_string(fixture.root.join("outbox/2300017000.md")).unwrap();
    assert_eq!(published, edited);
    assert!(fixture
        .homework()
        .join("published/2300017000.human.json")
        .is_file());
}

#[tokio::test]
async fn test_refetched_malformed_submission_is_not_marked() {
    let fixture = Fixture::new();
    let app = fixture.app(model(), false);
    app.run(&[Stage::Downloaded, Stage::ReferenceLoaded, Stage::Processed])
        .await
        .unwrap();
    let processed = fixture.homework().join("processed/2300017000.json");
    assert!(processed.is_file());

    // 学生重新提交，这次多带了一个源文件
    write(&fixture.root.join("inbox/HW1-2300017000-李二/hw1/extra.tex"), "");
    let summary = app
        .run(&[Stage::Downloaded, Stage::Processed, Stage::Marked])
        .await
        .unwrap();

    assert_eq!(stats(&summary, Stage::Processed).skipped, 2);
    assert!(!processed.exists());
    let marked = stats(&summary, Stage::Marked);
    assert_eq!((marked.succeeded, marked.failed), (1, 2));
    assert!(!fixture.homework().join("marks/2300017000.auto.md").exists());
}
