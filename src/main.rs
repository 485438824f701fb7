use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use auto_marker::orchestrator::{App, Collaborators, RunOptions};
use auto_marker::{logger, MarkerConfig, Stage};

/// 作业自动批改流水线
#[derive(Debug, Parser)]
#[command(name = "auto-marker", version, about)]
struct Cli {
    /// 配置文件路径
    #[arg(long, env = "AUTO_MARKER_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// 日志级别（覆盖 RUST_LOG）
    #[arg(long)]
    log_level: Option<String>,

    /// 从平台拉取提交
    #[arg(long)]
    fetch: bool,

    /// 读取参考答案与题目描述
    #[arg(long)]
    reference: bool,

    /// 解析并对齐提交
    #[arg(long)]
    process: bool,

    /// 调用 LLM 批改
    #[arg(long)]
    mark: bool,

    /// 发布自动版批改结果
    #[arg(long)]
    publish_automated: bool,

    /// 发布人工复核版批改结果
    #[arg(long)]
    publish_human: bool,

    /// 执行全部阶段（不含发布）
    #[arg(long)]
    all: bool,

    /// 用新的自动版覆盖已有的人工复核版
    #[arg(long)]
    reseed_human: bool,
}

impl Cli {
    fn stages(&self) -> Vec<Stage> {
        let mut stages = Vec::new();
        if self.all || self.fetch {
            stages.push(Stage::Downloaded);
        }
        if self.all || self.reference {
            stages.push(Stage::ReferenceLoaded);
        }
        if self.all || self.process {
            stages.push(Stage::Processed);
        }
        if self.all || self.mark {
            stages.push(Stage::Marked);
        }
        if self.publish_automated {
            stages.push(Stage::PublishedAutomated);
        }
        if self.publish_human {
            stages.push(Stage::PublishedHuman);
        }
        stages
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    logger::init(cli.log_level.as_deref());

    // 加载配置
    let config = MarkerConfig::load(&cli.config)
        .with_context(|| format!("加载配置 {} 失败", cli.config.display()))?;

    // 初始化并运行应用
    let collaborators = Collaborators::from_config(&config);
    let options = RunOptions {
        reseed_human: cli.reseed_human,
    };
    let app = App::initialize(config, collaborators, options).context("初始化失败")?;
    app.run(&cli.stages()).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_excludes_publishing() {
        let cli = Cli::parse_from(["auto-marker", "--all"]);
        assert_eq!(
            cli.stages(),
            vec![Stage::Downloaded, Stage::ReferenceLoaded, Stage::Processed, Stage::Marked]
        );
    }

    #[test]
    fn test_flags_map_to_stages() {
        let cli = Cli::parse_from(["auto-marker", "--publish-human", "--mark", "--log-level", "debug"]);
        assert_eq!(cli.stages(), vec![Stage::Marked, Stage::PublishedHuman]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }
}
