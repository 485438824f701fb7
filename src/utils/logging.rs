/// 日志工具模块
///
/// 提供运行过程中的日志格式化和输出辅助函数
use std::path::Path;
use tracing::info;

use crate::orchestrator::StageStats;
use crate::workflow::Stage;

/// 记录程序启动信息
///
/// # 参数
/// - `homework`: 作业目录名，如 `HW3`
/// - `max_in_flight`: 同时进行的外部调用上限
/// - `problem_count`: 题目清单中的题目数
pub fn log_startup(homework: &str, max_in_flight: usize, problem_count: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 作业自动批改流水线");
    info!("📚 作业: {}，题目清单共 {} 道题", homework, problem_count);
    info!("📊 外部调用并发上限: {}", max_in_flight);
    info!("{}", "=".repeat(60));
}

/// 记录阶段开始
pub fn log_stage_start(stage: Stage) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始阶段: {}", stage);
    info!("{}", "=".repeat(60));
}

/// 记录阶段完成
///
/// # 参数
/// - `stats`: 阶段统计
/// - `log_path`: 本阶段的警告日志
pub fn log_stage_complete(stats: &StageStats, log_path: &Path) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ 阶段 {} 完成: 成功 {}，跳过 {}，失败 {}",
        stats.stage, stats.succeeded, stats.skipped, stats.failed
    );
    if stats.warnings > 0 {
        info!("⚠️ {} 条警告已写入: {}", stats.warnings, log_path.display());
    }
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
pub fn print_final_stats(summary: &[StageStats]) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部阶段完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    for stats in summary {
        info!(
            "{:<20} ✅ {:>4}  ⏭️ {:>4}  ❌ {:>4}  ⚠️ {:>4}",
            stats.stage.as_str(),
            stats.succeeded,
            stats.skipped,
            stats.failed,
            stats.warnings
        );
    }
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大字符数
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
