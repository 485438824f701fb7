//! 警告写入服务 - 业务能力层
//!
//! 只负责"写阶段日志 `logs/<stage>.log`"能力，不关心流程

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::StoreError;
use crate::models::Warning;
use crate::workflow::Stage;

/// 警告写入服务
///
/// 职责：
/// - 每次运行开始时重写日志头（日志只保留本次运行）
/// - 逐条追加警告
/// - 不关心警告从哪个流程来
pub struct WarnWriter {
    log_path: PathBuf,
}

impl WarnWriter {
    /// 在作业目录下为某个阶段创建
    pub fn for_stage(homework_dir: &Path, stage: Stage) -> Self {
        Self {
            log_path: homework_dir.join("logs").join(format!("{}.log", stage)),
        }
    }

    /// 使用自定义文件路径创建
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// 写入日志头，覆盖上一次运行的日志
    pub fn init(&self, stage: Stage) -> Result<(), StoreError> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::WriteFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let header = format!(
            "{}\n阶段 {} 警告日志 - {}\n{}\n\n",
            "=".repeat(60),
            stage,
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            "=".repeat(60)
        );
        fs::write(&self.log_path, header).map_err(|source| StoreError::WriteFailed {
            path: self.log_path.clone(),
            source,
        })
    }

    /// 追加一批警告
    pub fn write_all(&self, warnings: &[Warning]) -> Result<(), StoreError> {
        if warnings.is_empty() {
            return Ok(());
        }
        debug!("写入 {} 条警告到 {}", warnings.len(), self.log_path.display());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|source| StoreError::WriteFailed {
                path: self.log_path.clone(),
                source,
            })?;

        let mut text = String::new();
        for warning in warnings {
            text.push_str(&warning.to_string());
            text.push('\n');
        }
        file.write_all(text.as_bytes())
            .map_err(|source| StoreError::WriteFailed {
                path: self.log_path.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WarningCategory;

    #[test]
    fn test_header_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WarnWriter::for_stage(dir.path(), Stage::Processed);
        writer.init(Stage::Processed).unwrap();
        writer
            .write_all(&[Warning::new(WarningCategory::MalformedArchive, "两个源文件")
                .with_submission("2300017000")])
            .unwrap();

        let text = fs::read_to_string(writer.path()).unwrap();
        assert!(writer.path().ends_with("logs/processed.log"));
        assert!(text.contains("阶段 processed 警告日志"));
        assert!(text.contains("malformed-archive"));
        assert!(text.contains("2300017000"));

        // 新一次运行覆盖旧内容
        writer.init(Stage::Processed).unwrap();
        let text = fs::read_to_string(writer.path()).unwrap();
        assert!(!text.contains("2300017000"));
    }
}
