//! 参考材料加载 - 业务能力层
//!
//! 每次作业有一份参考答案和一份题目描述，和学生提交一样是 Markdown 或 LaTeX。
//! 本地实现按文件名查找：`HW{n}-answer.md|tex`、`HW{n}-description.md|tex`。

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::PlatformError;
use crate::models::Dialect;

/// 一份源文档
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub name: String,
    pub dialect: Dialect,
    pub text: String,
}

/// 参考材料加载器
#[async_trait]
pub trait ReferenceLoader: Send + Sync {
    /// 返回 (参考答案, 题目描述)
    async fn load(&self, assignment_id: &str) -> Result<(SourceDocument, SourceDocument), PlatformError>;
}

/// 从目录加载
pub struct FsReferenceLoader {
    dir: PathBuf,
}

impl FsReferenceLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn find(&self, assignment_id: &str, kind: &str) -> Result<SourceDocument, PlatformError> {
        for ext in ["md", "markdown", "tex"] {
            let name = format!("HW{}-{}.{}", assignment_id, kind, ext);
            let path = self.dir.join(&name);
            if !path.is_file() {
                continue;
            }
            let bytes = std::fs::read(&path).map_err(|source| PlatformError::from_io(&path, source))?;
            let dialect = Dialect::from_path(&path).unwrap_or(Dialect::Markdown);
            return Ok(SourceDocument {
                name,
                dialect,
                text: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        let expected = self.dir.join(format!("HW{}-{}.md", assignment_id, kind));
        Err(PlatformError::Io {
            path: expected,
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("找不到 HW{}-{}.md 或 .tex", assignment_id, kind),
            ),
        })
    }
}

#[async_trait]
impl ReferenceLoader for FsReferenceLoader {
    async fn load(&self, assignment_id: &str) -> Result<(SourceDocument, SourceDocument), PlatformError> {
        let answer = self.find(assignment_id, "answer")?;
        let description = self.find(assignment_id, "description")?;
        Ok((answer, description))
    }
}
