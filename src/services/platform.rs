//! 提交平台 - 业务能力层
//!
//! 真实平台的客户端不在本项目内，这里定义接口并提供一个本地目录实现：
//! - 收件目录下每个子目录是一份提交，目录名就是提交标题
//! - 发布的 Markdown 写到发件目录 `<outbox>/<sid>.md`

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::PlatformError;
use crate::models::{ArchiveEntry, RawArchive};

/// 发布回执
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PublishReceipt {
    pub submission_id: String,
    pub location: String,
    /// 发布内容的 SHA-256
    pub sha256: String,
    pub published_at: String,
}

/// 提交平台
#[async_trait]
pub trait SubmissionPlatform: Send + Sync {
    /// 拉取某次作业的全部提交
    async fn fetch_submissions(&self, assignment_id: &str) -> Result<Vec<RawArchive>, PlatformError>;

    /// 发布一份批改结果
    async fn publish(&self, submission_id: &str, markdown: &str) -> Result<PublishReceipt, PlatformError>;
}

/// 本地目录平台
pub struct LocalPlatform {
    inbox: PathBuf,
    outbox: PathBuf,
}

impl LocalPlatform {
    pub fn new(inbox: impl Into<PathBuf>, outbox: impl Into<PathBuf>) -> Self {
        Self {
            inbox: inbox.into(),
            outbox: outbox.into(),
        }
    }
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> PlatformError + '_ {
    move |source| PlatformError::from_io(path, source)
}

/// 递归读出目录下所有文件，名字用 `/` 分隔
fn read_tree(root: &Path) -> Result<Vec<ArchiveEntry>, PlatformError> {
    let mut entries = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for item in fs::read_dir(&dir).map_err(io_error(&dir))? {
            let item = item.map_err(io_error(&dir))?;
            let path = item.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let bytes = fs::read(&path).map_err(io_error(&path))?;
            entries.push(ArchiveEntry::new(name, bytes));
        }
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

#[async_trait]
impl SubmissionPlatform for LocalPlatform {
    async fn fetch_submissions(&self, assignment_id: &str) -> Result<Vec<RawArchive>, PlatformError> {
        info!("📥 从 {} 拉取作业 HW{} 的提交", self.inbox.display(), assignment_id);

        let mut folders = Vec::new();
        for item in fs::read_dir(&self.inbox).map_err(io_error(&self.inbox))? {
            let item = item.map_err(io_error(&self.inbox))?;
            if item.path().is_dir() {
                folders.push(item.path());
            }
        }
        folders.sort();

        let mut archives = Vec::with_capacity(folders.len());
        for folder in folders {
            let title = folder
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let entries = read_tree(&folder)?;
            debug!("提交 '{}' 包含 {} 个文件", title, entries.len());
            archives.push(RawArchive {
                platform_id: title.clone(),
                title,
                entries,
            });
        }
        Ok(archives)
    }

    async fn publish(&self, submission_id: &str, markdown: &str) -> Result<PublishReceipt, PlatformError> {
        fs::create_dir_all(&self.outbox).map_err(io_error(&self.outbox))?;
        let path = self.outbox.join(format!("{}.md", submission_id));
        fs::write(&path, markdown).map_err(io_error(&path))?;

        Ok(PublishReceipt {
            submission_id: submission_id.to_string(),
            location: path.display().to_string(),
            sha256: hex::encode(Sha256::digest(markdown.as_bytes())),
            published_at: chrono::Local::now().to_rfc3339(),
        })
    }
}
