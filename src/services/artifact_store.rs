//! 产物存储服务 - 业务能力层
//!
//! 一次作业的所有产物都在 `<workspace>/HW{n}/` 下：
//!
//! ```text
//! raw/<sid>/submission.json        抓取阶段
//! raw/<sid>/files/...
//! reference/answer.json            参考材料阶段
//! reference/description.json
//! processed/<sid>.json             处理阶段（批改后补写批改结果）
//! marks/<sid>.auto.md              批改阶段
//! marks/<sid>.human.md
//! marks/<sid>.human.seed.json
//! traces/<sid>/<problem-id>.txt
//! published/<sid>.automated.json   发布阶段回执
//! published/<sid>.human.json
//! logs/<stage>.log
//! ```
//!
//! 所有写入都先写临时文件再改名，读者不会看到写了一半的文件。

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::models::ProblemId;

/// 发布渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishChannel {
    Automated,
    Human,
}

impl PublishChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishChannel::Automated => "automated",
            PublishChannel::Human => "human",
        }
    }
}

/// 产物存储
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// `root` 是作业目录 `<workspace>/HW{n}`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========== 路径 ==========

    pub fn raw_dir(&self, submission_id: &str) -> PathBuf {
        self.root.join("raw").join(submission_id)
    }

    pub fn manifest_path(&self, submission_id: &str) -> PathBuf {
        self.raw_dir(submission_id).join("submission.json")
    }

    pub fn files_dir(&self, submission_id: &str) -> PathBuf {
        self.raw_dir(submission_id).join("files")
    }

    pub fn reference_answer_path(&self) -> PathBuf {
        self.root.join("reference").join("answer.json")
    }

    pub fn reference_description_path(&self) -> PathBuf {
        self.root.join("reference").join("description.json")
    }

    pub fn processed_path(&self, submission_id: &str) -> PathBuf {
        self.root.join("processed").join(format!("{}.json", submission_id))
    }

    pub fn auto_markdown_path(&self, submission_id: &str) -> PathBuf {
        self.root.join("marks").join(format!("{}.auto.md", submission_id))
    }

    pub fn human_markdown_path(&self, submission_id: &str) -> PathBuf {
        self.root.join("marks").join(format!("{}.human.md", submission_id))
    }

    pub fn seed_manifest_path(&self, submission_id: &str) -> PathBuf {
        self.root
            .join("marks")
            .join(format!("{}.human.seed.json", submission_id))
    }

    pub fn trace_path(&self, submission_id: &str, problem_id: &ProblemId) -> PathBuf {
        self.root
            .join("traces")
            .join(submission_id)
            .join(format!("{}.txt", problem_id.file_stem()))
    }

    pub fn receipt_path(&self, submission_id: &str, channel: PublishChannel) -> PathBuf {
        self.root
            .join("published")
            .join(format!("{}.{}.json", submission_id, channel.as_str()))
    }

    // ========== 读写 ==========

    /// 已抓取的提交编号，按编号排序
    pub fn downloaded_submissions(&self) -> Result<Vec<String>, StoreError> {
        let raw = self.root.join("raw");
        if !raw.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&raw).map_err(|source| StoreError::ReadFailed {
            path: raw.clone(),
            source,
        })?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::ReadFailed {
                path: raw.clone(),
                source,
            })?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.manifest_path(&name).is_file() {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// 原子写入：同目录临时文件 + 改名
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let write_failed = |source| StoreError::WriteFailed {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));
        fs::write(&tmp, bytes).map_err(write_failed)?;
        fs::rename(&tmp, path).map_err(|source| {
            let _ = fs::remove_file(&tmp);
            StoreError::WriteFailed {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    pub fn write_text(&self, path: &Path, text: &str) -> Result<(), StoreError> {
        self.write_atomic(path, text.as_bytes())
    }

    /// 以带缩进的 JSON 写入，末尾换行
    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let mut text = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        text.push('\n');
        self.write_atomic(path, text.as_bytes())
    }

    pub fn read_text(&self, path: &Path) -> Result<String, StoreError> {
        fs::read_to_string(path).map_err(|source| StoreError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, StoreError> {
        let text = self.read_text(path)?;
        serde_json::from_str(&text).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read_bytes(&self, path: &Path) -> Result<Vec<u8>, StoreError> {
        fs::read(path).map_err(|source| StoreError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 删除目录（不存在时忽略）
    /// 删除一个产物文件（不存在时忽略）
    pub fn remove_file(&self, path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::WriteFailed {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn remove_dir(&self, path: &Path) -> Result<(), StoreError> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::WriteFailed {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
    }

    #[test]
    fn test_layout() {
        let store = ArtifactStore::new("/ws/HW1");
        let id: ProblemId = "chap1.prob4(2)(a)".parse().unwrap();
        assert_eq!(
            store.trace_path("2300017000", &id),
            PathBuf::from(format!("/ws/HW1/traces/2300017000/{}.txt", id.file_stem()))
        );
        assert_eq!(
            store.receipt_path("2300017000", PublishChannel::Human),
            PathBuf::from("/ws/HW1/published/2300017000.human.json")
        );
        assert_eq!(
            store.seed_manifest_path("s"),
            PathBuf::from("/ws/HW1/marks/s.human.seed.json")
        );
    }

    #[test]
    fn test_atomic_json_round_trip_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.processed_path("2300017000");
        store
            .write_json(&path, &Sample { name: "李二".into() })
            .unwrap();
        let back: Sample = store.read_json(&path).unwrap();
        assert_eq!(back.name, "李二");

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_downloaded_submissions_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        for sid in ["2300017002", "2300017001"] {
            store.write_text(&store.manifest_path(sid), "{}").unwrap();
        }
        fs::create_dir_all(store.raw_dir("stray")).unwrap();
        assert_eq!(
            store.downloaded_submissions().unwrap(),
            vec!["2300017001", "2300017002"]
        );
    }
}
