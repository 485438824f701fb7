//! 提交压缩包内容
//!
//! 平台交回的是已经解开的条目列表；这里负责过滤编译/系统垃圾文件、
//! 拍平唯一的根目录、找出可识别的源文件。

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use super::submission::Dialect;

/// 需要跳过的条目（名字中包含即跳过）
pub const JUNK_PATTERNS: &[&str] = &[
    "__MACOSX",
    ".log",
    ".bbl",
    ".fdb_latexmk",
    ".fls",
    ".idx",
    ".ilg",
    ".ind",
    ".out",
    ".synctex.gz",
    ".synctex(busy)",
    ".thm",
    ".toc",
    ".xdv",
    ".vscode",
    ".aux",
    ".run.xml",
    ".blg",
    ".DS_Store",
];

/// 压缩包中的一个文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// 包内相对路径，`/` 分隔
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// 路径只由普通片段组成，落盘后不会离开提交目录
    pub fn is_contained(&self) -> bool {
        !self.name.is_empty()
            && Path::new(&self.name)
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    }

    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn is_junk(&self) -> bool {
        JUNK_PATTERNS.iter().any(|p| self.name.contains(p))
    }

    pub fn dialect(&self) -> Option<Dialect> {
        Dialect::from_path(&self.name)
    }

    /// 按 UTF-8 解码，非法字节被替换
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// 平台交回的一份原始提交
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArchive {
    pub platform_id: String,
    pub title: String,
    pub entries: Vec<ArchiveEntry>,
}

impl RawArchive {
    /// 会逃出提交目录的条目名
    pub fn escaping_entries(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| !e.is_contained())
            .map(|e| e.name.as_str())
            .collect()
    }

    /// 过滤垃圾条目和目录条目，并拍平唯一的根目录
    pub fn cleaned_entries(&self) -> Vec<ArchiveEntry> {
        let mut kept: Vec<ArchiveEntry> = self
            .entries
            .iter()
            .filter(|e| !e.is_directory() && !e.is_junk())
            .map(|e| ArchiveEntry::new(e.name.trim_start_matches("./"), e.bytes.clone()))
            .collect();

        if let Some(root) = single_root(&kept) {
            let prefix = format!("{}/", root);
            for entry in kept.iter_mut() {
                if let Some(rest) = entry.name.strip_prefix(&prefix) {
                    entry.name = rest.to_string();
                }
            }
        }

        kept.sort_by(|a, b| a.name.cmp(&b.name));
        kept
    }
}

/// 所有条目都在同一个顶层目录下时返回该目录名
fn single_root(entries: &[ArchiveEntry]) -> Option<String> {
    let mut root: Option<&str> = None;
    for entry in entries {
        let (first, rest) = entry.name.split_once('/')?;
        if rest.is_empty() {
            return None;
        }
        match root {
            None => root = Some(first),
            Some(r) if r == first => {}
            Some(_) => return None,
        }
    }
    root.map(str::to_string)
}

/// 可识别的源文件（`.md` / `.tex`）
pub fn recognized_sources(entries: &[ArchiveEntry]) -> Vec<&ArchiveEntry> {
    entries.iter().filter(|e| e.dialect().is_some()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_junk_filtered_and_root_flattened() {
        let archive = RawArchive {
            platform_id: "note-1".into(),
            title: "HW1-2300017000-李二".into(),
            entries: vec![
                ArchiveEntry::new("hw1/", Vec::new()),
                ArchiveEntry::new("hw1/main.tex", b"\\section{a}".to_vec()),
                ArchiveEntry::new("hw1/main.aux", Vec::new()),
                ArchiveEntry::new("hw1/fig/plot.png", vec![1, 2]),
                ArchiveEntry::new("__MACOSX/hw1/._main.tex", Vec::new()),
                ArchiveEntry::new("hw1/.DS_Store", Vec::new()),
            ],
        };

        let names: Vec<String> = archive.cleaned_entries().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["fig/plot.png", "main.tex"]);
    }

    #[test]
    fn test_no_flatten_with_multiple_roots() {
        let archive = RawArchive {
            platform_id: "note-2".into(),
            title: String::new(),
            entries: vec![
                ArchiveEntry::new("a/x.md", Vec::new()),
                ArchiveEntry::new("b/y.md", Vec::new()),
            ],
        };
        let cleaned = archive.cleaned_entries();
        assert_eq!(cleaned[0].name, "a/x.md");
        assert_eq!(recognized_sources(&cleaned).len(), 2);
    }

    #[test]
    fn test_escaping_entries() {
        let archive = RawArchive {
            platform_id: "note-3".into(),
            title: String::new(),
            entries: vec![
                ArchiveEntry::new("a.md", Vec::new()),
                ArchiveEntry::new("./hw/b.md", Vec::new()),
                ArchiveEntry::new("../../escape.md", Vec::new()),
                ArchiveEntry::new("hw/../../c.md", Vec::new()),
                ArchiveEntry::new("/etc/passwd", Vec::new()),
            ],
        };
        assert_eq!(
            archive.escaping_entries(),
            vec!["../../escape.md", "hw/../../c.md", "/etc/passwd"]
        );
    }
}
