//! 内容块切分
//!
//! 在一个节点的正文里识别表格、公式、代码块、图片和普通段落。
//! 结构（章、题、子题）已经由上层切好，这里只处理叶子文本。

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{ContentBlock, Dialect, FormulaStyle, ProblemId, WarningCategory, WarningSink};

/// 允许的图片扩展名
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "svg"];

const MATH_ENVS: &[&str] = &[
    "equation", "align", "gather", "multline", "eqnarray", "flalign", "alignat", "displaymath",
];
const CODE_ENVS: &[&str] = &[
    "verbatim", "lstlisting", "minted", "algorithm", "algorithmic", "algorithm2e",
];
const TABLE_ENVS: &[&str] = &["table", "tabular", "tabularx", "longtable", "tabu"];
const FIGURE_ENVS: &[&str] = &["figure", "wrapfigure", "subfigure"];

static BEGIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\\begin\{([A-Za-z0-9]+)(\*?)\}(.*)$").expect("begin regex"));

static TABLE_SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\|?\s*:?-{3,}:?\s*(?:\|\s*:?-{3,}:?\s*)*\|?\s*$").expect("table separator regex")
});

static CAPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[*_]*\s*(?:表|Table\b|Tab\.|:\s*\S)").expect("caption regex"));

static TEX_CAPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\caption\{([^}]*)\}").expect("tex caption regex"));

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\(?:tag|label)\*?\{([^}]*)\}").expect("tag regex"));

static INLINE_MATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$([^$]+)\$$").expect("inline math regex"));

static MD_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)\s]+)(?:\s+[^)]*)?\)").expect("image regex"));

static TEX_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\includegraphics\s*(?:\[[^\]]*\])?\s*\{([^}]*)\}").expect("includegraphics regex")
});

static LST_LANGUAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"language\s*=\s*\{?([A-Za-z0-9+#]+)").expect("lst language regex"));

static BRACE_ARG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\[[^\]]*\])?\s*\{([^}]+)\}").expect("brace arg regex"));

/// 一次识别的结果：产生的块（可能被丢弃）和下一个未处理行
type Scan = (Option<ContentBlock>, usize);

/// 块识别上下文
struct BlockScanner<'a, 'w> {
    lines: Vec<String>,
    dialect: Dialect,
    at: Option<&'a ProblemId>,
    sink: &'w mut WarningSink,
}

/// 把一段正文切成内容块
pub fn parse_blocks(
    text: &str,
    dialect: Dialect,
    at: Option<&ProblemId>,
    sink: &mut WarningSink,
) -> Vec<ContentBlock> {
    let lines = text.lines().map(|l| l.trim_end().to_string()).collect();
    let mut scanner = BlockScanner {
        lines,
        dialect,
        at,
        sink,
    };
    if dialect == Dialect::Tex {
        scanner.drop_tex_images();
    }
    scanner.run()
}

impl BlockScanner<'_, '_> {
    fn warn(&mut self, message: impl Into<String>) {
        self.sink
            .warn(WarningCategory::MalformedContent, self.at, message);
    }

    fn run(&mut self) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        let mut paragraph: Vec<String> = Vec::new();
        let mut i = 0;

        while i < self.lines.len() {
            if self.lines[i].trim().is_empty() {
                flush_paragraph(&mut paragraph, &mut blocks);
                i += 1;
                continue;
            }

            let scanned = match self.dialect {
                Dialect::Markdown => self
                    .fenced_code(i)
                    .or_else(|| self.pipe_table(i))
                    .or_else(|| self.markdown_image(i)),
                Dialect::Tex => None,
            }
            .or_else(|| self.delimited_math(i, "$$", "$$"))
            .or_else(|| self.delimited_math(i, "\\[", "\\]"))
            .or_else(|| self.environment(i));

            match scanned {
                Some((block, next)) => {
                    flush_paragraph(&mut paragraph, &mut blocks);
                    blocks.extend(block);
                    i = next;
                }
                None => {
                    let line = self.paragraph_line(i);
                    if let Some(line) = line {
                        paragraph.push(line);
                    }
                    i += 1;
                }
            }
        }
        flush_paragraph(&mut paragraph, &mut blocks);
        blocks
    }

    /// 段落中的一行；Markdown 的行内图片在这里检查扩展名
    fn paragraph_line(&mut self, i: usize) -> Option<String> {
        let line = self.lines[i].clone();
        if self.dialect != Dialect::Markdown || !MD_IMAGE_RE.is_match(&line) {
            return Some(line);
        }

        let mut dropped = Vec::new();
        let kept = MD_IMAGE_RE
            .replace_all(&line, |caps: &regex::Captures| {
                if image_allowed(&caps[2]) {
                    caps[0].to_string()
                } else {
                    dropped.push(caps[2].to_string());
                    String::new()
                }
            })
            .into_owned();
        for path in dropped {
            self.warn(format!("图片 '{}' 的格式不受支持，已丢弃", path));
        }
        (!kept.trim().is_empty()).then_some(kept)
    }

    /// LaTeX 中的图片一律丢弃
    fn drop_tex_images(&mut self) {
        let mut dropped = Vec::new();
        for line in self.lines.iter_mut() {
            if TEX_IMAGE_RE.is_match(line) {
                for caps in TEX_IMAGE_RE.captures_iter(line) {
                    dropped.push(caps[1].to_string());
                }
                let stripped = TEX_IMAGE_RE.replace_all(line, "").trim_end().to_string();
                *line = stripped;
            }
        }
        for path in dropped {
            self.warn(format!("LaTeX 提交不支持图片，'{}' 已丢弃", path));
        }
    }

    fn fenced_code(&mut self, i: usize) -> Option<Scan> {
        let start = self.lines[i].trim_start();
        let fence = ["```", "~~~"].into_iter().find(|f| start.starts_with(f))?;
        let info = start[fence.len()..].trim();
        let language = (!info.is_empty()).then(|| info.to_string());

        let end = (i + 1..self.lines.len()).find(|&j| self.lines[j].trim_start().starts_with(fence));
        let (body_end, next) = match end {
            Some(j) => (j, j + 1),
            None => {
                self.warn("代码块没有闭合，已读到正文末尾");
                (self.lines.len(), self.lines.len())
            }
        };
        let text = self.lines[i + 1..body_end].join("\n");
        Some((Some(ContentBlock::Code { language, text }), next))
    }

    fn pipe_table(&mut self, i: usize) -> Option<Scan> {
        if !self.lines[i].trim_start().starts_with('|')
            || i + 1 >= self.lines.len()
            || !TABLE_SEPARATOR_RE.is_match(&self.lines[i + 1])
        {
            return None;
        }

        let mut j = i + 2;
        while j < self.lines.len() && self.lines[j].trim_start().starts_with('|') {
            j += 1;
        }
        let rows: Vec<String> = self.lines[i..j].to_vec();

        let caption_line = self
            .lines
            .get(j)
            .map(|l| l.trim().to_string())
            .filter(|l| CAPTION_RE.is_match(l));
        let caption = match caption_line {
            Some(caption) => {
                j += 1;
                Some(caption)
            }
            None => {
                self.warn("表格后面缺少标题行");
                None
            }
        };

        Some((Some(ContentBlock::Table { rows, caption }), j))
    }

    /// 独占一行的 Markdown 图片
    fn markdown_image(&mut self, i: usize) -> Option<Scan> {
        let line = self.lines[i].trim();
        let caps = MD_IMAGE_RE.captures(line)?;
        if caps[0].len() != line.len() {
            return None;
        }
        let alt = caps[1].to_string();
        let path = caps[2].to_string();
        if image_allowed(&path) {
            Some((Some(ContentBlock::Image { alt, path }), i + 1))
        } else {
            self.warn(format!("图片 '{}' 的格式不受支持，已丢弃", path));
            Some((None, i + 1))
        }
    }

    /// `$$…$$` 或 `\[…\]`
    fn delimited_math(&mut self, i: usize, open: &str, close: &str) -> Option<Scan> {
        let rest = self.lines[i].trim().strip_prefix(open)?.to_string();

        if let Some(end) = rest.find(close) {
            return Some((Some(formula(rest[..end].trim())), i + 1));
        }

        let mut body: Vec<String> = Vec::new();
        if !rest.trim().is_empty() {
            body.push(rest);
        }
        for j in i + 1..self.lines.len() {
            let line = &self.lines[j];
            if let Some(end) = line.find(close) {
                if !line[..end].trim().is_empty() {
                    body.push(line[..end].to_string());
                }
                return Some((Some(formula(&body.join("\n"))), j + 1));
            }
            body.push(line.clone());
        }

        let block = formula(&body.join("\n"));
        let next = self.lines.len();
        self.warn(format!("公式缺少结束符 '{}'", close));
        Some((Some(block), next))
    }

    /// `\begin{…}` 环境
    fn environment(&mut self, i: usize) -> Option<Scan> {
        let caps = BEGIN_RE.captures(&self.lines[i])?;
        let name = caps[1].to_string();
        let star = caps[2].to_string();
        let after_begin = caps[3].to_string();

        let kind = if MATH_ENVS.contains(&name.as_str()) {
            EnvKind::Math
        } else if CODE_ENVS.contains(&name.as_str()) {
            EnvKind::Code
        } else if TABLE_ENVS.contains(&name.as_str()) {
            EnvKind::Table
        } else if FIGURE_ENVS.contains(&name.as_str()) {
            EnvKind::Figure
        } else {
            return None;
        };

        let full_name = format!("{}{}", name, star);
        let keep_first = !matches!(kind, EnvKind::Code);
        let (inner, next, closed) = self.environment_body(i, &full_name, &after_begin, keep_first);
        if !closed {
            self.warn(format!("环境 {} 没有闭合", full_name));
        }

        let block = match kind {
            EnvKind::Math => Some(formula(inner.join("\n").trim())),
            EnvKind::Code => {
                // begin 行上只有参数，不计入正文
                Some(ContentBlock::Code {
                    language: code_language(&name, &after_begin),
                    text: inner.join("\n"),
                })
            }
            EnvKind::Table => {
                let rows = self.lines[i..next].to_vec();
                let mut caption = TEX_CAPTION_RE
                    .captures(&rows.join("\n"))
                    .map(|c| c[1].trim().to_string());
                let mut next = next;
                if caption.is_none() {
                    caption = self
                        .lines
                        .get(next)
                        .and_then(|l| TEX_CAPTION_RE.captures(l.trim()))
                        .map(|c| c[1].trim().to_string());
                    if caption.is_some() {
                        next += 1;
                    }
                }
                if caption.is_none() && self.dialect == Dialect::Markdown {
                    if let Some(line) = self.lines.get(next).map(|l| l.trim().to_string()) {
                        if CAPTION_RE.is_match(&line) {
                            caption = Some(line);
                            next += 1;
                        }
                    }
                }
                if caption.is_none() {
                    self.warn("表格缺少标题");
                }
                return Some((Some(ContentBlock::Table { rows, caption }), next));
            }
            EnvKind::Figure => {
                self.warn(format!("{} 环境中的图片不受支持，已丢弃", full_name));
                None
            }
        };

        Some((block, next))
    }

    /// 环境正文（不含 begin/end 行上的命令），返回 (正文行, 下一行, 是否闭合)
    fn environment_body(
        &self,
        i: usize,
        name: &str,
        after_begin: &str,
        keep_first: bool,
    ) -> (Vec<String>, usize, bool) {
        let begin = format!("\\begin{{{}}}", name);
        let end = format!("\\end{{{}}}", name);
        let mut depth = 1usize;
        let mut inner = Vec::new();

        // begin 行本身可能就包含 end
        if let Some(pos) = after_begin.find(&end) {
            if keep_first {
                inner.push(after_begin[..pos].to_string());
            }
            return (inner, i + 1, true);
        }
        if keep_first && !after_begin.trim().is_empty() {
            inner.push(after_begin.to_string());
        }

        for j in i + 1..self.lines.len() {
            let line = &self.lines[j];
            depth += line.matches(&begin).count();
            if line.contains(&end) {
                depth -= line.matches(&end).count().min(depth);
                if depth == 0 {
                    if let Some(pos) = line.find(&end) {
                        if !line[..pos].trim().is_empty() {
                            inner.push(line[..pos].to_string());
                        }
                    }
                    return (inner, j + 1, true);
                }
            }
            inner.push(line.clone());
        }
        (inner, self.lines.len(), false)
    }
}

enum EnvKind {
    Math,
    Code,
    Table,
    Figure,
}

fn code_language(env: &str, after_begin: &str) -> Option<String> {
    match env {
        "minted" => BRACE_ARG_RE
            .captures(after_begin)
            .map(|c| c[1].trim().to_string()),
        "lstlisting" => LST_LANGUAGE_RE
            .captures(after_begin)
            .map(|c| c[1].to_string()),
        "algorithm" | "algorithmic" | "algorithm2e" => Some("algorithm".to_string()),
        _ => None,
    }
}

/// 按正文判断公式样式
fn formula(body: &str) -> ContentBlock {
    let tag = TAG_RE.captures(body).map(|c| c[1].trim().to_string());
    let line_count = body.lines().filter(|l| !l.trim().is_empty()).count();
    let style = if tag.is_some() {
        FormulaStyle::Numbered
    } else if line_count > 1 || body.contains("\\\\") {
        FormulaStyle::MultiLine
    } else {
        FormulaStyle::Display
    };
    ContentBlock::Formula {
        style,
        body: body.to_string(),
        tag,
    }
}

fn flush_paragraph(paragraph: &mut Vec<String>, blocks: &mut Vec<ContentBlock>) {
    if paragraph.is_empty() {
        return;
    }
    let text = paragraph.join("\n");
    paragraph.clear();

    let trimmed = text.trim();
    if let Some(caps) = INLINE_MATH_RE.captures(trimmed) {
        blocks.push(ContentBlock::Formula {
            style: FormulaStyle::Inline,
            body: caps[1].trim().to_string(),
            tag: None,
        });
    } else {
        blocks.push(ContentBlock::Paragraph { text });
    }
}

fn image_allowed(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md(text: &str) -> (Vec<ContentBlock>, WarningSink) {
        let mut sink = WarningSink::detached();
        let blocks = parse_blocks(text, Dialect::Markdown, None, &mut sink);
        (blocks, sink)
    }

    #[test]
    fn test_table_with_caption() {
        let (blocks, sink) = md("| a | b |\n|---|:---:|\n| 1 | 2 |\n表 1：结果\n\n后文");
        assert!(sink.is_empty());
        assert_eq!(
            blocks[0],
            ContentBlock::Table {
                rows: vec!["| a | b |".into(), "|---|:---:|".into(), "| 1 | 2 |".into()],
                caption: Some("表 1：结果".into()),
            }
        );
        assert_eq!(blocks[1], ContentBlock::paragraph("后文"));
    }

    #[test]
    fn test_table_without_caption_kept_with_warning() {
        let (blocks, sink) = md("| a |\n| --- |\n| 1 |\n\n下一段");
        assert!(matches!(blocks[0], ContentBlock::Table { caption: None, .. }));
        assert_eq!(sink.count(WarningCategory::MalformedContent), 1);
    }

    #[test]
    fn test_formula_styles() {
        let (blocks, sink) = md(
            "$x^2$\n\n$$\na = b\n$$\n\n$$\na &= b \\\\\nc &= d\n$$\n\n\\begin{equation}\nE = mc^2 \\tag{3}\n\\end{equation}",
        );
        assert!(sink.is_empty());
        let styles: Vec<FormulaStyle> = blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Formula { style, .. } => Some(*style),
                _ => None,
            })
            .collect();
        assert_eq!(
            styles,
            vec![
                FormulaStyle::Inline,
                FormulaStyle::Display,
                FormulaStyle::MultiLine,
                FormulaStyle::Numbered
            ]
        );
        assert!(matches!(
            &blocks[3],
            ContentBlock::Formula { tag: Some(t), .. } if t == "3"
        ));
    }

    #[test]
    fn test_code_fence_is_opaque() {
        let (blocks, _) = md("```python\n### not a heading\n| a |\n```");
        assert_eq!(
            blocks,
            vec![ContentBlock::Code {
                language: Some("python".into()),
                text: "### not a heading\n| a |".into()
            }]
        );
    }

    #[test]
    fn test_unclosed_fence_warns() {
        let (blocks, sink) = md("```\nloop");
        assert_eq!(blocks.len(), 1);
        assert_eq!(sink.count(WarningCategory::MalformedContent), 1);
    }

    #[test]
    fn test_image_allow_list() {
        let (blocks, sink) = md("![图](a/plot.PNG)\n\n![x](scan.tiff)\n\n见 ![y](b.bmp) 和 ![z](c.heic)");
        assert_eq!(
            blocks[0],
            ContentBlock::Image {
                alt: "图".into(),
                path: "a/plot.PNG".into()
            }
        );
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1], ContentBlock::paragraph("见 ![y](b.bmp) 和 "));
        assert_eq!(sink.count(WarningCategory::MalformedContent), 2);
    }

    #[test]
    fn test_tex_blocks() {
        let mut sink = WarningSink::detached();
        let text = "文字\n\\includegraphics[width=3cm]{fig.png}\n\\begin{lstlisting}[language=C]\nint x;\n\\end{lstlisting}\n\\begin{tabular}{cc}\na & b\n\\end{tabular}\n\\caption{对比}\n\\begin{align*}\nx &= 1\n\\end{align*}";
        let blocks = parse_blocks(text, Dialect::Tex, None, &mut sink);

        assert_eq!(blocks[0], ContentBlock::paragraph("文字"));
        assert_eq!(
            blocks[1],
            ContentBlock::Code {
                language: Some("C".into()),
                text: "int x;".into()
            }
        );
        assert!(matches!(&blocks[2], ContentBlock::Table { caption: Some(c), .. } if c == "对比"));
        assert!(matches!(
            &blocks[3],
            ContentBlock::Formula { style: FormulaStyle::Display, .. }
        ));
        assert_eq!(sink.count(WarningCategory::MalformedContent), 1);
    }
}
