//! 中文数字与标签提取

use phf::phf_map;
use regex::Regex;
use std::sync::LazyLock;

static DIGITS: phf::Map<char, u64> = phf_map! {
    '零' => 0,
    '〇' => 0,
    '一' => 1,
    '二' => 2,
    '两' => 2,
    '三' => 3,
    '四' => 4,
    '五' => 5,
    '六' => 6,
    '七' => 7,
    '八' => 8,
    '九' => 9,
};

static UNITS: phf::Map<char, u64> = phf_map! {
    '十' => 10,
    '百' => 100,
    '千' => 1000,
};

static SECTIONS: phf::Map<char, u64> = phf_map! {
    '万' => 10_000,
    '亿' => 100_000_000,
};

static CHAPTER_CN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"第\s*([0-9零〇一二两三四五六七八九十百千万亿]+)\s*章").expect("chapter cn regex"));

static CHAPTER_EN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bchapter\s*([0-9]+)").expect("chapter en regex"));

static LEADING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([0-9]+)(?:\s|[.．、:：]|$)").expect("leading number regex"));

static PROBLEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:第\s*([0-9]+)\s*题|(?:problem|exercise|习题)?\s*([0-9]+|extra)\s*(?:[.．、:：)]|\s|$))\s*(.*)$")
        .expect("problem label regex")
});

/// 中文或阿拉伯数字转为整数
///
/// `"十二"` → 12，`"一百零五"` → 105，`"3"` → 3。无法识别时返回 `None`。
pub fn to_arabic(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(n) = text.parse::<u64>() {
        return Some(n);
    }

    let mut total = 0u64;
    let mut section = 0u64;
    let mut digit: Option<u64> = None;

    for c in text.chars() {
        if let Some(&d) = DIGITS.get(&c) {
            digit = Some(d);
        } else if let Some(&unit) = UNITS.get(&c) {
            // "十二" 的 "十" 前面没有数字
            section += digit.take().unwrap_or(1) * unit;
        } else if let Some(&big) = SECTIONS.get(&c) {
            section += digit.take().unwrap_or(0);
            total += section.max(1) * big;
            section = 0;
        } else {
            return None;
        }
    }

    Some(total + section + digit.unwrap_or(0))
}

/// 从章节标题中提取章节编号
///
/// 支持 `第一章`、`第 1 章`、`Chapter 3`、`2 线性方程组`。
pub fn chapter_label(heading: &str) -> Option<String> {
    if let Some(caps) = CHAPTER_CN_RE.captures(heading) {
        return to_arabic(&caps[1]).map(|n| n.to_string());
    }
    if let Some(caps) = CHAPTER_EN_RE.captures(heading) {
        return to_arabic(&caps[1]).map(|n| n.to_string());
    }
    LEADING_NUMBER_RE
        .captures(heading)
        .and_then(|caps| to_arabic(&caps[1]))
        .map(|n| n.to_string())
}

/// 从题目标题中提取 (题号, 剩余标题)
///
/// 支持 `1.`、`1 求证…`、`第3题`、`Problem 2`、`extra.`。
pub fn problem_label(heading: &str) -> Option<(String, String)> {
    let caps = PROBLEM_RE.captures(heading)?;
    let label = caps
        .get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_ascii_lowercase())?;
    let label = match label.parse::<u64>() {
        Ok(n) => n.to_string(),
        Err(_) => label,
    };
    Some((label, caps[3].trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_arabic() {
        assert_eq!(to_arabic("3"), Some(3));
        assert_eq!(to_arabic("十"), Some(10));
        assert_eq!(to_arabic("十二"), Some(12));
        assert_eq!(to_arabic("二十一"), Some(21));
        assert_eq!(to_arabic("一百零五"), Some(105));
        assert_eq!(to_arabic("两千"), Some(2000));
        assert_eq!(to_arabic("十二万"), Some(120_000));
        assert_eq!(to_arabic("章"), None);
        assert_eq!(to_arabic(""), None);
    }

    #[test]
    fn test_chapter_label() {
        assert_eq!(chapter_label("第一章 线性方程组").as_deref(), Some("1"));
        assert_eq!(chapter_label("第 12 章").as_deref(), Some("12"));
        assert_eq!(chapter_label("Chapter 3: Groups").as_deref(), Some("3"));
        assert_eq!(chapter_label("2 矩阵").as_deref(), Some("2"));
        assert_eq!(chapter_label("附录"), None);
    }

    #[test]
    fn test_problem_label() {
        assert_eq!(
            problem_label("1. 求证").unwrap(),
            ("1".to_string(), "求证".to_string())
        );
        assert_eq!(problem_label("Extra.").unwrap().0, "extra");
        assert_eq!(problem_label("第3题").unwrap().0, "3");
        assert_eq!(problem_label("Problem 02").unwrap().0, "2");
        assert_eq!(problem_label("注意"), None);
        assert_eq!(problem_label("12abc"), None);
    }
}
