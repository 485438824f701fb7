//! 批改提示词模板
//!
//! 模板中可用的占位符：
//! - `{problem_description}` 题目描述
//! - `{reference_answer}` 参考答案
//! - `{student_answer}` 学生作答
//! - `{subproblem_nums}` 子题数量
//! - `{subproblem_id}` 子题标签

/// 无子题的题目：一轮给出全部材料
pub const DEFAULT_NO_SUBPROBLEM: &str = r#"你是一名严谨的助教，请批改下面这道题。

{problem_description}

{reference_answer}

{student_answer}

请逐步核对学生的推导，指出错误并说明原因。
最后单独一行给出结论，格式为 `得分: x/10`。"#;

/// 有子题的题目：首轮只读题
pub const DEFAULT_SUBPROBLEM_FIRST_ROUND: &str = r#"你是一名严谨的助教。下面这道题共有 {subproblem_nums} 个子题，接下来会逐个发给你批改。

{problem_description}

请先通读题目，确认理解后简要复述题意即可，暂时不要批改。"#;

/// 有子题的题目：每个子题一轮
pub const DEFAULT_SUBPROBLEM_ROUND: &str = r#"现在批改子题 ({subproblem_id})。

{problem_description}

{reference_answer}

{student_answer}

请逐步核对学生的推导，指出错误并说明原因。
最后单独一行给出结论，格式为 `得分: x/10`。"#;

/// 填入模板的材料
#[derive(Debug, Clone, Default)]
pub struct PromptFields<'a> {
    pub problem_description: &'a str,
    pub reference_answer: &'a str,
    pub student_answer: &'a str,
    pub subproblem_nums: usize,
    pub subproblem_id: &'a str,
}

/// 填充模板；未知占位符原样保留
pub fn fill(template: &str, fields: &PromptFields<'_>) -> String {
    template
        .replace("{problem_description}", fields.problem_description)
        .replace("{reference_answer}", fields.reference_answer)
        .replace("{student_answer}", fields.student_answer)
        .replace("{subproblem_nums}", &fields.subproblem_nums.to_string())
        .replace("{subproblem_id}", fields.subproblem_id)
}

/// 给一段材料加上小标题，空材料保持为空
pub fn section(heading: &str, body: &str) -> String {
    if body.trim().is_empty() {
        format!("## {}\n\n(无)", heading)
    } else {
        format!("## {}\n\n{}", heading, body.trim())
    }
}
