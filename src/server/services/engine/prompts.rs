use std::path::Path;

use tracing::debug;

const DEFAULT_WHOLE_PAGE: &str = include_str!("../../../../prompts/whole_page.txt");
const DEFAULT_SINGLE_CHAR: &str = include_str!("../../../../prompts/single_char.txt");

/// Prompt texts the engine sends upstream. Opaque to the core; operators can
/// override them with files in the prompt directory.
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub whole_page: String,
    pub single_char: String,
}

impl PromptSet {
    pub fn load(dir: &str) -> Self {
        Self {
            whole_page: load_or_default(dir, "whole_page.txt", DEFAULT_WHOLE_PAGE),
            single_char: load_or_default(dir, "single_char.txt", DEFAULT_SINGLE_CHAR),
        }
    }
}

fn load_or_default(dir: &str, name: &str, default: &str) -> String {
    let path = Path::new(dir).join(name);
    match std::fs::read_to_string(&path) {
        Ok(text) => {
            debug!(path = %path.display(), "loaded prompt override");
            text
        }
        Err(_) => default.to_string(),
    }
}

/// First multi-agent pass: structure only.
pub fn structure_focus(base: &str) -> String {
    format!("{base}\n\n本次请只关注间架结构问题，逐字审视重心、部件比例与行列布局。")
}

/// Second multi-agent pass: strokes only.
pub fn stroke_focus(base: &str) -> String {
    format!("{base}\n\n本次请只关注笔画问题，逐字审视起笔、行笔、收笔与笔画力度。")
}

/// Final multi-agent pass: merge the two drafts into one critique in the
/// canonical output format.
pub fn compose(base: &str, structure_draft: &str, stroke_draft: &str) -> String {
    format!(
        "{base}\n\n下面是两位助教分别从结构和笔画角度写的初评，请综合两份初评与图片本身，\
         输出最终点评：\n\n[结构初评]\n{structure_draft}\n\n[笔画初评]\n{stroke_draft}"
    )
}
