//! Fenced code block helpers

const FENCE: &str = "```";

/// Strip one leading fence line (with optional language tag) and one
/// trailing fence marker, if present.
pub fn strip_code_fence(text: &str) -> String {
    let mut body = text.trim();
    if body.starts_with(FENCE) {
        body = match body.find('\n') {
            Some(pos) => &body[pos + 1..],
            None => "",
        };
    }
    let trimmed = body.trim_end();
    if let Some(stripped) = trimmed.strip_suffix(FENCE) {
        body = stripped;
    }
    body.trim().to_string()
}

/// Drop every fence line, keeping the code between them
pub fn remove_fence_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with(FENCE))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Language tag of the leading fence, e.g. `json` for a json-tagged fence
pub fn fence_language(text: &str) -> Option<String> {
    let first = text.trim_start().lines().next()?;
    let tag = first.trim().strip_prefix(FENCE)?.trim();
    if tag.is_empty() {
        None
    } else {
        Some(tag.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tagged_fence() {
        let text = "```sql\ncreate table t (id int);\n```";
        assert_eq!(strip_code_fence(text), "create table t (id int);");
        assert_eq!(fence_language(text).as_deref(), Some("sql"));
    }

    #[test]
    fn leaves_unfenced_text_alone() {
        assert_eq!(strip_code_fence("  select 1;  "), "select 1;");
        assert_eq!(fence_language("select 1;"), None);
    }

    #[test]
    fn removes_every_fence_line() {
        let text = "```js\nconst a = 1\n```\n\n```js\nconst b = 2\n```";
        assert_eq!(remove_fence_lines(text).trim(), "const a = 1\n\nconst b = 2");
    }
}
