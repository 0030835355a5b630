//! Fixed expressions behind the convenience tools.
//!
//! Caller-supplied strings are embedded as string literals, so they always
//! pass through [`quote`].

const USER_TEXT: &str = r#"select(.type == "user" and (.message.content | type == "string"))"#;
const USER_BLOCKS: &str = r#"select(.type == "user" and (.message.content | type == "array"))"#;
const ASSISTANT_BLOCKS: &str =
    r#"select(.type == "assistant" and (.message.content | type == "array"))"#;

/// Escapes `raw` for use inside a double-quoted string literal.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

fn quote(raw: &str) -> String {
    format!("\"{}\"", escape(raw))
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.filter(|s| !s.is_empty())
}

/// `content_type` is `"string"` (plain prompts, the default) or `"array"`
/// (block content such as tool results). `pattern` is a regex.
pub fn user_messages(pattern: Option<&str>, content_type: Option<&str>) -> String {
    let base = match content_type.map(str::trim) {
        Some("array") => USER_BLOCKS,
        _ => USER_TEXT,
    };
    match non_empty(pattern) {
        Some(pattern) => format!(
            "{base} | select(.message.content | if type == \"string\" then . else tojson end | test({}))",
            quote(pattern)
        ),
        None => base.to_string(),
    }
}

pub fn tools(tool_name: Option<&str>) -> String {
    let matcher = match non_empty(tool_name) {
        Some(name) => format!(r#".type == "tool_use" and .name == {}"#, quote(name)),
        None => r#".type == "tool_use""#.to_string(),
    };
    format!("{ASSISTANT_BLOCKS} | select([.message.content[] | select({matcher})] | length > 0)")
}

pub fn tool_errors() -> String {
    format!(
        r#"{USER_BLOCKS} | select([.message.content[] | select(.type == "tool_result" and .is_error == true)] | length > 0)"#
    )
}

pub fn token_usage() -> String {
    r#"select(.type == "assistant" and (.message | type == "object") and (.message | has("usage")))"#
        .to_string()
}

pub fn conversation_flow() -> String {
    r#"select(.type == "user" or .type == "assistant")"#.to_string()
}

pub fn system_errors() -> String {
    r#"select(.type == "system" and .subtype == "api_error")"#.to_string()
}

pub fn file_snapshots() -> String {
    r#"select(.type == "file-history-snapshot" and has("messageId"))"#.to_string()
}

pub fn timestamps() -> String {
    "select(.timestamp != null)".to_string()
}

/// Summary records, optionally narrowed by a case-insensitive keyword regex.
pub fn summaries(keyword: Option<&str>) -> String {
    let base = r#"select(.type == "summary")"#;
    match non_empty(keyword) {
        Some(keyword) => format!(
            r#"{base} | select(.summary | tostring | test({}; "i"))"#,
            quote(keyword)
        ),
        None => base.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    ToolUse,
    ToolResult,
}

impl BlockType {
    pub fn parse(raw: Option<&str>) -> Result<Self, String> {
        match raw.map(str::trim) {
            None | Some("") | Some("tool_use") => Ok(Self::ToolUse),
            Some("tool_result") => Ok(Self::ToolResult),
            Some(other) => Err(format!(
                "invalid block_type '{other}' (expected 'tool_use' or 'tool_result')"
            )),
        }
    }
}

/// Individual content blocks rather than whole records.
pub fn tool_blocks(block: BlockType) -> String {
    match block {
        BlockType::ToolUse => {
            format!(r#"{ASSISTANT_BLOCKS} | .message.content[] | select(.type == "tool_use")"#)
        }
        BlockType::ToolResult => {
            format!(r#"{USER_BLOCKS} | .message.content[] | select(.type == "tool_result")"#)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use sessionq_filter::Filter;

    fn run(expression: &str, records: &[Value]) -> Vec<Value> {
        let filter = Filter::compile(expression)
            .unwrap_or_else(|err| panic!("{expression}: {err}"));
        records
            .iter()
            .flat_map(|record| filter.run(record))
            .filter_map(Result::ok)
            .collect()
    }

    fn records() -> Vec<Value> {
        vec![
            json!({"type": "user", "message": {"content": "Fix the \"parser\" bug"}, "timestamp": "t1"}),
            json!({"type": "assistant", "message": {"content": [
                {"type": "text", "text": "ok"},
                {"type": "tool_use", "name": "Read", "input": {}},
                {"type": "tool_use", "name": "Edit", "input": {}}
            ], "usage": {"input_tokens": 10}}, "timestamp": "t2"}),
            json!({"type": "user", "message": {"content": [
                {"type": "tool_result", "is_error": true, "content": "boom"}
            ]}}),
            json!({"type": "system", "subtype": "api_error"}),
            json!({"type": "summary", "summary": "Parser Refactor"}),
            json!({"type": "file-history-snapshot", "messageId": "m1"}),
        ]
    }

    #[test]
    fn escape_handles_quotes_backslashes_and_controls() {
        assert_eq!(escape(r#"a"b\c"#), r#"a\"b\\c"#);
        assert_eq!(escape("x\ny\u{1}"), "x\\ny\\u0001");
        assert_eq!(escape(r"\(1+1)"), r"\\(1+1)");
    }

    #[test]
    fn escaped_strings_round_trip_through_the_parser() {
        for raw in [r#"say "hi""#, r"back\slash", "multi\nline", r"\(nope)"] {
            let out = run(&quote(raw), &[json!(null)]);
            assert_eq!(out, vec![json!(raw)]);
        }
    }

    #[test]
    fn user_messages_by_content_type_and_pattern() {
        let data = records();
        assert_eq!(run(&user_messages(None, None), &data).len(), 1);
        assert_eq!(run(&user_messages(None, Some("array")), &data).len(), 1);
        assert_eq!(run(&user_messages(Some("\"parser\""), None), &data).len(), 1);
        assert_eq!(run(&user_messages(Some("boom"), Some("array")), &data).len(), 1);
        assert_eq!(run(&user_messages(Some("parser"), None), &data).len(), 1);
        assert_eq!(run(&user_messages(Some("nomatch"), None), &data).len(), 0);
    }

    #[test]
    fn tools_match_once_per_record() {
        let data = records();
        assert_eq!(run(&tools(None), &data).len(), 1);
        assert_eq!(run(&tools(Some("Edit")), &data).len(), 1);
        assert_eq!(run(&tools(Some("Write")), &data).len(), 0);
        assert_eq!(run(&tools(Some(r#"x" or true or ""#)), &data).len(), 0);
    }

    #[test]
    fn fixed_queries_select_expected_records() {
        let data = records();
        assert_eq!(run(&tool_errors(), &data).len(), 1);
        assert_eq!(run(&token_usage(), &data).len(), 1);
        assert_eq!(run(&conversation_flow(), &data).len(), 3);
        assert_eq!(run(&system_errors(), &data).len(), 1);
        assert_eq!(run(&file_snapshots(), &data).len(), 1);
        assert_eq!(run(&timestamps(), &data).len(), 2);
        assert_eq!(run(&summaries(None), &data).len(), 1);
        assert_eq!(run(&summaries(Some("parser")), &data).len(), 1);
        assert_eq!(run(&summaries(Some("lexer")), &data).len(), 0);
    }

    #[test]
    fn tool_blocks_extract_content_blocks() {
        let data = records();
        let uses = run(&tool_blocks(BlockType::ToolUse), &data);
        assert_eq!(
            uses.iter().map(|b| b["name"].clone()).collect::<Vec<_>>(),
            vec![json!("Read"), json!("Edit")]
        );
        let results = run(&tool_blocks(BlockType::ToolResult), &data);
        assert_eq!(results, vec![json!({"type": "tool_result", "is_error": true, "content": "boom"})]);
    }

    #[test]
    fn block_type_parsing() {
        assert_eq!(BlockType::parse(None), Ok(BlockType::ToolUse));
        assert_eq!(BlockType::parse(Some("tool_result")), Ok(BlockType::ToolResult));
        assert!(BlockType::parse(Some("text")).is_err());
    }
}
