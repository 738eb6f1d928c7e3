use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;
use wayfinder_core::{CapabilityCall, CapabilityCatalog, Error, Result};

use crate::prompts::NO_CALL_TOKEN;

static THINK_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());
static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?si)```[ \t]*json[ \t]*\r?\n?(.*?)```").unwrap());
static ANY_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").unwrap());

const THINK_OPEN: &str = "<think>";

/// Pulls a capability call out of free-form backend output.
///
/// Fail-closed: anything ambiguous or malformed yields `None`. Skipping a
/// tool is preferred over calling one with misparsed arguments.
#[derive(Clone)]
pub struct CallParser {
    catalog: Arc<CapabilityCatalog>,
}

impl CallParser {
    pub fn new(catalog: Arc<CapabilityCatalog>) -> Self {
        Self { catalog }
    }

    pub fn parse(&self, raw: &str) -> Option<CapabilityCall> {
        match self.extract(raw) {
            Ok(call) => call,
            Err(e) => {
                debug!(error = %e, "Discarding unparseable capability call");
                None
            }
        }
    }

    fn extract(&self, raw: &str) -> Result<Option<CapabilityCall>> {
        let visible = strip_thinking(raw);
        let body = fenced_body(&visible);
        let Some(candidate) = brace_candidate(body) else {
            return Ok(None);
        };

        let candidate = candidate.trim();
        if candidate.is_empty() || candidate.eq_ignore_ascii_case(NO_CALL_TOKEN) {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(candidate)
            .map_err(|e| Error::Parse(format!("invalid JSON candidate: {}", e)))?;
        let call = to_call(value)?;

        if !self.catalog.is_known(&call.name) {
            return Err(Error::Parse(format!("unknown capability '{}'", call.name)));
        }
        if !self.catalog.validate(&call) {
            return Err(Error::Parse(format!(
                "arguments rejected for '{}': {}",
                call.name, call.arguments
            )));
        }
        Ok(Some(call))
    }
}

/// Remove `<think>…</think>` blocks. An unterminated block hides everything after it.
fn strip_thinking(raw: &str) -> String {
    let stripped = THINK_BLOCK.replace_all(raw, "");
    match stripped.find(THINK_OPEN) {
        Some(pos) => stripped[..pos].to_string(),
        None => stripped.into_owned(),
    }
}

/// Interior of the first ```json fence, else of the first fence of any kind,
/// else the whole text.
fn fenced_body(text: &str) -> &str {
    JSON_FENCE
        .captures(text)
        .or_else(|| ANY_FENCE.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
}

/// Greedy first-`{`-to-last-`}` slice. Text without braces is returned as is
/// (so a bare null token can be recognised); an opening brace with no closing
/// brace after it is treated as no call.
fn brace_candidate(text: &str) -> Option<&str> {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => Some(&text[start..=end]),
        (None, _) => Some(text),
        _ => None,
    }
}

fn to_call(value: Value) -> Result<CapabilityCall> {
    let Value::Object(mut obj) = value else {
        return Err(Error::Parse("candidate is not a JSON object".to_string()));
    };
    let name = match obj.remove("name") {
        Some(Value::String(name)) => name.trim().to_string(),
        _ => return Err(Error::Parse("missing string field 'name'".to_string())),
    };
    let arguments = match obj.remove("arguments").or_else(|| obj.remove("parameters")) {
        None | Some(Value::Null) => Value::Object(Map::new()),
        // Some models double-encode the arguments object as a string.
        Some(Value::String(s)) => serde_json::from_str(&s)
            .map_err(|e| Error::Parse(format!("arguments string is not JSON: {}", e)))?,
        Some(v) => v,
    };
    Ok(CapabilityCall::new(name, arguments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser() -> CallParser {
        CallParser::new(Arc::new(CapabilityCatalog::default()))
    }

    #[test]
    fn test_plain_json() {
        let call = parser()
            .parse(r#"{"name": "get_component", "arguments": {"component": "Button"}}"#)
            .unwrap();
        assert_eq!(call.name, "get_component");
        assert_eq!(call.arguments, json!({"component": "Button"}));
    }

    #[test]
    fn test_json_fence() {
        let raw = "```json\n{\"name\": \"search\", \"arguments\": {\"query\": \"表单\"}}\n```";
        let call = parser().parse(raw).unwrap();
        assert_eq!(call, CapabilityCall::new("search", json!({"query": "表单"})));
    }

    #[test]
    fn test_thinking_prose_and_fence() {
        let raw = "<think>用户问的是 Table，也许应该调用 {\"name\": \"get_stats\"}</think>\n\
好的，我来查询一下。\n```json\n{\"name\": \"get_component\", \"arguments\": {\"component\": \"Table\"}}\n```\n希望有帮助。";
        let call = parser().parse(raw).unwrap();
        assert_eq!(call, CapabilityCall::new("get_component", json!({"component": "Table"})));
    }

    #[test]
    fn test_untagged_fence_and_prose() {
        let raw = "Here you go:\n```\n{\"name\":\"get_stats\",\"arguments\":{}}\n```";
        assert_eq!(parser().parse(raw), Some(CapabilityCall::bare("get_stats")));

        let raw = "I will call {\"name\":\"get_stats\"} now.";
        assert_eq!(parser().parse(raw), Some(CapabilityCall::bare("get_stats")));
    }

    #[test]
    fn test_null_token() {
        assert_eq!(parser().parse("null"), None);
        assert_eq!(parser().parse("  NULL \n"), None);
        assert_eq!(parser().parse("<think>no tool needed</think>null"), None);
        assert_eq!(parser().parse(""), None);
    }

    #[test]
    fn test_unknown_or_invalid() {
        let p = parser();
        assert_eq!(p.parse(r#"{"name": "drop_tables", "arguments": {}}"#), None);
        assert_eq!(p.parse(r#"{"name": "get_component", "arguments": {"component": }"#), None);
        assert_eq!(p.parse(r#"{"arguments": {"component": "Button"}}"#), None);
        assert_eq!(p.parse(r#"["get_component"]"#), None);
        assert_eq!(p.parse(r#"{"name": "get_component", "arguments": {}}"#), None);
    }

    #[test]
    fn test_ambiguous_input_is_no_call() {
        let p = parser();
        // Two brace groups: the greedy slice spans both and is not valid JSON.
        let raw = r#"{"name": "get_stats"} or maybe {"name": "search", "arguments": {"query": "x"}}"#;
        assert_eq!(p.parse(raw), None);
        // Missing closing brace.
        assert_eq!(p.parse(r#"{"name": "get_stats", "arguments": {"#), None);
    }

    #[test]
    fn test_unterminated_thinking_hides_rest() {
        let raw = "<think>maybe {\"name\": \"get_stats\"}";
        assert_eq!(parser().parse(raw), None);
    }

    #[test]
    fn test_string_encoded_arguments() {
        let raw = r#"{"name": "search", "arguments": "{\"query\": \"上传\"}"}"#;
        let call = parser().parse(raw).unwrap();
        assert_eq!(call.arguments, json!({"query": "上传"}));
    }
}
