//! Prompt templates and the fixed user-facing messages.

use wayfinder_core::{CapabilityCall, CapabilityCatalog, Error};

/// What the backend answers when no capability is needed.
pub const NO_CALL_TOKEN: &str = "null";

pub const BACKEND_UNAVAILABLE_MESSAGE: &str = "抱歉，语言模型服务当前不可用，暂时无法直接回答这个问题。\n\
你可以询问具体组件（例如「Button组件有哪些属性？」）、搜索组件，或查看组件库统计信息，这些问题可以直接通过组件知识服务回答。";

pub fn classification_prompt(catalog: &CapabilityCatalog, utterance: &str) -> String {
    format!(
        "你是一个组件库助手的工具路由器。根据用户问题判断是否需要调用下列工具之一。\n\n\
## 可用工具\n{tools}\n\
## 输出要求\n\
- 需要调用工具时，只输出一个 JSON 对象：{{\"name\": \"工具名\", \"arguments\": {{参数}}}}\n\
- 不需要调用工具时，只输出 {null}\n\
- 不要输出任何解释、注释或其他文字\n\n\
用户问题：{utterance}\n",
        tools = catalog.describe_all(),
        null = NO_CALL_TOKEN,
        utterance = utterance,
    )
}

pub fn synthesis_prompt(utterance: &str, call: &CapabilityCall, result_text: &str) -> String {
    format!(
        "你是一个组件库助手。请根据工具返回的资料，用简洁准确的中文回答用户问题。\n\
资料中没有的信息不要编造。\n\n\
用户问题：{utterance}\n\n\
调用的工具：{name}\n\
工具参数：{args}\n\n\
工具返回：\n{result}\n\n\
回答：",
        utterance = utterance,
        name = call.name,
        args = call.arguments,
        result = result_text,
    )
}

pub fn direct_prompt(utterance: &str) -> String {
    format!(
        "你是一个友好的组件库助手，熟悉前端 UI 组件的用法。请直接回答用户的问题。\n\n\
用户问题：{}\n\n\
回答：",
        utterance
    )
}

pub fn status_notice(call: &CapabilityCall) -> String {
    format!("🔧 正在调用 {} 查询组件知识…", call.name)
}

pub fn no_content_message(capability: &str) -> String {
    format!("工具 {} 没有返回任何内容。", capability)
}

pub fn capability_failed_message(capability: &str, reason: &str) -> String {
    format!("工具 {} 执行失败：{}", capability, reason)
}

/// The single message shown when a turn fails.
pub fn apology(err: &Error) -> String {
    match err {
        Error::Transport(_) | Error::Io(_) => {
            format!("抱歉，组件知识服务暂时无法连接，请稍后再试。（{}）", err)
        }
        Error::Timeout(_) => "抱歉，请求超时了，请稍后再试。".to_string(),
        Error::Backend(_) => format!("抱歉，生成回答时出错：{}", err),
        Error::Config(_) => format!("服务配置有误：{}", err),
        _ => format!("抱歉，处理请求时出错：{}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classification_prompt_embeds_catalog_and_utterance() {
        let catalog = CapabilityCatalog::default();
        let prompt = classification_prompt(&catalog, "Table 支持哪些事件");
        for name in catalog.names() {
            assert!(prompt.contains(name));
        }
        assert!(prompt.contains("用户问题：Table 支持哪些事件"));
        assert!(prompt.contains("只输出 null"));
    }

    #[test]
    fn test_synthesis_prompt() {
        let call = CapabilityCall::new("get_component", json!({"component": "Button"}));
        let prompt = synthesis_prompt("Button组件有哪些属性？", &call, "type, size, disabled");
        assert!(prompt.contains("Button组件有哪些属性？"));
        assert!(prompt.contains("get_component"));
        assert!(prompt.contains(r#"{"component":"Button"}"#));
        assert!(prompt.contains("type, size, disabled"));
    }

    #[test]
    fn test_apology_variants() {
        assert!(apology(&Error::Transport("pipe".into())).contains("无法连接"));
        assert_eq!(
            apology(&Error::Timeout("x".into())),
            "抱歉，请求超时了，请稍后再试。"
        );
        assert!(apology(&Error::Backend("500".into())).contains("500"));
    }
}
