use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::types::CapabilityCall;

/// One named argument of a capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityParameter {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// 能力描述符：名称、说明、参数与示例问句
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<CapabilityParameter>,
    #[serde(default)]
    pub examples: Vec<String>,
}

impl CapabilityDescriptor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: Vec::new(),
            examples: Vec::new(),
        }
    }

    pub fn param(mut self, name: &str, description: &str) -> Self {
        self.parameters.push(CapabilityParameter {
            name: name.to_string(),
            description: description.to_string(),
            required: false,
        });
        self
    }

    pub fn required_param(mut self, name: &str, description: &str) -> Self {
        self.parameters.push(CapabilityParameter {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
        });
        self
    }

    pub fn example(mut self, utterance: &str) -> Self {
        self.examples.push(utterance.to_string());
        self
    }

    pub fn required(&self) -> impl Iterator<Item = &CapabilityParameter> {
        self.parameters.iter().filter(|p| p.required)
    }
}

pub const GET_COMPONENT: &str = "get_component";
pub const SEARCH: &str = "search";
pub const GET_EXAMPLES: &str = "get_examples";
pub const VALIDATE_CONFIG: &str = "validate_config";
pub const GET_STATS: &str = "get_stats";

/// Canonical component names with the aliases users type for them.
const COMPONENTS: &[(&str, &[&str])] = &[
    ("Button", &["按钮"]),
    ("Input", &["输入框"]),
    ("Select", &["选择器", "下拉框"]),
    ("Table", &["表格"]),
    ("Form", &["表单"]),
    ("Modal", &["弹窗", "对话框"]),
    ("DatePicker", &["日期选择器"]),
    ("Tabs", &["标签页"]),
    ("Card", &["卡片"]),
    ("Menu", &["菜单"]),
    ("Upload", &["上传"]),
    ("Checkbox", &["复选框", "多选框"]),
    ("Radio", &["单选框"]),
    ("Switch", &["开关"]),
    ("Pagination", &["分页"]),
    ("Tooltip", &["文字提示"]),
];

/// Fixed registry of the capabilities the dispatcher may call.
#[derive(Debug, Clone)]
pub struct CapabilityCatalog {
    entries: Vec<CapabilityDescriptor>,
}

impl Default for CapabilityCatalog {
    fn default() -> Self {
        Self::new(vec![
            CapabilityDescriptor::new(
                GET_COMPONENT,
                "获取指定组件的详细信息：属性(props)、事件、插槽与默认值",
            )
            .required_param("component", "组件名称，如 Button、Table")
            .example("Button组件有哪些属性？")
            .example("Table 支持哪些事件"),
            CapabilityDescriptor::new(SEARCH, "按关键词或分类模糊搜索组件")
                .required_param("query", "搜索关键词")
                .param("category", "组件分类，如 表单、数据展示、反馈")
                .example("搜索和表单相关的组件")
                .example("find components for file upload"),
            CapabilityDescriptor::new(GET_EXAMPLES, "获取组件在特定场景下的使用示例代码")
                .required_param("component", "组件名称")
                .param("scenario", "使用场景，如 登录表单、分页表格")
                .param("framework", "目标框架，如 vue3、react")
                .example("给我一个 Form 登录表单的 vue3 示例"),
            CapabilityDescriptor::new(VALIDATE_CONFIG, "校验一段组件配置是否合法并给出修正建议")
                .required_param("component", "组件名称")
                .required_param("config", "待校验的配置对象")
                .example("帮我检查这个 Select 配置对不对：{\"mode\": \"multi\"}"),
            CapabilityDescriptor::new(GET_STATS, "获取组件库整体统计信息：组件总数、分类数量等")
                .example("组件库一共有多少个组件？")
                .example("show library statistics"),
        ])
    }
}

impl CapabilityCatalog {
    pub fn new(entries: Vec<CapabilityDescriptor>) -> Self {
        Self { entries }
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.entries.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn entries(&self) -> &[CapabilityDescriptor] {
        &self.entries
    }

    /// Prompt-ready listing of every capability.
    pub fn describe_all(&self) -> String {
        let mut s = String::new();
        for (i, desc) in self.entries.iter().enumerate() {
            let _ = writeln!(s, "{}. {}: {}", i + 1, desc.name, desc.description);
            if desc.parameters.is_empty() {
                s.push_str("   参数: 无\n");
            } else {
                s.push_str("   参数:\n");
                for p in &desc.parameters {
                    let marker = if p.required { " (必填)" } else { "" };
                    let _ = writeln!(s, "   - {}{}: {}", p.name, marker, p.description);
                }
            }
            if !desc.examples.is_empty() {
                let _ = writeln!(s, "   示例: {}", desc.examples.join(" / "));
            }
        }
        s
    }

    /// A call is accepted only when its name is registered, its arguments
    /// are an object, and every required argument is present and non-empty.
    pub fn validate(&self, call: &CapabilityCall) -> bool {
        let Some(desc) = self.get(&call.name) else {
            return false;
        };
        let Some(args) = call.arguments.as_object() else {
            return false;
        };
        desc.required().all(|p| match args.get(&p.name) {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        })
    }

    /// Find the first known component mentioned in `text`, matched
    /// case-insensitively against names and aliases. Returns the canonical name.
    pub fn find_component(&self, text: &str) -> Option<&'static str> {
        let lower = text.to_lowercase();
        let mut best: Option<(usize, &'static str)> = None;
        for (canonical, aliases) in COMPONENTS {
            let name_lower = canonical.to_lowercase();
            let hit = find_word(&lower, &name_lower)
                .into_iter()
                .chain(aliases.iter().filter_map(|a| lower.find(a)))
                .min();
            if let Some(pos) = hit {
                if best.map_or(true, |(p, _)| pos < p) {
                    best = Some((pos, canonical));
                }
            }
        }
        best.map(|(_, name)| name)
    }
}

/// Position of `needle` in `haystack` where it is not glued to other ASCII
/// letters or digits, so "select" does not match inside "selection".
fn find_word(haystack: &str, needle: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = haystack[from..].find(needle) {
        let start = from + rel;
        let end = start + needle.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        let glued = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
        if !glued(before) && !glued(after) {
            return Some(start);
        }
        from = end;
    }
    None
}
