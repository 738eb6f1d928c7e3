use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};
use wayfinder_core::capability::{GET_COMPONENT, GET_STATS, SEARCH};
use wayfinder_core::{CapabilityCall, CapabilityCatalog};
use wayfinder_providers::{GenerationOptions, GenerativeBackend};

use crate::call_parser::CallParser;
use crate::prompts;

/// Keyword rule outcome, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    /// 组件库统计: get_stats
    Statistics,
    /// 模糊搜索: search
    Search,
}

struct KeywordRule {
    kind: RuleKind,
    keywords: Vec<&'static str>,
}

/// Characters trimmed from the ends of an extracted search query.
const QUERY_TRIM: &[char] = &[
    ' ', '\t', '\n', '，', ',', '。', '.', '？', '?', '！', '!', '：', ':', '“', '”', '"', '、',
];

/// Decides whether an utterance needs a capability call, and which one.
///
/// The backend is asked first when it is reachable; its answer only counts
/// when the parser accepts it. Otherwise the keyword rules decide.
pub struct IntentClassifier {
    catalog: Arc<CapabilityCatalog>,
    parser: CallParser,
    backend: Arc<dyn GenerativeBackend>,
    options: GenerationOptions,
    rules: Vec<KeywordRule>,
}

impl IntentClassifier {
    pub fn new(
        catalog: Arc<CapabilityCatalog>,
        backend: Arc<dyn GenerativeBackend>,
        options: GenerationOptions,
    ) -> Self {
        // Statistics and search are lexically distinctive and must win over
        // an incidental component mention in the same sentence.
        let rules = vec![
            KeywordRule {
                kind: RuleKind::Statistics,
                keywords: vec![
                    "统计", "总数", "一共有多少", "多少个组件", "有多少组件", "组件数量",
                    "stats", "statistics", "how many components",
                ],
            },
            KeywordRule {
                kind: RuleKind::Search,
                keywords: vec![
                    "搜索", "搜一下", "查找", "找一下", "search", "look for", "find",
                ],
            },
        ];
        Self {
            parser: CallParser::new(catalog.clone()),
            catalog,
            backend,
            options,
            rules,
        }
    }

    pub async fn classify(&self, utterance: &str) -> Option<CapabilityCall> {
        if self.backend.check_available().await {
            if let Some(call) = self.classify_with_backend(utterance).await {
                info!(capability = %call.name, "Backend selected capability");
                return Some(call);
            }
        } else {
            debug!("Backend unavailable, using keyword rules");
        }

        let call = self.classify_by_rules(utterance);
        match &call {
            Some(call) => info!(capability = %call.name, "Keyword rule selected capability"),
            None => debug!("No capability needed"),
        }
        call
    }

    async fn classify_with_backend(&self, utterance: &str) -> Option<CapabilityCall> {
        let prompt = prompts::classification_prompt(&self.catalog, utterance);
        match self.backend.generate(&prompt, &self.options).await {
            Ok(raw) => {
                let preview: String = raw.chars().take(200).collect();
                debug!(raw = %preview, "Classification output");
                self.parser.parse(&raw)
            }
            Err(e) => {
                warn!(error = %e, "Classification request failed, falling back to rules");
                None
            }
        }
    }

    /// Deterministic fallback used when the backend is absent or undecided.
    pub fn classify_by_rules(&self, utterance: &str) -> Option<CapabilityCall> {
        let lower = utterance.to_lowercase();

        for rule in &self.rules {
            let Some(keyword) = rule.keywords.iter().find(|k| lower.contains(*k)) else {
                continue;
            };
            let call = match rule.kind {
                RuleKind::Statistics => CapabilityCall::bare(GET_STATS),
                RuleKind::Search => {
                    CapabilityCall::new(SEARCH, json!({ "query": search_query(utterance, keyword) }))
                }
            };
            if self.catalog.is_known(&call.name) {
                return Some(call);
            }
        }

        let component = self.catalog.find_component(utterance)?;
        let call = CapabilityCall::new(GET_COMPONENT, json!({ "component": component }));
        self.catalog.is_known(&call.name).then_some(call)
    }
}

/// The utterance minus the trigger keyword, or the whole utterance when
/// nothing meaningful is left.
fn search_query(original: &str, keyword: &str) -> String {
    let query = match find_ignore_case(original, keyword) {
        Some((start, end)) => format!("{}{}", &original[..start], &original[end..]),
        None => original.to_string(),
    };
    let query = query.trim_matches(QUERY_TRIM);
    if query.is_empty() {
        original.trim().to_string()
    } else {
        query.to_string()
    }
}

/// Byte span in `text` of the first window that lowercases to `keyword`.
/// Offsets always come from `text` itself, since lowercasing can change
/// byte lengths outside ASCII.
fn find_ignore_case(text: &str, keyword: &str) -> Option<(usize, usize)> {
    let width = keyword.chars().count();
    text.char_indices().find_map(|(start, _)| {
        let end = text[start..]
            .char_indices()
            .nth(width)
            .map_or(text.len(), |(i, _)| start + i);
        (text[start..end].to_lowercase() == keyword).then_some((start, end))
    })
}
