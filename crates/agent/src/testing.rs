//! In-memory backend and capability service for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use wayfinder_core::{CapabilityResult, Error, ResultSegment, Result};
use wayfinder_providers::{GenerationOptions, GenerativeBackend, TextSink};
use wayfinder_tools::{CapabilityChannel, Connector, RemoteCapability};

pub struct ScriptedBackend {
    available: AtomicBool,
    replies: Mutex<VecDeque<String>>,
    /// Used once `replies` runs dry; `None` makes generation fail.
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn unavailable() -> Self {
        Self {
            available: AtomicBool::new(false),
            replies: Mutex::new(VecDeque::new()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn available(reply: &str) -> Self {
        Self {
            available: AtomicBool::new(true),
            fallback: Some(reply.to_string()),
            ..Self::unavailable()
        }
    }

    /// Reachable, but every generation request errors.
    pub fn failing() -> Self {
        Self {
            available: AtomicBool::new(true),
            ..Self::unavailable()
        }
    }

    pub fn replies(replies: &[&str]) -> Self {
        Self {
            available: AtomicBool::new(true),
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            ..Self::unavailable()
        }
    }

    pub fn generate_calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }

    fn next_reply(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            return Ok(reply);
        }
        self.fallback
            .clone()
            .ok_or_else(|| Error::Backend("scripted failure".to_string()))
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> Result<String> {
        self.next_reply(prompt)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
        sink: &mut TextSink<'_>,
    ) -> Result<()> {
        let reply = self.next_reply(prompt)?;
        let chars: Vec<char> = reply.chars().collect();
        for piece in chars.chunks(3) {
            let piece: String = piece.iter().collect();
            if !sink(&piece) {
                break;
            }
        }
        Ok(())
    }

    async fn check_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn model(&self) -> &str {
        "scripted"
    }

    fn endpoint(&self) -> &str {
        "memory://scripted"
    }
}

/// What every call on a [`ScriptedService`] channel returns.
#[derive(Clone)]
pub enum ServiceReply {
    Text(String),
    Empty,
    Fails(String),
    Broken,
}

/// Connector whose channels answer every call with the same reply.
pub struct ScriptedService {
    reply: ServiceReply,
    pub connects: Arc<AtomicUsize>,
    pub calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl ScriptedService {
    pub fn new(reply: ServiceReply) -> Self {
        Self {
            reply,
            connects: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

struct ScriptedChannel {
    reply: ServiceReply,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

#[async_trait]
impl CapabilityChannel for ScriptedChannel {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CapabilityResult> {
        self.calls.lock().unwrap().push((name.to_string(), arguments));
        match &self.reply {
            ServiceReply::Text(text) => Ok(CapabilityResult::new(vec![ResultSegment::text(text.clone())])),
            ServiceReply::Empty => Ok(CapabilityResult::empty()),
            ServiceReply::Fails(msg) => Err(Error::CapabilityExecution(msg.clone())),
            ServiceReply::Broken => Err(Error::Transport("server stdout closed".to_string())),
        }
    }

    async fn list_tools(&self) -> Result<Vec<RemoteCapability>> {
        Ok(vec![RemoteCapability {
            name: "get_component".to_string(),
            description: Some("component details".to_string()),
            input_schema: Value::Null,
        }])
    }

    async fn close(&self) {}
}

#[async_trait]
impl Connector for ScriptedService {
    async fn connect(&self) -> Result<Arc<dyn CapabilityChannel>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedChannel {
            reply: self.reply.clone(),
            calls: self.calls.clone(),
        }))
    }
}
