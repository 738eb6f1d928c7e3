use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use wayfinder_core::{CapabilityCall, CapabilityCatalog, Config, Error, Result};
use wayfinder_providers::{GenerationOptions, GenerativeBackend, OllamaBackend};
use wayfinder_tools::{CapabilityTransport, RemoteCapability};

use crate::intent::IntentClassifier;
use crate::prompts;

/// One item of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Progress notice, e.g. that a capability is being called. Not part of the answer.
    Status(String),
    /// A piece of the answer text.
    Delta(String),
    /// The single user-facing message for a failed turn.
    Error(String),
}

/// Receives streamed events. Returning `false` means the client has gone
/// away and the turn should stop pulling backend output.
pub type EventSink<'a> = dyn FnMut(ChatEvent) -> bool + Send + 'a;

#[derive(Debug, Clone, Serialize)]
pub struct AssistantStatus {
    pub backend_available: bool,
    pub transport_connected: bool,
    pub model: String,
    pub backend_url: String,
    pub capabilities: Vec<String>,
}

/// How a turn is finished once classification and any capability call are done.
enum Reply {
    /// Ask the backend with this prompt.
    Generate(String),
    /// Return this text unchanged.
    Verbatim(String),
}

/// One conversation session: catalog, classifier, transport and backend.
///
/// Nothing is shared through globals; a host that serves several
/// conversations constructs one `Assistant` per conversation.
pub struct Assistant {
    catalog: Arc<CapabilityCatalog>,
    classifier: IntentClassifier,
    transport: CapabilityTransport,
    backend: Arc<dyn GenerativeBackend>,
    answer_options: GenerationOptions,
}

impl Assistant {
    pub fn new(config: &Config) -> Self {
        let backend: Arc<dyn GenerativeBackend> = Arc::new(OllamaBackend::new(&config.backend));
        Self::with_parts(
            CapabilityCatalog::default(),
            backend,
            CapabilityTransport::from_config(&config.transport),
            GenerationOptions::answer(&config.backend),
            GenerationOptions::classification(&config.backend),
        )
    }

    pub fn with_parts(
        catalog: CapabilityCatalog,
        backend: Arc<dyn GenerativeBackend>,
        transport: CapabilityTransport,
        answer_options: GenerationOptions,
        classify_options: GenerationOptions,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let classifier = IntentClassifier::new(catalog.clone(), backend.clone(), classify_options);
        Self {
            catalog,
            classifier,
            transport,
            backend,
            answer_options,
        }
    }

    pub fn catalog(&self) -> &CapabilityCatalog {
        &self.catalog
    }

    /// Connect the capability service up front. Failure here is fatal for
    /// the host; later failures are reported per turn.
    pub async fn initialize(&self) -> Result<()> {
        self.transport.connect().await?;

        let remote = self.transport.list_capabilities().await;
        if remote.is_empty() {
            debug!("Capability service did not list any capabilities");
        } else {
            for name in self.catalog.names() {
                if !remote.iter().any(|r| r.name == name) {
                    warn!(capability = %name, "Catalog entry not offered by capability service");
                }
            }
        }
        info!(remote = remote.len(), "Assistant initialized");
        Ok(())
    }

    /// Tear down the capability service. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.transport.disconnect().await;
    }

    pub async fn is_backend_available(&self) -> bool {
        self.backend.check_available().await
    }

    pub fn is_transport_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub async fn list_capabilities(&self) -> Vec<RemoteCapability> {
        self.transport.list_capabilities().await
    }

    pub async fn status(&self) -> AssistantStatus {
        let backend = self.backend.status().await;
        AssistantStatus {
            backend_available: backend.available,
            transport_connected: self.transport.is_connected(),
            model: backend.model,
            backend_url: backend.url,
            capabilities: self.catalog.names().into_iter().map(str::to_string).collect(),
        }
    }

    /// Buffered protocol: the complete answer, or a user-facing failure message.
    pub async fn chat(&self, utterance: &str) -> String {
        let answer = async {
            match self.prepare(utterance, &mut |_: &CapabilityCall| {}).await? {
                Reply::Generate(prompt) => self.backend.generate(&prompt, &self.answer_options).await,
                Reply::Verbatim(text) => Ok(text),
            }
        }
        .await;

        answer.unwrap_or_else(|e| {
            error!(error = %e, "Chat turn failed");
            prompts::apology(&e)
        })
    }

    /// Streaming protocol: same decisions as [`chat`](Self::chat), with the
    /// answer delivered as `Delta` events. Returns once the stream is exhausted
    /// or the sink reports the client is gone.
    pub async fn chat_stream(&self, utterance: &str, on_event: &mut EventSink<'_>) {
        let mut client_gone = false;
        let prepared = self
            .prepare(utterance, &mut |call: &CapabilityCall| {
                if !client_gone {
                    client_gone = !on_event(ChatEvent::Status(prompts::status_notice(call)));
                }
            })
            .await;
        if client_gone {
            debug!("Client went away before the answer started");
            return;
        }

        let outcome = match prepared {
            Ok(Reply::Generate(prompt)) => {
                let mut forward = |delta: &str| on_event(ChatEvent::Delta(delta.to_string()));
                self.backend
                    .generate_stream(&prompt, &self.answer_options, &mut forward)
                    .await
            }
            Ok(Reply::Verbatim(text)) => {
                on_event(ChatEvent::Delta(text));
                Ok(())
            }
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            error!(error = %e, "Streaming chat turn failed");
            on_event(ChatEvent::Error(prompts::apology(&e)));
        }
    }

    /// Shared skeleton: classify, optionally call a capability, then decide
    /// whether the backend composes the answer.
    async fn prepare(
        &self,
        utterance: &str,
        on_call: &mut (dyn FnMut(&CapabilityCall) + Send),
    ) -> Result<Reply> {
        let Some(call) = self.classifier.classify(utterance).await else {
            return Ok(if self.backend.check_available().await {
                Reply::Generate(prompts::direct_prompt(utterance))
            } else {
                info!("No capability needed and backend unavailable");
                Reply::Verbatim(prompts::BACKEND_UNAVAILABLE_MESSAGE.to_string())
            });
        };

        on_call(&call);
        let result_text = self.invoke(&call).await?;

        Ok(if self.backend.check_available().await {
            Reply::Generate(prompts::synthesis_prompt(utterance, &call, &result_text))
        } else {
            info!(capability = %call.name, "Backend unavailable, returning raw capability output");
            Reply::Verbatim(result_text)
        })
    }

    /// Run the call. Empty or failed capability output becomes a descriptive
    /// string; only transport-level failures end the turn.
    async fn invoke(&self, call: &CapabilityCall) -> Result<String> {
        match self.transport.call(&call.name, call.arguments.clone()).await {
            Ok(result) if result.has_content() => Ok(result.text()),
            Ok(_) => {
                warn!(capability = %call.name, "Capability returned no content");
                Ok(prompts::no_content_message(&call.name))
            }
            Err(Error::CapabilityExecution(msg)) => {
                warn!(capability = %call.name, error = %msg, "Capability execution failed");
                Ok(prompts::capability_failed_message(&call.name, &msg))
            }
            Err(e) => Err(e),
        }
    }
}
