//! One send-message round trip against the Ollama server
//!
//! The exchange runs on its own task and reports progress to the view as
//! [`ReplyEvent`]s. It never touches the conversation directly.

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{Config, ResponseMode};
use crate::message::ChatTurn;
use crate::ollama::{ChatError, ChatResult, OllamaClient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyEvent {
    /// Running text after the latest fragment
    Fragment(String),
    /// The notice delay elapsed for the numbered exchange
    StillWorking(u64),
    Done(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    pub model: String,
    pub mode: ResponseMode,
    pub probe_models: bool,
    pub fallback_generate: bool,
}

impl ExchangeSettings {
    pub fn from_config(config: &Config, model: &str) -> Self {
        Self {
            model: model.to_string(),
            mode: config.response_mode,
            probe_models: config.probe_models,
            fallback_generate: config.fallback_generate,
        }
    }
}

/// Probe, send and (if allowed) fall back to `/api/generate`.
///
/// `turns` must end with the user message being sent.
pub async fn exchange<F>(
    client: &OllamaClient,
    settings: &ExchangeSettings,
    turns: &[ChatTurn],
    mut on_fragment: F,
) -> ChatResult<String>
where
    F: FnMut(&str),
{
    let model = settings.model.as_str();
    let stream = settings.mode.is_stream();

    if settings.probe_models && !client.has_model(model).await? {
        return Err(ChatError::ModelUnavailable(model.to_string()));
    }

    match client.chat(model, turns, stream, &mut on_fragment).await {
        Err(e) if settings.fallback_generate && e.is_not_found() => {
            info!(model, error = %e, "/api/chat unavailable, falling back to /api/generate");
            let prompt = turns.last().map(|t| t.content.as_str()).unwrap_or_default();
            client.generate(model, prompt, stream, &mut on_fragment).await
        }
        other => other,
    }
}

/// Run [`exchange`] on a task, finishing with exactly one `Done` or `Failed`
pub fn spawn(
    client: OllamaClient,
    settings: ExchangeSettings,
    turns: Vec<ChatTurn>,
    tx: UnboundedSender<ReplyEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let fragments = tx.clone();
        let result = exchange(&client, &settings, &turns, |text| {
            let _ = fragments.send(ReplyEvent::Fragment(text.to_string()));
        })
        .await;

        let event = match result {
            Ok(text) => {
                info!(model = %settings.model, chars = text.chars().count(), "reply complete");
                ReplyEvent::Done(text)
            }
            Err(e) => {
                warn!(model = %settings.model, error = %e, "exchange failed");
                ReplyEvent::Failed(e.to_string())
            }
        };
        let _ = tx.send(event);
    })
}
