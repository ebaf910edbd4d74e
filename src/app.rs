// ABOUTME: Startup wiring: builds backends, router, tool registry, history and the turn loop from config.
// ABOUTME: Configuration problems surface here as errors that abort startup.

use anyhow::{Context, Result};
use maria_agent::backends::openai::{
    HttpAttachmentResolver, OpenAiBackend, OpenAiConfig, OpenAiSpeech,
};
use maria_agent::{DispatcherConfig, ToolDispatcher};
use maria_core::config::Config;
use maria_core::history::SqliteHistoryStore;
use maria_core::{MessageRouter, SpeechSynthesizer, TurnLoop, TurnLoopConfig};
use std::sync::Arc;

use crate::{platform, tools};

/// Everything the binary needs after startup
pub struct App {
    pub router: Arc<MessageRouter>,
    pub turn_loop: Arc<TurnLoop>,
}

fn model_client_config(config: &Config) -> OpenAiConfig {
    OpenAiConfig {
        base_url: config.model.base_url.clone(),
        api_key: config.model.api_key.clone(),
        model: config.model.model.clone(),
        max_tokens: config.model.max_tokens,
        timeout: config.model.timeout(),
    }
}

/// Same endpoint and key as the chat model, with the speech model and timeout
fn speech_client_config(config: &Config, model: &str) -> OpenAiConfig {
    OpenAiConfig {
        model: model.to_string(),
        timeout: config.speech.timeout(),
        ..model_client_config(config)
    }
}

/// Speech synthesis is only available with an API key
pub fn build_speech(config: &Config) -> Result<Option<Arc<dyn SpeechSynthesizer>>> {
    if config.model.api_key.trim().is_empty() {
        tracing::warn!("No model API key configured; audio replies are disabled");
        return Ok(None);
    }
    let speech = OpenAiSpeech::new(
        speech_client_config(config, &config.speech.model),
        config.speech.voice.clone(),
    )?;
    Ok(Some(Arc::new(speech)))
}

/// Register platform adapters into a fresh router
pub fn build_router(config: &Config) -> Result<Arc<MessageRouter>> {
    let router = Arc::new(MessageRouter::new());
    let speech = build_speech(config)?;
    let registered = platform::register_configured(&router, config, speech)
        .context("Failed to set up platform adapters")?;
    tracing::info!(platforms = ?registered, "Message router ready");
    Ok(router)
}

pub fn build(config: &Config) -> Result<App> {
    let router = build_router(config)?;

    let registry = tools::default_registry(Arc::clone(&router), &config.tools)?;
    let dispatcher = ToolDispatcher::new(
        Arc::new(registry),
        DispatcherConfig {
            max_concurrency: config.tools.max_concurrency,
            call_timeout: config.tools.call_timeout(),
        },
    );

    let model = OpenAiBackend::new(model_client_config(config))?;
    let resolver = HttpAttachmentResolver::new(speech_client_config(
        config,
        &config.speech.transcription_model,
    ))?;

    let history = SqliteHistoryStore::open(&config.history.database_path).with_context(|| {
        format!(
            "Failed to open history database at {}",
            config.history.database_path
        )
    })?;
    tracing::info!(path = %config.history.database_path, "History store opened");

    let turn_loop = TurnLoop::new(
        Arc::new(model),
        dispatcher,
        Arc::clone(&router),
        Arc::new(history),
        TurnLoopConfig::from(config),
    )
    .with_resolver(Arc::new(resolver));

    Ok(App {
        router,
        turn_loop: Arc::new(turn_loop),
    })
}
