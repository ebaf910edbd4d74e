// ABOUTME: Built-in functions the model can call, assembled into the startup tool registry.
// ABOUTME: Router-backed messaging tools are always present; weather tools follow config.

pub mod messaging;
pub mod weather;

use anyhow::Result;
use maria_agent::ToolRegistry;
use maria_core::config::ToolsConfig;
use maria_core::MessageRouter;
use std::sync::Arc;

/// Build the registry of every built-in tool
pub fn default_registry(router: Arc<MessageRouter>, config: &ToolsConfig) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    messaging::register(&mut registry, router, config.call_timeout())?;
    if config.weather_enabled {
        weather::register(&mut registry, weather::WeatherClient::new(config.call_timeout())?);
    }
    tracing::debug!(tools = ?registry.names(), "Tool registry built");
    Ok(registry)
}
