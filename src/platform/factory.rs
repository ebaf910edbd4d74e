// ABOUTME: Adapter factory building platform senders from config and wiring them into the router.
// ABOUTME: Missing credentials or uncompiled platform features abort startup with a configuration error.

use maria_core::config::Config;
use maria_core::{MessageRouter, MessageSender, MessagingError, SpeechSynthesizer};
use std::sync::Arc;

/// Platforms this binary knows how to build
pub const KNOWN_PLATFORMS: &[&str] = &["slack", "telegram"];

/// Resolve a non-empty credential or fail with a configuration error
#[allow(dead_code)]
fn require_token(platform: &str, token: Option<&str>) -> Result<String, MessagingError> {
    match token.map(str::trim) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(MessagingError::configuration(format!(
            "{platform} bot_token is missing. Set it in config.toml or the environment."
        ))),
    }
}

/// Create the live adapter for `platform_id` from the current config.
pub fn create_sender(
    #[allow(unused_variables)] config: &Config,
    platform_id: &str,
    #[allow(unused_variables)] speech: Option<Arc<dyn SpeechSynthesizer>>,
) -> Result<Arc<dyn MessageSender>, MessagingError> {
    match platform_id {
        #[cfg(feature = "slack")]
        "slack" => {
            let section = config.slack.as_ref();
            let token = require_token("slack", section.map(|s| s.bot_token.as_str()))?;
            let timeout = section.map_or(super::slack::DEFAULT_TIMEOUT, |s| s.timeout());
            let client = super::slack::client::SlackWebClient::new(&token)
                .map_err(|e| MessagingError::configuration(format!("{:#}", e)))?;
            let mut sender = super::SlackSender::new(Arc::new(client)).with_timeout(timeout);
            if let Some(speech) = speech {
                sender = sender.with_speech(speech);
            }
            Ok(Arc::new(sender))
        }
        #[cfg(not(feature = "slack"))]
        "slack" => Err(MessagingError::configuration(
            "Slack support not compiled. Build with --features slack",
        )),
        #[cfg(feature = "telegram")]
        "telegram" => {
            let section = config.telegram.as_ref();
            let token = require_token("telegram", section.map(|t| t.bot_token.as_str()))?;
            let timeout = section.map_or(super::telegram::DEFAULT_TIMEOUT, |t| t.timeout());
            let client = super::telegram::client::TelegramBotClient::new(&token);
            let mut sender =
                super::TelegramSender::new(Arc::new(client)).with_timeout(timeout);
            if let Some(speech) = speech {
                sender = sender.with_speech(speech);
            }
            Ok(Arc::new(sender))
        }
        #[cfg(not(feature = "telegram"))]
        "telegram" => Err(MessagingError::configuration(
            "Telegram support not compiled. Build with --features telegram",
        )),
        _ => Err(MessagingError::UnsupportedPlatform {
            platform: platform_id.to_string(),
            supported: KNOWN_PLATFORMS.iter().map(|p| p.to_string()).collect(),
        }),
    }
}

/// Platforms that have a config section
pub fn configured_platforms(config: &Config) -> Vec<&'static str> {
    let mut platforms = Vec::new();
    if config.slack.is_some() {
        platforms.push("slack");
    }
    if config.telegram.is_some() {
        platforms.push("telegram");
    }
    platforms
}

/// Build and register an adapter for every configured platform.
///
/// Returns the registered platform ids. Any failure aborts the whole
/// registration since a configured-but-broken platform is a startup error.
pub fn register_configured(
    router: &MessageRouter,
    config: &Config,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
) -> Result<Vec<String>, MessagingError> {
    let mut registered = Vec::new();
    for platform in configured_platforms(config) {
        let sender = create_sender(config, platform, speech.clone())?;
        router.register(platform, sender)?;
        tracing::info!(platform = %platform, "Platform adapter registered");
        registered.push(platform.to_string());
    }
    if registered.is_empty() {
        tracing::warn!("No platform sections configured; replies cannot be delivered");
    }
    Ok(registered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maria_core::config::{SlackConfig, TelegramConfig};

    #[test]
    fn test_factory_rejects_unknown() {
        let err = create_sender(&Config::default(), "discord", None)
            .err()
            .expect("should error for unknown");
        assert!(err.to_string().contains("not supported"));
        assert!(err.to_string().contains("slack, telegram"));
    }

    #[test]
    fn test_require_token() {
        assert_eq!(require_token("slack", Some(" xoxb-1 ")).unwrap(), "xoxb-1");
        let err = require_token("slack", Some("   ")).unwrap_err();
        assert!(matches!(err, MessagingError::Configuration(_)));
        assert!(require_token("telegram", None).unwrap_err().to_string().contains("telegram"));
    }

    #[test]
    fn test_configured_platforms_follow_sections() {
        let mut config = Config::default();
        assert!(configured_platforms(&config).is_empty());
        config.telegram = Some(TelegramConfig {
            bot_token: "123:abc".into(),
            ..Default::default()
        });
        assert_eq!(configured_platforms(&config), vec!["telegram"]);
        config.slack = Some(SlackConfig {
            bot_token: "xoxb".into(),
            ..Default::default()
        });
        assert_eq!(configured_platforms(&config), vec!["slack", "telegram"]);
    }

    #[test]
    fn test_register_configured_with_nothing_configured() {
        let router = MessageRouter::new();
        let registered = register_configured(&router, &Config::default(), None).unwrap();
        assert!(registered.is_empty());
        assert!(router.list_platforms().is_empty());
    }

    #[cfg(feature = "telegram")]
    #[test]
    fn test_empty_telegram_token_is_configuration_error() {
        let mut config = Config::default();
        config.telegram = Some(TelegramConfig {
            bot_token: String::new(),
            ..Default::default()
        });
        let router = MessageRouter::new();
        let err = register_configured(&router, &config, None).unwrap_err();
        assert!(matches!(err, MessagingError::Configuration(_)));
        assert!(router.list_platforms().is_empty());
    }

    #[cfg(not(feature = "slack"))]
    #[test]
    fn test_slack_without_feature_is_configuration_error() {
        let mut config = Config::default();
        config.slack = Some(SlackConfig {
            bot_token: "xoxb-1".into(),
            ..Default::default()
        });
        let err = create_sender(&config, "slack", None).err().expect("feature off");
        assert!(err.to_string().contains("--features slack"));
    }
}
