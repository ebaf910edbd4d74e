// ABOUTME: Platform adapter module for maria
// ABOUTME: Re-exports the Slack and Telegram senders and the config-driven factory

pub mod factory;
pub mod slack;
pub mod telegram;

pub use factory::{create_sender, register_configured};
pub use slack::{SlackApi, SlackSender};
pub use telegram::{TelegramApi, TelegramChat, TelegramSender};
