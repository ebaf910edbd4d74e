// ABOUTME: Live Telegram Bot API transport built on teloxide.
// ABOUTME: Maps parsed chat targets to recipients and uploads attachments from memory.

use super::{TelegramApi, TelegramChat};
use anyhow::{Context, Result};
use async_trait::async_trait;
use maria_core::FileUpload;
use serde_json::{json, Value};
use teloxide::prelude::*;
use teloxide::types::{InputFile, Recipient};

pub struct TelegramBotClient {
    bot: Bot,
}

impl TelegramBotClient {
    pub fn new(bot_token: &str) -> Self {
        Self {
            bot: Bot::new(bot_token),
        }
    }
}

impl std::fmt::Debug for TelegramBotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBotClient")
            .field("bot_token", &"[REDACTED]")
            .finish()
    }
}

fn recipient(chat: &TelegramChat) -> Recipient {
    match chat {
        TelegramChat::Id(id) => Recipient::Id(ChatId(*id)),
        TelegramChat::Username(name) => Recipient::ChannelUsername(name.clone()),
    }
}

fn input_file(file: &FileUpload) -> InputFile {
    InputFile::memory(file.data.clone()).file_name(file.filename.clone())
}

fn summarize(message: &Message) -> Value {
    json!({
        "chat_id": message.chat.id.0,
        "message_id": message.id.0,
    })
}

#[async_trait]
impl TelegramApi for TelegramBotClient {
    async fn send_message(&self, chat: &TelegramChat, text: &str) -> Result<Value> {
        let message = self
            .bot
            .send_message(recipient(chat), text)
            .await
            .context("Failed to send Telegram message")?;
        Ok(summarize(&message))
    }

    async fn send_audio(&self, chat: &TelegramChat, audio: &FileUpload) -> Result<Value> {
        let message = self
            .bot
            .send_audio(recipient(chat), input_file(audio))
            .await
            .context("Failed to send Telegram audio")?;
        Ok(summarize(&message))
    }

    async fn send_document(&self, chat: &TelegramChat, file: &FileUpload) -> Result<Value> {
        let mut req = self.bot.send_document(recipient(chat), input_file(file));
        if let Some(caption) = &file.caption {
            req = req.caption(caption.clone());
        }
        let message = req.await.context("Failed to send Telegram document")?;
        Ok(summarize(&message))
    }

    async fn send_photo(&self, chat: &TelegramChat, image: &FileUpload) -> Result<Value> {
        let mut req = self.bot.send_photo(recipient(chat), input_file(image));
        if let Some(caption) = &image.caption {
            req = req.caption(caption.clone());
        }
        let message = req.await.context("Failed to send Telegram photo")?;
        Ok(summarize(&message))
    }
}
