// ABOUTME: Live Slack Web API transport built on slack-morphism's hyper client.
// ABOUTME: Posts messages with chat.postMessage and uploads files through the external upload flow.

use super::SlackApi;
use anyhow::{Context, Result};
use async_trait::async_trait;
use maria_core::FileUpload;
use serde_json::{json, Value};
use slack_morphism::prelude::*;
use std::sync::Arc;

pub struct SlackWebClient {
    client: Arc<SlackHyperClient>,
    bot_token: SlackApiToken,
}

impl SlackWebClient {
    pub fn new(bot_token: &str) -> Result<Self> {
        let client = Arc::new(SlackClient::new(
            SlackClientHyperConnector::new().context("Failed to create Slack HTTP connector")?,
        ));
        Ok(Self {
            client,
            bot_token: SlackApiToken::new(SlackApiTokenValue(bot_token.to_string())),
        })
    }
}

impl std::fmt::Debug for SlackWebClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackWebClient")
            .field("bot_token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl SlackApi for SlackWebClient {
    async fn post_message(&self, channel: &str, text: &str, thread_ts: Option<&str>) -> Result<Value> {
        let session = self.client.open_session(&self.bot_token);

        let mut req = SlackApiChatPostMessageRequest::new(
            SlackChannelId(channel.to_string()),
            SlackMessageContent::new().with_text(text.to_string()),
        );
        if let Some(ts) = thread_ts {
            req = req.with_thread_ts(SlackTs(ts.to_string()));
        }

        let resp = session
            .chat_post_message(&req)
            .await
            .context("Failed to send Slack message")?;

        Ok(json!({
            "channel": resp.channel.0,
            "ts": resp.ts.0,
        }))
    }

    async fn upload_file(
        &self,
        channel: &str,
        file: &FileUpload,
        thread_ts: Option<&str>,
    ) -> Result<Value> {
        let session = self.client.open_session(&self.bot_token);

        let url_resp = session
            .get_upload_url_external(&SlackApiFilesGetUploadUrlExternalRequest::new(
                file.filename.clone(),
                file.data.len(),
            ))
            .await
            .context("Failed to reserve Slack upload URL")?;

        let content_type = mime_guess::from_path(&file.filename)
            .first_or_octet_stream()
            .to_string();
        session
            .files_upload_via_url(&SlackApiFilesUploadViaUrlRequest::new(
                url_resp.upload_url,
                file.data.clone(),
                content_type,
            ))
            .await
            .context("Failed to upload file bytes to Slack")?;

        let mut complete = SlackApiFilesCompleteUploadExternalRequest::new(vec![
            SlackApiFilesComplete::new(url_resp.file_id.clone()).with_title(file.filename.clone()),
        ])
        .with_channel_id(SlackChannelId(channel.to_string()));
        if let Some(caption) = &file.caption {
            complete = complete.with_initial_comment(caption.clone());
        }
        if let Some(ts) = thread_ts {
            complete = complete.with_thread_ts(SlackTs(ts.to_string()));
        }

        session
            .files_complete_upload_external(&complete)
            .await
            .context("Failed to share uploaded file in Slack channel")?;

        Ok(json!({
            "channel": channel,
            "file_id": url_resp.file_id.0,
            "filename": file.filename,
        }))
    }
}

