// ABOUTME: Router-backed tools letting the model send messages to any registered platform.
// ABOUTME: Each tool returns the serialized DispatchResult; router gating errors surface as tool errors.

use anyhow::{Context, Result};
use maria_agent::{ToolDefinition, ToolRegistry};
use maria_core::{FileUpload, MessageRouter};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on a file fetched for send_file_message / send_image_message
const MAX_FETCH_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct SendTextArgs {
    platform: String,
    chat_id: String,
    text: String,
    #[serde(default)]
    thread: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendFileArgs {
    platform: String,
    chat_id: String,
    filename: String,
    /// Inline text body
    #[serde(default)]
    content: Option<String>,
    /// Remote body, fetched before sending
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    thread: Option<String>,
}

fn parse<T: DeserializeOwned>(function: &str, args: Value) -> Result<T> {
    serde_json::from_value(args).with_context(|| format!("Invalid arguments for {}", function))
}

/// Resolve the body of a file send from inline content or a URL
async fn file_body(http: &reqwest::Client, args: &SendFileArgs) -> Result<Vec<u8>> {
    match (&args.content, &args.url) {
        (Some(content), _) => Ok(content.clone().into_bytes()),
        (None, Some(url)) => fetch_capped(http, url, MAX_FETCH_BYTES).await,
        (None, None) => anyhow::bail!("Either content or url is required"),
    }
}

/// Download `url`, giving up as soon as the body is known to exceed `max_bytes`
async fn fetch_capped(http: &reqwest::Client, url: &str, max_bytes: usize) -> Result<Vec<u8>> {
    let mut response = http
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch {}", url))?
        .error_for_status()
        .with_context(|| format!("Fetching {} returned an error status", url))?;

    if let Some(length) = response.content_length() {
        if length > max_bytes as u64 {
            anyhow::bail!(
                "Fetched file is too large ({} bytes, max {})",
                length,
                max_bytes
            );
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .context("Failed to read fetched file body")?
    {
        if body.len() + chunk.len() > max_bytes {
            anyhow::bail!("Fetched file is too large (over {} bytes)", max_bytes);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn upload(args: &SendFileArgs, data: Vec<u8>) -> FileUpload {
    let upload = FileUpload::new(data, args.filename.clone());
    match &args.caption {
        Some(caption) => upload.with_caption(caption.clone()),
        None => upload,
    }
}

fn text_schema(text_description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "platform": {"type": "string", "description": "Platform id, e.g. slack or telegram"},
            "chat_id": {"type": "string", "description": "Chat, channel or user id on that platform"},
            "text": {"type": "string", "description": text_description},
            "thread": {"type": "string", "description": "Optional thread reference"}
        },
        "required": ["platform", "chat_id", "text"]
    })
}

fn file_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "platform": {"type": "string"},
            "chat_id": {"type": "string"},
            "filename": {"type": "string"},
            "content": {"type": "string", "description": "Inline text content of the file"},
            "url": {"type": "string", "description": "URL to fetch the file from"},
            "caption": {"type": "string"},
            "thread": {"type": "string"}
        },
        "required": ["platform", "chat_id", "filename"]
    })
}

/// Register the router-backed send tools and `list_platforms`
pub fn register(registry: &mut ToolRegistry, router: Arc<MessageRouter>, fetch_timeout: Duration) -> Result<()> {
    let http = reqwest::Client::builder()
        .timeout(fetch_timeout)
        .build()
        .context("Failed to build HTTP client for file fetches")?;

    let r = Arc::clone(&router);
    registry.insert(
        ToolDefinition::new(
            "send_text_message",
            "Send a text message to a chat on a messaging platform.",
            text_schema("Message text"),
        ),
        move |args| {
            let router = Arc::clone(&r);
            async move {
                let args: SendTextArgs = parse("send_text_message", args)?;
                let result = router
                    .send_text(&args.platform, &args.chat_id, &args.text, args.thread.as_deref())
                    .await?;
                Ok(serde_json::to_value(result)?)
            }
        },
    );

    let r = Arc::clone(&router);
    registry.insert(
        ToolDefinition::new(
            "send_audio_message",
            "Speak text aloud and send it as an audio message. Only works on platforms with audio support.",
            text_schema("Text to speak"),
        ),
        move |args| {
            let router = Arc::clone(&r);
            async move {
                let args: SendTextArgs = parse("send_audio_message", args)?;
                let result = router
                    .send_audio(&args.platform, &args.chat_id, &args.text, args.thread.as_deref())
                    .await?;
                Ok(serde_json::to_value(result)?)
            }
        },
    );

    let r = Arc::clone(&router);
    let client = http.clone();
    registry.insert(
        ToolDefinition::new(
            "send_file_message",
            "Send a file to a chat. Provide either inline text content or a URL to fetch.",
            file_schema(),
        ),
        move |args| {
            let router = Arc::clone(&r);
            let http = client.clone();
            async move {
                let args: SendFileArgs = parse("send_file_message", args)?;
                let data = file_body(&http, &args).await?;
                let result = router
                    .send_file(&args.platform, &args.chat_id, upload(&args, data), args.thread.as_deref())
                    .await?;
                Ok(serde_json::to_value(result)?)
            }
        },
    );

    let r = Arc::clone(&router);
    registry.insert(
        ToolDefinition::new(
            "send_image_message",
            "Send an image to a chat, fetched from a URL.",
            file_schema(),
        ),
        move |args| {
            let router = Arc::clone(&r);
            let http = http.clone();
            async move {
                let args: SendFileArgs = parse("send_image_message", args)?;
                let data = file_body(&http, &args).await?;
                let result = router
                    .send_image(&args.platform, &args.chat_id, upload(&args, data), args.thread.as_deref())
                    .await?;
                Ok(serde_json::to_value(result)?)
            }
        },
    );

    registry.insert(
        ToolDefinition::new(
            "list_platforms",
            "List the messaging platforms replies can be sent to, with their capabilities.",
            json!({"type": "object", "properties": {}}),
        ),
        move |_args| {
            let router = Arc::clone(&router);
            async move { Ok(platform_listing(&router)) }
        },
    );

    Ok(())
}

fn platform_listing(router: &MessageRouter) -> Value {
    let platforms: Vec<Value> = router
        .list_platforms()
        .into_iter()
        .filter_map(|platform| {
            let capabilities = router.capabilities(&platform).ok()?;
            Some(json!({"platform": platform, "capabilities": capabilities}))
        })
        .collect();
    json!({ "platforms": platforms })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer one request on a loopback port with `head` followed by `body`
    async fn serve_once(head: String, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(&body).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{}/file", addr)
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_declared_length_over_limit_is_rejected_before_reading() {
        // Announces a large body but never sends it
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 5000\r\n\r\n".to_string(),
            Vec::new(),
        )
        .await;
        let err = fetch_capped(&client(), &url, 1000).await.unwrap_err();
        assert!(err.to_string().contains("5000 bytes, max 1000"), "{err:#}");
    }

    #[tokio::test]
    async fn test_undeclared_body_stops_at_limit() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n".to_string(),
            vec![b'x'; 4096],
        )
        .await;
        let err = fetch_capped(&client(), &url, 1000).await.unwrap_err();
        assert!(err.to_string().contains("over 1000 bytes"), "{err:#}");
    }

    #[tokio::test]
    async fn test_small_body_is_returned() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n".to_string(),
            b"hello".to_vec(),
        )
        .await;
        assert_eq!(fetch_capped(&client(), &url, 1000).await.unwrap(), b"hello");
    }
}
