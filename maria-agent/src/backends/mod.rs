// ABOUTME: Model backend implementations (OpenAI-compatible HTTP, mock).
// ABOUTME: Each backend implements the ModelBackend trait.

pub mod mock;
pub mod openai;
