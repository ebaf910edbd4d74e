// ABOUTME: Root library module exposing platform adapters, tools, webhook and startup wiring
// ABOUTME: Re-exports the core and agent crates so the binary and tests share one import path

pub mod app;
pub mod platform;
pub mod tools;
pub mod utils;
pub mod webhook;

// Re-export platform-agnostic modules from maria-core
pub use maria_core::config;
pub use maria_core::history;
pub use maria_core::metrics;
pub use maria_core::paths;
pub use maria_core::router;

pub use maria_core::{
    Capabilities, DispatchResult, ErrorTag, FileUpload, InboundEvent, MessageRouter,
    MessageSender, MessagingError, Operation, TurnLoop,
};

// Re-export maria-agent types for convenience
pub use maria_agent::{ToolDispatcher, ToolRegistry};
