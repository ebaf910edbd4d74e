// ABOUTME: Model-facing half of Maria: conversation types, model backends and tool dispatch.
// ABOUTME: Provides the tool registry and the concurrent dispatcher the turn loop drives.

pub mod backends;
pub mod dispatcher;
pub mod event;
pub mod registry;
pub mod traits;

pub use dispatcher::{DispatcherConfig, ToolCallSink, ToolDispatcher};
pub use event::{
    AudioReply, ChatTurn, ModelResponse, Role, ToolCallRequest, ToolCallResult, ToolErrorKind,
};
pub use registry::{ToolFuture, ToolHandler, ToolRegistry};
pub use traits::{
    Attachment, AttachmentResolver, ModelBackend, SpeechAudio, SpeechSynthesizer, ToolDefinition,
};
