// ABOUTME: Platform-agnostic messaging core for Maria
// ABOUTME: Capability contract, message router, history, conversation building and the turn loop

pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod metrics;
pub mod orchestrator;
pub mod paths;
pub mod router;
pub mod traits;

pub use dispatch::{DispatchOutcome, DispatchResult, Operation};
pub use error::{ErrorTag, MessagingError};
pub use orchestrator::{InboundEvent, TurnLoop, TurnLoopConfig, TurnOutcome, TurnStatus};
pub use router::MessageRouter;

// Re-export core traits for convenient access
pub use traits::{
    bounded, check_file, check_text, Capabilities, Capability, FileUpload, MessageSender,
    OutboundPayload,
};

// Re-export maria-agent collaborator traits used by adapters
pub use maria_agent::{Attachment, AttachmentResolver, SpeechAudio, SpeechSynthesizer};
