// src/lib.rs

// Import the top-level `llmgate` module.
pub mod llmgate;

// Re-exporting key items for easier external access.
pub use llmgate::config::AppConfig;
pub use llmgate::error::GatewayError;
pub use llmgate::model::{Content, ContentBlock, LLMResponse, Message, Role, StreamChunk};
pub use llmgate::registry::ProviderRegistry;
pub use llmgate::store::Store;
