pub mod context;
pub mod generator;
pub mod llm;
pub mod prompt;

pub use generator::{
    AnswerEvent, GenerationRequest, NOT_FOUND_ANSWER, QueryResponse, RagGenerator, SourceInfo,
};
pub use llm::{ChatMessage, ChatModel, ModelConfig, ModelOverride, OllamaChat, OpenAiChat, Role};
pub use prompt::ChatTurn;
