use std::env;

use search::hybrid::{DEFAULT_LEXICAL_WEIGHT, DEFAULT_TOP_K, DEFAULT_VECTOR_WEIGHT};

/// Server configuration from environment variables, with defaults that
/// work against a local Ollama out of the box.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub data_dir: String,
    pub store_dir: String,
    pub model_type: String,
    pub model_name: String,
    pub embedding_model: String,
    pub ollama_base_url: String,
    pub openai_api_key: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub vector_weight: f32,
    pub lexical_weight: f32,
    pub context_budget: usize,
    pub force_reingest: bool,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_or("RAG_BIND_ADDR", "0.0.0.0:8000"),
            data_dir: env_or("DATA_RAW_DIR", "data/raw"),
            store_dir: env_or("VECTOR_STORE_DIR", "data/vector_store"),
            model_type: env_or("LLM_MODEL_TYPE", "ollama"),
            model_name: env_or("LLM_MODEL_NAME", "llama3"),
            embedding_model: env_or("EMBEDDING_MODEL_NAME", "nomic-embed-text"),
            ollama_base_url: env_or("OLLAMA_BASE_URL", "http://localhost:11434"),
            openai_api_key: env_or("OPENAI_API_KEY", ""),
            chunk_size: env_parse("CHUNK_SIZE", 1500),
            chunk_overlap: env_parse("CHUNK_OVERLAP", 300),
            top_k: env_parse("RAG_TOP_K", DEFAULT_TOP_K),
            vector_weight: env_parse("RAG_VECTOR_WEIGHT", DEFAULT_VECTOR_WEIGHT),
            lexical_weight: env_parse("RAG_LEXICAL_WEIGHT", DEFAULT_LEXICAL_WEIGHT),
            context_budget: env_parse("RAG_CONTEXT_BUDGET", answer::context::DEFAULT_CONTEXT_BUDGET),
            force_reingest: env_parse("RAG_FORCE_REINGEST", false),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::from_env();
        assert_eq!(config.chunk_size, 1500);
        assert_eq!(config.chunk_overlap, 300);
        assert!((config.vector_weight - 0.6).abs() < f32::EPSILON);
        assert!((config.lexical_weight - 0.4).abs() < f32::EPSILON);
    }
}
