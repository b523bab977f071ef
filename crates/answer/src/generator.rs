use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, warn};

use corpus::text::char_len;
use search::HybridRetriever;
use store::ScoredChunk;

use crate::context::build_context;
use crate::llm::{ChatModel, ModelConfig, ModelOverride, build_model};
use crate::prompt::{ChatTurn, build_messages};

/// Fixed answer when retrieval finds nothing relevant.
pub const NOT_FOUND_ANSWER: &str =
    "申し訳ありませんが、提供された資料の中に、その質問に関連する情報は見つかりませんでした。";

const SNIPPET_CHARS: usize = 200;
const STREAM_BUFFER: usize = 32;

/// One fully-owned generation request. The prompt already carries any
/// location preface the caller resolved.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub config_override: Option<ModelOverride>,
    pub image: Option<String>,
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceInfo {
    pub filename: String,
    pub snippet: String,
    pub page: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceInfo>,
}

/// Typed streaming protocol: `Sources` once, `Token`s, then exactly one
/// of `Done`/`Error`; `Complete` alone when retrieval found nothing.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnswerEvent {
    Sources { sources: Vec<SourceInfo> },
    Token { token: String },
    Done { answer: String },
    Error { message: String },
    Complete { answer: String, sources: Vec<SourceInfo> },
}

pub struct RagGenerator {
    retriever: HybridRetriever,
    config: ModelConfig,
    model: Arc<dyn ChatModel>,
    context_budget: usize,
}

impl RagGenerator {
    pub fn new(
        retriever: HybridRetriever,
        config: ModelConfig,
        context_budget: usize,
    ) -> anyhow::Result<Self> {
        let model: Arc<dyn ChatModel> = Arc::from(build_model(&config)?);
        Ok(Self {
            retriever,
            config,
            model,
            context_budget,
        })
    }

    /// Bypass provider construction; used to wire in scripted models.
    pub fn with_model(
        retriever: HybridRetriever,
        config: ModelConfig,
        context_budget: usize,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            retriever,
            config,
            model,
            context_budget,
        }
    }

    // Per-request override builds a throwaway model; a broken override
    // falls back to the default for this call only.
    fn resolve_model(&self, config_override: Option<&ModelOverride>) -> Arc<dyn ChatModel> {
        match config_override {
            None => Arc::clone(&self.model),
            Some(over) => {
                let config = over.apply(&self.config);
                match build_model(&config) {
                    Ok(model) => Arc::from(model),
                    Err(e) => {
                        warn!(error = %e, "Invalid model override, using default model");
                        Arc::clone(&self.model)
                    }
                }
            }
        }
    }

    /// Retrieve, assemble, invoke once. Model failures become a
    /// presentable answer, never an error to the caller.
    pub async fn answer(&self, req: &GenerationRequest) -> QueryResponse {
        let retrieved = self.retriever.retrieve(&req.prompt).await;

        if retrieved.is_empty() {
            return QueryResponse {
                answer: NOT_FOUND_ANSWER.to_string(),
                sources: Vec::new(),
            };
        }

        let context = build_context(&retrieved, self.context_budget);
        let sources = dedup_sources(&retrieved);
        let messages = build_messages(&req.prompt, &context, &req.history, req.image.as_deref());
        let model = self.resolve_model(req.config_override.as_ref());

        let answer = match model.invoke(&messages).await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Model invocation failed");
                format!("エラーが発生しました: {}", e)
            }
        };

        QueryResponse { answer, sources }
    }

    /// Same pipeline, delivered incrementally. Dropping the receiver
    /// stops emission mid-stream; nothing is persisted or retried.
    pub fn answer_stream(self: &Arc<Self>, req: GenerationRequest) -> mpsc::Receiver<AnswerEvent> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let generator = Arc::clone(self);
        tokio::spawn(async move {
            generator.run_stream(req, tx).await;
        });
        rx
    }

    async fn run_stream(&self, req: GenerationRequest, tx: mpsc::Sender<AnswerEvent>) {
        use futures::StreamExt;

        let retrieved = self.retriever.retrieve(&req.prompt).await;

        if retrieved.is_empty() {
            let _ = tx
                .send(AnswerEvent::Complete {
                    answer: NOT_FOUND_ANSWER.to_string(),
                    sources: Vec::new(),
                })
                .await;
            return;
        }

        // Sources go out first so the caller can render citations while
        // tokens arrive.
        let sources = dedup_sources(&retrieved);
        if tx.send(AnswerEvent::Sources { sources }).await.is_err() {
            return;
        }

        let context = build_context(&retrieved, self.context_budget);
        let messages = build_messages(&req.prompt, &context, &req.history, req.image.as_deref());
        let model = self.resolve_model(req.config_override.as_ref());

        let mut stream = match model.stream(&messages).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "Model stream failed to start");
                let _ = tx
                    .send(AnswerEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let mut full_answer = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(token) => {
                    if token.is_empty() {
                        continue;
                    }
                    full_answer.push_str(&token);
                    if tx.send(AnswerEvent::Token { token }).await.is_err() {
                        // Receiver gone: the caller disconnected.
                        return;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Model stream failed");
                    let _ = tx
                        .send(AnswerEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    return;
                }
            }
        }

        let _ = tx
            .send(AnswerEvent::Done {
                answer: full_answer,
            })
            .await;
    }
}

/// Deduplicate retrieved chunks into citable sources. The key is the
/// 200-char newline-collapsed snippet; the first occurrence wins.
pub fn dedup_sources(retrieved: &[ScoredChunk]) -> Vec<SourceInfo> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();

    for scored in retrieved {
        let snippet = make_snippet(&scored.chunk.text);
        if seen.insert(snippet.clone()) {
            sources.push(SourceInfo {
                filename: crate::context::basename(&scored.chunk.source).to_string(),
                snippet,
                page: scored.chunk.page,
            });
        }
    }
    sources
}

fn make_snippet(text: &str) -> String {
    let head: String = text.chars().take(SNIPPET_CHARS).collect();
    let collapsed = head.replace('\n', " ");
    let trimmed = collapsed.trim();
    if char_len(text) > SNIPPET_CHARS {
        format!("{}...", trimmed)
    } else {
        trimmed.to_string()
    }
}
