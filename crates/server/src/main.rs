mod config;
mod geocode;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use answer::{ChatTurn, GenerationRequest, ModelConfig, ModelOverride, QueryResponse, RagGenerator};
use config::ServerConfig;
use corpus::{Chunk, Splitter};
use search::{Bm25Index, HybridRetriever};
use store::{EmbeddingClient, EmbeddingProvider, VectorStore};

const NOT_READY_MESSAGE: &str =
    "RAGシステムが初期化されていません。data/raw フォルダにPDFまたはTXTファイルを追加して再取り込みしてください。";

struct AppState {
    config: ServerConfig,
    // Hot-swapped on ingest: one writer publishes a fresh pipeline while
    // in-flight readers keep the Arc they already cloned.
    generator: RwLock<Option<Arc<RagGenerator>>>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env();
    let state = Arc::new(AppState {
        config: config.clone(),
        generator: RwLock::new(None),
    });

    match build_pipeline(&config, config.force_reingest).await {
        Ok((generator, chunk_count)) => {
            *state.generator.write().await = Some(Arc::new(generator));
            info!(chunks = chunk_count, "RAG pipeline ready");
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize RAG pipeline; serving in degraded state");
        }
    }

    let app = Router::new()
        .route("/health", get(health))
        .route("/query", post(query))
        .route("/query/stream", post(query_stream))
        .route("/ingest", post(ingest))
        .layer(CorsLayer::permissive())
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind server address");

    info!(addr = %config.bind_addr, "Server listening");
    axum::serve(listener, app).await.expect("Server error");
}

/// Load the corpus, reuse or rebuild the vector store, build the lexical
/// index, and wire up a generator. Returns the pipeline and the chunk
/// count so ingestion can report it.
async fn build_pipeline(config: &ServerConfig, force: bool) -> Result<(RagGenerator, usize)> {
    let data_dir = PathBuf::from(&config.data_dir);
    let splitter = Splitter::new(config.chunk_size, config.chunk_overlap);
    let chunks = tokio::task::spawn_blocking(move || {
        let documents = corpus::load_documents(&data_dir);
        splitter.split(&documents)
    })
    .await
    .context("Corpus loading task failed")?;
    let chunk_count = chunks.len();
    info!(chunks = chunk_count, "Corpus prepared");

    let embedder = EmbeddingClient::new(embedding_provider(config), config.embedding_model.clone());
    let store_dir = Path::new(&config.store_dir);

    let vector = if !force && VectorStore::exists(store_dir) {
        match VectorStore::load(store_dir, embedder.clone()) {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "Persisted vector store unreadable, rebuilding");
                fresh_store(&chunks, &embedder, store_dir).await?
            }
        }
    } else {
        fresh_store(&chunks, &embedder, store_dir).await?
    };

    let lexical = Bm25Index::build(chunks);
    let retriever = HybridRetriever::with_params(
        vector,
        lexical,
        config.vector_weight,
        config.lexical_weight,
        config.top_k,
    );

    let model_config = ModelConfig {
        model_type: config.model_type.clone(),
        model_name: config.model_name.clone(),
        ollama_base_url: config.ollama_base_url.clone(),
        openai_api_key: config.openai_api_key.clone(),
        temperature: answer::llm::DEFAULT_TEMPERATURE,
    };

    let generator = RagGenerator::new(retriever, model_config, config.context_budget)?;
    Ok((generator, chunk_count))
}

async fn fresh_store(
    chunks: &[Chunk],
    embedder: &EmbeddingClient,
    dir: &Path,
) -> Result<VectorStore> {
    if chunks.is_empty() {
        warn!("No chunks available; starting with an empty vector store");
        return Ok(VectorStore::empty(embedder.clone()));
    }
    VectorStore::build(chunks, embedder.clone(), dir).await
}

fn embedding_provider(config: &ServerConfig) -> EmbeddingProvider {
    if config.model_type == "openai" {
        EmbeddingProvider::OpenAi {
            api_key: config.openai_api_key.clone(),
        }
    } else {
        EmbeddingProvider::Ollama {
            base_url: config.ollama_base_url.clone(),
        }
    }
}

#[derive(Deserialize)]
struct QueryBody {
    prompt: String,
    config: Option<ModelOverride>,
    location: Option<Coordinates>,
    image: Option<String>,
    history: Option<Vec<ChatTurn>>,
}

#[derive(Deserialize)]
struct Coordinates {
    lat: f64,
    lon: f64,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    rag_initialized: bool,
}

#[derive(Deserialize, Default)]
struct IngestBody {
    path: Option<String>,
    force: Option<bool>,
}

#[derive(Serialize)]
struct IngestResponse {
    chunks_created: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let ready = state.generator.read().await.is_some();
    Json(HealthResponse {
        status: if ready { "ready" } else { "loading" },
        rag_initialized: ready,
    })
}

async fn current_generator(state: &AppState) -> Option<Arc<RagGenerator>> {
    state.generator.read().await.clone()
}

// Resolve the optional location into a plain-text preface before the
// pipeline sees the prompt; geocoding failures leave it untouched.
async fn to_request(body: QueryBody) -> GenerationRequest {
    let mut prompt = body.prompt;
    if let Some(coords) = body.location {
        if let Some(place) = geocode::reverse(coords.lat, coords.lon).await {
            prompt = format!("現在地: {}\n\n{}", place, prompt);
        }
    }
    GenerationRequest {
        prompt,
        config_override: body.config,
        image: body.image,
        history: body.history.unwrap_or_default(),
    }
}

async fn query(
    State(state): State<Arc<AppState>>,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryResponse>, (StatusCode, String)> {
    let Some(generator) = current_generator(&state).await else {
        return Err((StatusCode::SERVICE_UNAVAILABLE, NOT_READY_MESSAGE.to_string()));
    };

    let request = to_request(body).await;
    Ok(Json(generator.answer(&request).await))
}

async fn query_stream(State(state): State<Arc<AppState>>, Json(body): Json<QueryBody>) -> Response {
    let Some(generator) = current_generator(&state).await else {
        return (StatusCode::SERVICE_UNAVAILABLE, NOT_READY_MESSAGE).into_response();
    };

    let request = to_request(body).await;
    let events = ReceiverStream::new(generator.answer_stream(request))
        .map(|event| Event::default().json_data(&event));

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

async fn ingest(
    State(state): State<Arc<AppState>>,
    body: Option<Json<IngestBody>>,
) -> Result<Json<IngestResponse>, (StatusCode, String)> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let mut config = state.config.clone();
    if let Some(path) = body.path {
        config.data_dir = path;
    }
    let force = body.force.unwrap_or(true);

    let (generator, chunk_count) = build_pipeline(&config, force)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    if chunk_count == 0 {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            format!(
                "No chunks produced from {}. Add PDF/TXT/MD files and retry.",
                config.data_dir
            ),
        ));
    }

    *state.generator.write().await = Some(Arc::new(generator));
    info!(chunks = chunk_count, "Reingested corpus and swapped pipeline");

    Ok(Json(IngestResponse {
        chunks_created: chunk_count,
    }))
}
