use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use clap::Parser;
use docqa::config::ConfigArgs;
use docqa::present::truncate_chars;
use docqa::{Answer, Assistant, DocQaError, PreparedPrompt, RetrievedResult, StoreStats};
use html_escape::{encode_double_quoted_attribute, encode_text};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "docqa-server",
    about = "HTML and JSON question answering over the indexed documents"
)]
struct ServerCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "DOCQA_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    #[command(flatten)]
    config: ConfigArgs,

    /// Max cached query embeddings kept in-memory (0 disables caching).
    #[arg(long, env = "DOCQA_EMBEDDING_CACHE", default_value_t = 1024)]
    embedding_cache_size: usize,
}

#[derive(Clone)]
struct AppState {
    assistant: Arc<Assistant>,
    embedding_cache: Option<Arc<Mutex<LruCache<String, Vec<f32>>>>>,
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    query: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    include_prompt: bool,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    answer: String,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    sources: Vec<RetrievedResult>,
    meta: ResponseMeta,
}

#[derive(Debug, Deserialize)]
struct RetrieveRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
struct RetrieveResponse {
    results: Vec<RetrievedResult>,
    meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
struct ResponseMeta {
    top_k: usize,
    latency_ms: f64,
}

#[derive(Debug, Serialize)]
struct ModelsResponse {
    models: Vec<String>,
    default_model: String,
}

#[derive(Debug, Deserialize)]
struct AskForm {
    query: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    show_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    kind: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = ServerCli::parse();
    let config = cli.config.resolve().context("failed to load configuration")?;
    let assistant = tokio::task::spawn_blocking(move || Assistant::open(config))
        .await
        .context("assistant start-up task failed")?
        .context("failed to open assistant")?;
    let stats = assistant.stats();
    tracing::info!(
        chunks = stats.chunks,
        documents = stats.documents,
        "vector store ready"
    );
    let state = AppState {
        assistant: Arc::new(assistant),
        embedding_cache: build_cache(cli.embedding_cache_size),
    };
    let app = router(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    tracing::info!("docqa-server listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server shutdown")?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/ask", post(ask_page))
        .route("/healthz", get(healthz))
        .route("/v1/ask", post(ask_handler))
        .route("/v1/retrieve", post(retrieve_handler))
        .route("/v1/models", get(models_handler))
        .route("/v1/stats", get(stats_handler))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn models_handler(State(state): State<AppState>) -> Json<ModelsResponse> {
    let generation = &state.assistant.config().generation;
    Json(ModelsResponse {
        models: generation.models.clone(),
        default_model: generation.default_model.clone(),
    })
}

async fn stats_handler(State(state): State<AppState>) -> Json<StoreStats> {
    Json(state.assistant.stats())
}

async fn retrieve_handler(
    State(state): State<AppState>,
    Json(request): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, ApiError> {
    let start = Instant::now();
    let prepared = prepare(&state, request.query, request.top_k)
        .await
        .map_err(api_error)?;
    let top_k = request
        .top_k
        .unwrap_or(state.assistant.config().retrieval.top_k);
    Ok(Json(RetrieveResponse {
        results: prepared.sources,
        meta: ResponseMeta {
            top_k,
            latency_ms: elapsed_ms(start),
        },
    }))
}

async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let start = Instant::now();
    let top_k = request
        .top_k
        .unwrap_or(state.assistant.config().retrieval.top_k);
    let answer = answer(&state, request.query, request.model, request.top_k)
        .await
        .map_err(api_error)?;
    Ok(Json(AskResponse {
        prompt: request.include_prompt.then(|| answer.prompt.clone()),
        answer: answer.answer,
        model: answer.model,
        sources: answer.sources,
        meta: ResponseMeta {
            top_k,
            latency_ms: elapsed_ms(start),
        },
    }))
}

async fn index_page(State(state): State<AppState>) -> Html<String> {
    Html(render_page(&state, &FormValues::default(), ""))
}

async fn ask_page(
    State(state): State<AppState>,
    Form(form): Form<AskForm>,
) -> (StatusCode, Html<String>) {
    let values = FormValues {
        query: form.query.clone(),
        model: form.model.clone(),
        top_k: form.top_k,
        show_prompt: form.show_prompt.is_some(),
    };
    match answer(&state, form.query, form.model, form.top_k).await {
        Ok(answer) => {
            let body = render_answer(&answer, values.show_prompt, preview_chars(&state));
            (StatusCode::OK, Html(render_page(&state, &values, &body)))
        }
        Err(err) => {
            tracing::warn!(kind = err.kind(), error = %err, "query failed");
            let body = format!(
                "<section class=\"error\"><h2>Something went wrong</h2><p>{}</p><p><a href=\"/\">Try again</a></p></section>",
                encode_text(&err.to_string())
            );
            (status_for(&err), Html(render_page(&state, &values, &body)))
        }
    }
}

async fn prepare(
    state: &AppState,
    query: String,
    top_k: Option<usize>,
) -> Result<PreparedPrompt, DocQaError> {
    state.assistant.check_query(&query, top_k)?;
    let vector = embed_query(state, query.clone()).await?;
    let assistant = state.assistant.clone();
    blocking(move || assistant.prepare_with_vector(&query, &vector, top_k)).await
}

async fn answer(
    state: &AppState,
    query: String,
    model: Option<String>,
    top_k: Option<usize>,
) -> Result<Answer, DocQaError> {
    let model = state
        .assistant
        .resolve_model(model.as_deref().filter(|m| !m.trim().is_empty()))?;
    let prepared = prepare(state, query, top_k).await?;
    let assistant = state.assistant.clone();
    blocking(move || assistant.generate(prepared, &model)).await
}

async fn embed_query(state: &AppState, query: String) -> Result<Vec<f32>, DocQaError> {
    if let Some(cache) = &state.embedding_cache {
        if let Some(hit) = {
            let mut guard = cache.lock().await;
            guard.get(&query).cloned()
        } {
            return Ok(hit);
        }
    }

    let assistant = state.assistant.clone();
    let query_clone = query.clone();
    let embedding = blocking(move || assistant.embed_query(&query_clone)).await?;

    if let Some(cache) = &state.embedding_cache {
        let mut guard = cache.lock().await;
        guard.put(query, embedding.clone());
    }
    Ok(embedding)
}

async fn blocking<T, F>(task: F) -> Result<T, DocQaError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DocQaError> + Send + 'static,
{
    tokio::task::spawn_blocking(task).await.map_err(|err| {
        DocQaError::Io(std::io::Error::other(format!(
            "blocking task join error: {err}"
        )))
    })?
}

fn status_for(err: &DocQaError) -> StatusCode {
    match err {
        DocQaError::Input(_) | DocQaError::Validation(_) | DocQaError::UnknownModel(_) => {
            StatusCode::BAD_REQUEST
        }
        DocQaError::EmptyIndex => StatusCode::CONFLICT,
        DocQaError::NotFound { .. } => StatusCode::NOT_FOUND,
        DocQaError::GenerationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        DocQaError::GenerationFailure { .. } | DocQaError::Embedding(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: DocQaError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::warn!(kind = err.kind(), error = %err, "request failed");
    }
    (
        status,
        Json(ErrorBody {
            message: err.to_string(),
            kind: err.kind().to_string(),
        }),
    )
}

fn build_cache(size: usize) -> Option<Arc<Mutex<LruCache<String, Vec<f32>>>>> {
    NonZeroUsize::new(size).map(|capacity| Arc::new(Mutex::new(LruCache::new(capacity))))
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn preview_chars(state: &AppState) -> usize {
    state.assistant.config().retrieval.preview_chars
}

#[derive(Debug, Default)]
struct FormValues {
    query: String,
    model: Option<String>,
    top_k: Option<usize>,
    show_prompt: bool,
}

fn render_page(state: &AppState, values: &FormValues, body: &str) -> String {
    let config = state.assistant.config();
    let selected_model = values
        .model
        .as_deref()
        .unwrap_or(&config.generation.default_model);
    let options: String = config
        .generation
        .models
        .iter()
        .map(|model| {
            format!(
                "<option value=\"{value}\"{selected}>{label}</option>",
                value = encode_double_quoted_attribute(model),
                selected = if model == selected_model { " selected" } else { "" },
                label = encode_text(model),
            )
        })
        .collect();
    let max_top_k = config.retrieval.max_top_k;
    let top_k = values
        .top_k
        .unwrap_or(config.retrieval.top_k)
        .clamp(1, max_top_k);

    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Document Q&amp;A</title>
<style>
body {{ font-family: system-ui, sans-serif; max-width: 52rem; margin: 2rem auto; padding: 0 1rem; }}
textarea {{ width: 100%; }}
pre {{ white-space: pre-wrap; background: #f6f6f6; padding: 0.75rem; }}
.source {{ border-top: 1px solid #ccc; padding: 0.5rem 0; }}
.error {{ color: #a00; }}
</style>
</head>
<body>
<h1>Document Q&amp;A</h1>
<form method="post" action="/ask">
<p><label for="query">Question</label><br>
<textarea id="query" name="query" rows="3" required>{query}</textarea></p>
<p><label for="model">Model</label>
<select id="model" name="model">{options}</select></p>
<p><label for="top_k">Chunks to retrieve: <output id="top_k_value">{top_k}</output></label><br>
<input type="range" id="top_k" name="top_k" min="1" max="{max_top_k}" value="{top_k}"
 oninput="document.getElementById('top_k_value').value = this.value"></p>
<p><label><input type="checkbox" name="show_prompt"{show_prompt}> Show prompt</label></p>
<p><button type="submit">Ask</button></p>
</form>
{body}
</body>
</html>
"#,
        query = encode_text(&values.query),
        show_prompt = if values.show_prompt { " checked" } else { "" },
    )
}

fn render_answer(answer: &Answer, show_prompt: bool, preview_chars: usize) -> String {
    let mut html = format!(
        "<section><h2>Answer</h2><p><small>{}</small></p><pre>{}</pre></section>",
        encode_text(&answer.model),
        encode_text(&answer.answer)
    );
    html.push_str("<section><h2>Sources</h2>");
    for source in &answer.sources {
        html.push_str(&format!(
            "<div class=\"source\"><strong>{}</strong> {} <small>(distance={:.4})</small><pre>{}</pre></div>",
            encode_text(&source.citation_id),
            encode_text(&source.metadata.label()),
            source.distance,
            encode_text(truncate_chars(source.content.trim(), preview_chars))
        ));
    }
    html.push_str("</section>");
    if show_prompt {
        html.push_str(&format!(
            "<section><h2>Prompt</h2><pre>{}</pre></section>",
            encode_text(&answer.prompt)
        ));
    }
    html
}
