//! Embedding providers.
//!
//! Concrete [`EmbeddingModel`] implementations selected by
//! `embedding.provider`:
//!
//! | Config Value | Provider |
//! |-------------|----------|
//! | `"hash"` | [`HashingEmbedder`], deterministic and offline |
//! | `"openai"` | [`OpenAiEmbedder`], `POST /v1/embeddings` |
//! | `"ollama"` | [`OllamaEmbedder`], `POST /api/embed` |
//! | `"local"` | `LocalEmbedder` via fastembed (feature `local-embeddings-fastembed`) |
//!
//! # Retry Strategy
//!
//! The HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use evidex_core::embedding::{l2_normalize, EmbeddingModel, EncodeOptions, HashingEmbedder};
use evidex_core::{Error, Result};

use crate::config::{EmbeddingConfig, DEFAULT_HASH_DIMS};

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Instantiate the provider named in `config`.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingModel>> {
    match config.provider.as_str() {
        "hash" => {
            let dims = config.dims.unwrap_or(DEFAULT_HASH_DIMS);
            Ok(Arc::new(match &config.model {
                Some(name) => HashingEmbedder::with_name(dims, name.clone()),
                None => HashingEmbedder::new(dims),
            }))
        }
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires --features local-embeddings-fastembed"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn build_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if timeout_secs > 0 {
        builder = builder.timeout(Duration::from_secs(timeout_secs));
    }
    Ok(builder.build()?)
}

/// Settings shared by the HTTP providers.
struct HttpTransport {
    client: reqwest::Client,
    max_retries: u32,
    default_timeout: Option<Duration>,
}

impl HttpTransport {
    fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            max_retries: config.max_retries,
            default_timeout: config.timeout(),
        })
    }

    /// POST `body` as JSON, retrying transient failures.
    async fn post_json(
        &self,
        label: &str,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value> {
        let timeout = timeout.or(self.default_timeout);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::warn!(provider = label, attempt, ?delay, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .json(body);
            if let Some(token) = bearer {
                request = request.header("Authorization", format!("Bearer {}", token));
            }
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .map_err(|e| Error::Embedding(format!("{} response: {}", label, e)));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = Error::Embedding(format!("{} API error {}: {}", label, status, body_text));
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(match timeout {
                        Some(limit) if e.is_timeout() => Error::DeadlineExceeded(limit),
                        _ => Error::Embedding(format!("{} connection error ({}): {}", label, url, e)),
                    });
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::Embedding(format!("{} embedding failed after retries", label))))
    }
}

/// Apply the per-call batching and normalization contract around a
/// single-batch request function.
async fn encode_batched<F, Fut>(
    texts: &[String],
    options: &EncodeOptions,
    mut request: F,
) -> Result<Vec<Vec<f32>>>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<Vec<f32>>>>,
{
    let mut rows = Vec::with_capacity(texts.len());
    for batch in texts.chunks(options.batch_size.max(1)) {
        let embedded = request(batch.to_vec()).await?;
        if embedded.len() != batch.len() {
            return Err(Error::EmbeddingShape {
                expected_rows: batch.len(),
                rows: embedded.len(),
                detail: "provider returned a different number of embeddings than inputs"
                    .to_string(),
            });
        }
        rows.extend(embedded);
    }
    if options.normalize {
        for row in &mut rows {
            l2_normalize(row);
        }
    }
    Ok(rows)
}

fn parse_vector(value: &serde_json::Value, what: &str) -> Result<Vec<f32>> {
    let items = value
        .as_array()
        .ok_or_else(|| Error::Embedding(format!("Invalid {} response: embedding is not an array", what)))?;
    Ok(items
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ OpenAI ============

/// Calls the OpenAI embeddings API. Requires `OPENAI_API_KEY`.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    transport: HttpTransport,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            model,
            dims,
            api_key,
            transport: HttpTransport::new(config)?,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn encode(&self, texts: &[String], options: &EncodeOptions) -> Result<Vec<Vec<f32>>> {
        encode_batched(texts, options, |batch| async move {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let json = self
                .transport
                .post_json("OpenAI", OPENAI_EMBEDDINGS_URL, Some(&self.api_key), &body, options.timeout)
                .await?;
            parse_openai_response(&json)
        })
        .await
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::Embedding("Invalid OpenAI response: missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .ok_or_else(|| Error::Embedding("Invalid OpenAI response: missing embedding".to_string()))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, parse_vector(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vec)| vec).collect())
}

// ============ Ollama ============

/// Calls `POST /api/embed` on a local Ollama instance.
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    transport: HttpTransport,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            transport: HttpTransport::new(config)?,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }
}

#[async_trait]
impl EmbeddingModel for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn encode(&self, texts: &[String], options: &EncodeOptions) -> Result<Vec<Vec<f32>>> {
        let endpoint = format!("{}/api/embed", self.url);
        encode_batched(texts, options, |batch| {
            let endpoint = endpoint.clone();
            async move {
                let body = serde_json::json!({
                    "model": self.model,
                    "input": batch,
                });
                let json = self
                    .transport
                    .post_json("Ollama", &endpoint, None, &body, options.timeout)
                    .await?;
                parse_ollama_response(&json)
            }
        })
        .await
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| Error::Embedding("Invalid Ollama response: missing embeddings array".to_string()))?;

    embeddings
        .iter()
        .map(|embedding| parse_vector(embedding, "Ollama"))
        .collect()
}

// ============ Local (fastembed) ============

/// Runs an ONNX embedding model in-process via fastembed. The model is
/// downloaded on first use and then loaded once per embedder.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    name: String,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model(&name)?).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

        Ok(Self {
            name,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn fastembed_model(name: &str) -> anyhow::Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!("Unknown local embedding model: {}", other),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingModel for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn encode(&self, texts: &[String], options: &EncodeOptions) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        let batch_size = options.batch_size.max(1);

        let mut rows = tokio::task::spawn_blocking(move || {
            let mut model = model.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| Error::Embedding(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| Error::Embedding(format!("Local embedding task failed: {}", e)))??;

        if options.normalize {
            for row in &mut rows {
                l2_normalize(row);
            }
        }
        Ok(rows)
    }
}
