//! Embedding backends, provider abstraction, and the batching gateway.
//!
//! Backends form a closed, explicitly enumerated set: each has a fixed
//! provider identity and output dimension, dispatched exhaustively through
//! [`EmbeddingBackend`] — never discovered by probing a response shape at
//! runtime. The gateway batches requests (bounded batch size), runs a
//! bounded worker pool per backend to respect provider throughput limits,
//! and rejects any vector whose length disagrees with the backend's
//! declared dimension.
//!
//! # Retry strategy (HTTP provider)
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Other HTTP 4xx → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::EmbeddingConfig;
use crate::error::EmbedError;

/// The closed set of embedding backends.
///
/// Each backend owns its own self-consistent vector index: a query
/// against one backend is only ever compared with vectors that backend
/// produced from the same chunk generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingBackend {
    /// Amazon Titan Text Embeddings V2 via Bedrock, 1024 dimensions.
    Titan,
    /// text-embedding-3-large via Azure OpenAI, reduced to 1536 dimensions.
    OpenAi,
}

impl EmbeddingBackend {
    pub const ALL: [EmbeddingBackend; 2] = [EmbeddingBackend::Titan, EmbeddingBackend::OpenAi];

    pub fn name(&self) -> &'static str {
        match self {
            EmbeddingBackend::Titan => "titan",
            EmbeddingBackend::OpenAi => "openai",
        }
    }

    pub fn provider_id(&self) -> &'static str {
        match self {
            EmbeddingBackend::Titan => "bedrock-titan-v2",
            EmbeddingBackend::OpenAi => "azure-openai-3-large",
        }
    }

    /// Declared output dimension. Stored vectors must match exactly; no
    /// truncation or padding.
    pub fn dimension(&self) -> usize {
        match self {
            EmbeddingBackend::Titan => 1024,
            EmbeddingBackend::OpenAi => 1536,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "titan" => Some(EmbeddingBackend::Titan),
            "openai" => Some(EmbeddingBackend::OpenAi),
            _ => None,
        }
    }
}

/// Contract every concrete embedding provider satisfies.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Batching front door for one backend.
///
/// Splits inputs into batches of at most `batch_size`, keeps at most
/// `workers` batches in flight, observes the cancellation token between
/// and during batches, and enforces the backend dimension on every
/// returned vector.
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    backend: EmbeddingBackend,
    batch_size: usize,
    workers: usize,
}

impl EmbeddingGateway {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        backend: EmbeddingBackend,
        batch_size: usize,
        workers: usize,
    ) -> Self {
        Self {
            provider,
            backend,
            batch_size: batch_size.max(1),
            workers: workers.max(1),
        }
    }

    pub fn backend(&self) -> EmbeddingBackend {
        self.backend
    }

    /// Build a gateway from configuration, wiring the HTTP provider.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let backend = config
            .backend_descriptor()
            .ok_or_else(|| EmbedError::Provider {
                provider: config.backend.clone(),
                message: "embedding backend is disabled or unknown".to_string(),
            })?;
        let provider = HttpProvider::new(backend, config)?;
        Ok(Self::new(
            Arc::new(provider),
            backend,
            config.batch_size,
            config.workers,
        ))
    }

    /// Embed `texts`, in order. Fails the whole call on provider error so
    /// batch jobs can record the failing slice and continue.
    pub async fn embed(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set: JoinSet<Result<(usize, Vec<Vec<f32>>), EmbedError>> = JoinSet::new();

        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let batch: Vec<String> = batch.to_vec();

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| EmbedError::Cancelled)?;
                if cancel.is_cancelled() {
                    return Err(EmbedError::Cancelled);
                }
                tokio::select! {
                    _ = cancel.cancelled() => Err(EmbedError::Cancelled),
                    result = provider.embed(&batch) => result.map(|v| (batch_index, v)),
                }
            });
        }

        let mut batches: Vec<Option<Vec<Vec<f32>>>> =
            vec![None; texts.len().div_ceil(self.batch_size)];
        while let Some(joined) = join_set.join_next().await {
            let (index, vectors) = joined.map_err(|e| EmbedError::Provider {
                provider: self.backend.provider_id().to_string(),
                message: format!("embedding worker panicked: {e}"),
            })??;
            batches[index] = Some(vectors);
        }

        let mut out = Vec::with_capacity(texts.len());
        for vectors in batches.into_iter().flatten() {
            for vector in vectors {
                self.check_dimension(&vector)?;
                out.push(vector);
            }
        }

        if out.len() != texts.len() {
            return Err(EmbedError::Provider {
                provider: self.backend.provider_id().to_string(),
                message: format!("expected {} vectors, got {}", texts.len(), out.len()),
            });
        }

        Ok(out)
    }

    /// Embed a single query text.
    pub async fn embed_query(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed(&[text.to_string()], cancel).await?;
        vectors.pop().ok_or_else(|| EmbedError::Provider {
            provider: self.backend.provider_id().to_string(),
            message: "empty embedding response".to_string(),
        })
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), EmbedError> {
        if vector.len() != self.backend.dimension() {
            return Err(EmbedError::DimensionMismatch {
                backend: self.backend.name().to_string(),
                expected: self.backend.dimension(),
                got: vector.len(),
            });
        }
        Ok(())
    }
}

// ============ HTTP provider ============

/// Calls an OpenAI-compatible `POST /embeddings` endpoint with batching,
/// retry, and exponential backoff.
pub struct HttpProvider {
    backend: EmbeddingBackend,
    endpoint: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(backend: EmbeddingBackend, config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| EmbedError::Provider {
                provider: backend.provider_id().to_string(),
                message: "embedding.endpoint is required".to_string(),
            })?;
        let api_key =
            std::env::var(&config.api_key_env).map_err(|_| EmbedError::Provider {
                provider: backend.provider_id().to_string(),
                message: format!("{} environment variable not set", config.api_key_env),
            })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbedError::Provider {
                provider: backend.provider_id().to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            backend,
            endpoint,
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }

    fn provider_error(&self, message: impl Into<String>) -> EmbedError {
        EmbedError::Provider {
            provider: self.backend.provider_id().to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.backend.provider_id(),
            "input": texts,
            "dimensions": self.backend.dimension(),
        });

        let mut last_err: Option<EmbedError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| self.provider_error(e.to_string()))?;
                        return parse_embeddings_response(&json)
                            .map_err(|m| self.provider_error(m));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err =
                            Some(self.provider_error(format!("HTTP {status}: {body_text}")));
                        continue;
                    }
                    return Err(self.provider_error(format!("HTTP {status}: {body_text}")));
                }
                Err(e) => {
                    last_err = Some(self.provider_error(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| self.provider_error("embedding failed after retries")))
    }
}

fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, String> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| "invalid response: missing data array".to_string())?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| "invalid response: missing embedding".to_string())?;
        embeddings.push(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(embeddings)
}

// ============ Deterministic mock provider ============

/// Deterministic provider for tests and offline runs: the vector is a
/// pure function of the input text, with unit norm.
pub struct MockProvider {
    backend: EmbeddingBackend,
}

impl MockProvider {
    pub fn new(backend: EmbeddingBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts
            .iter()
            .map(|t| deterministic_vector(t, self.backend.dimension()))
            .collect())
    }
}

/// Hash the text into a reproducible pseudo-random unit vector.
pub fn deterministic_vector(text: &str, dims: usize) -> Vec<f32> {
    use sha2::{Digest, Sha256};
    let seed = Sha256::digest(text.as_bytes());
    let mut state = u64::from_le_bytes(seed[..8].try_into().unwrap());
    let mut v: Vec<f32> = (0..dims)
        .map(|_| {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state as f64 / u64::MAX as f64) as f32 - 0.5
        })
        .collect();
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB of little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; 0 for empty or mismatched lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Cosine distance `1 − similarity`, in `[0, 2]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    struct WrongDimProvider;

    #[async_trait]
    impl EmbeddingProvider for WrongDimProvider {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(texts.iter().map(|_| vec![0.5f32; 7]).collect())
        }
    }

    #[test]
    fn test_backend_set_is_closed_and_exhaustive() {
        for b in EmbeddingBackend::ALL {
            assert_eq!(EmbeddingBackend::parse(b.name()), Some(b));
            assert!(b.dimension() > 0);
        }
        assert_eq!(EmbeddingBackend::parse("cohere"), None);
    }

    #[test]
    fn test_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_deterministic_vector_stable_and_unit() {
        let a = deterministic_vector("negligence duty of care", 64);
        let b = deterministic_vector("negligence duty of care", 64);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        let c = deterministic_vector("something else entirely", 64);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_gateway_preserves_order_across_batches() {
        let gateway = EmbeddingGateway::new(
            Arc::new(MockProvider::new(EmbeddingBackend::Titan)),
            EmbeddingBackend::Titan,
            2,
            3,
        );
        let texts: Vec<String> = (0..7).map(|i| format!("text number {i}")).collect();
        let cancel = CancellationToken::new();
        let vectors = gateway.embed(&texts, &cancel).await.unwrap();
        assert_eq!(vectors.len(), 7);
        for (i, t) in texts.iter().enumerate() {
            assert_eq!(vectors[i], deterministic_vector(t, 1024));
        }
    }

    #[tokio::test]
    async fn test_gateway_rejects_wrong_dimension() {
        let gateway = EmbeddingGateway::new(
            Arc::new(WrongDimProvider),
            EmbeddingBackend::Titan,
            8,
            1,
        );
        let cancel = CancellationToken::new();
        let err = gateway
            .embed(&["a".to_string()], &cancel)
            .await
            .unwrap_err();
        match err {
            EmbedError::DimensionMismatch { expected, got, .. } => {
                assert_eq!(expected, 1024);
                assert_eq!(got, 7);
            }
            other => panic!("expected DimensionMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_gateway_observes_cancellation() {
        let gateway = EmbeddingGateway::new(
            Arc::new(MockProvider::new(EmbeddingBackend::Titan)),
            EmbeddingBackend::Titan,
            1,
            1,
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = gateway
            .embed(&["a".to_string(), "b".to_string()], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::Cancelled));
    }

    #[tokio::test]
    async fn test_empty_input_short_circuits() {
        let gateway = EmbeddingGateway::new(
            Arc::new(MockProvider::new(EmbeddingBackend::OpenAi)),
            EmbeddingBackend::OpenAi,
            8,
            2,
        );
        let cancel = CancellationToken::new();
        assert!(gateway.embed(&[], &cancel).await.unwrap().is_empty());
    }
}
