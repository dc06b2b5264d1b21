//! Proveedores de embeddings: convierten texto en vectores de dimensión fija.
//!
//! - [`FastEmbedProvider`]: all-MiniLM-L6-v2 local con fastembed (por defecto).
//! - [`HashingEmbedder`]: bolsa de palabras con hashing, sin modelo que descargar.
//! - [`OllamaEmbedder`]: endpoint `/api/embed` de un servidor Ollama.
//! - [`OpenAiEmbedder`]: embeddings de OpenAI a través de Rig.

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::config::{AppConfig, EmbeddingKind};
use crate::error::{EmbeddingError, IndexBuildError};
use crate::llm::endpoint;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Nombre corto para logs y errores.
    fn name(&self) -> &str;

    /// Dimensión de todos los vectores devueltos.
    fn dimensions(&self) -> usize;

    /// `true` si la cercanía entre vectores sólo refleja términos compartidos
    /// y puede dar falsos positivos por colisiones. El recuperador exige
    /// entonces al menos un término en común con la consulta.
    fn requires_shared_term(&self) -> bool {
        false
    }

    /// Embeddings de un lote de textos, en el mismo orden.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::new(self.name(), "respuesta vacía"))
    }
}

/// Crea el proveedor configurado.
pub fn provider_from_config(cfg: &AppConfig) -> Result<Arc<dyn EmbeddingProvider>, IndexBuildError> {
    let provider: Arc<dyn EmbeddingProvider> = match cfg.embedding_provider {
        EmbeddingKind::FastEmbed => Arc::new(FastEmbedProvider::new(&cfg.embedding_model)?),
        EmbeddingKind::Hashing => Arc::new(HashingEmbedder::new(cfg.embedding_dimensions)),
        EmbeddingKind::Ollama => Arc::new(OllamaEmbedder::new(
            cfg.ollama_url.clone(),
            cfg.embedding_model.clone(),
            cfg.embedding_dimensions,
            cfg.generation_timeout,
        )),
        EmbeddingKind::OpenAI => {
            if std::env::var("OPENAI_API_KEY").is_err() {
                return Err(IndexBuildError::EmbeddingUnavailable {
                    provider: "openai".to_string(),
                    message: "Falta OPENAI_API_KEY en el entorno".to_string(),
                });
            }
            Arc::new(OpenAiEmbedder::new(
                cfg.embedding_model.clone(),
                cfg.embedding_dimensions,
            ))
        }
    };
    Ok(provider)
}

// ---------------------------------------------------------------------
// FASTEMBED (local)
// ---------------------------------------------------------------------

pub const FASTEMBED_MODEL: &str = "all-MiniLM-L6-v2";
pub const FASTEMBED_DIMENSIONS: usize = 384;

/// Modelo ONNX local. Se descarga y carga en el primer lote, fuera del
/// runtime async.
pub struct FastEmbedProvider {
    model: EmbeddingModel,
    model_name: String,
    dimensions: usize,
    engine: Arc<Mutex<Option<TextEmbedding>>>,
}

impl FastEmbedProvider {
    pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
        let (model, dimensions) = match model_name {
            "" | FASTEMBED_MODEL => (EmbeddingModel::AllMiniLML6V2, FASTEMBED_DIMENSIONS),
            "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
            "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
            other => {
                return Err(EmbeddingError::new(
                    "fastembed",
                    format!("modelo no soportado: {other}"),
                ))
            }
        };
        Ok(Self {
            model,
            model_name: if model_name.is_empty() {
                FASTEMBED_MODEL.to_string()
            } else {
                model_name.to_string()
            },
            dimensions,
            engine: Arc::new(Mutex::new(None)),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    fn name(&self) -> &str {
        "fastembed"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let engine = self.engine.clone();
        let model = self.model.clone();
        let model_name = self.model_name.clone();
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = engine.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.is_none() {
                info!("Cargando modelo de embeddings local '{}'...", model_name);
                let options = InitOptions::new(model).with_show_download_progress(false);
                let loaded = TextEmbedding::try_new(options)
                    .map_err(|e| EmbeddingError::new("fastembed", e))?;
                *guard = Some(loaded);
            }
            let engine = guard
                .as_mut()
                .ok_or_else(|| EmbeddingError::new("fastembed", "modelo no cargado"))?;
            engine
                .embed(texts, None)
                .map_err(|e| EmbeddingError::new("fastembed", e))
        })
        .await
        .map_err(|e| EmbeddingError::new("fastembed", e))?
    }
}

// ---------------------------------------------------------------------
// HASHING (local)
// ---------------------------------------------------------------------

pub const DEFAULT_HASHING_DIMENSIONS: usize = 1024;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const HASHING_STOP_WORDS: &[&str] = &[
    "a", "about", "am", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "could",
    "did", "do", "does", "for", "from", "had", "has", "have", "he", "her", "his", "how", "if",
    "in", "into", "is", "it", "its", "me", "much", "many", "my", "no", "not", "of", "on", "or",
    "our", "per", "she", "should", "so", "than", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "those", "to", "was", "we", "were", "what", "when", "where", "which",
    "who", "why", "will", "with", "would", "you", "your",
];

/// Embeddings por *feature hashing* de términos (FNV-1a con signo).
///
/// No necesita red ni modelo. Las colisiones de hash pueden acercar textos
/// sin nada en común, por eso declara `requires_shared_term`. Textos sin
/// términos dan el vector cero.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for term in terms(text) {
            let hash = fnv1a(term.as_bytes());
            let slot = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
            vector[slot] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSIONS)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn requires_shared_term(&self) -> bool {
        true
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Términos de contenido: minúsculas, sin stop words y con plural simple plegado.
fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_lowercase())
        .filter(|t| !HASHING_STOP_WORDS.contains(&t.as_str()))
        .map(|t| {
            if t.len() > 4 && t.ends_with('s') && !t.ends_with("ss") {
                t[..t.len() - 1].to_string()
            } else {
                t
            }
        })
}

/// Conjunto de términos de contenido de `text`, normalizados como en el hashing.
pub fn content_terms(text: &str) -> HashSet<String> {
    terms(text).collect()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

// ---------------------------------------------------------------------
// OLLAMA
// ---------------------------------------------------------------------

pub const DEFAULT_OLLAMA_EMBEDDING_MODEL: &str = "nomic-embed-text";

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    http: reqwest::Client,
    url: Url,
    model: String,
    dimensions: usize,
    timeout: Duration,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(url: Url, model: String, dimensions: usize, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            model,
            dimensions,
            timeout,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = endpoint(&self.url, "api/embed").map_err(|e| EmbeddingError::new("ollama", e))?;
        debug!(batch = texts.len(), model = %self.model, "Pidiendo embeddings a Ollama");

        let response = self
            .http
            .post(url)
            .timeout(self.timeout)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| EmbeddingError::new("ollama", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::new(
                "ollama",
                format!("estado {status}: {body}"),
            ));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::new("ollama", e))?;
        Ok(parsed.embeddings)
    }
}

// ---------------------------------------------------------------------
// OPENAI (vía Rig)
// ---------------------------------------------------------------------

pub const OPENAI_EMBEDDING_DIMENSIONS: usize = 1536;

#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(model: String, dimensions: usize) -> Self {
        Self { model, dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;
        use rig::embeddings::EmbeddingModel as _;

        let client = openai::Client::from_env();
        let model_name = if self.model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        let embeddings = embedding_model
            .embed_texts(texts.to_vec())
            .await
            .map_err(|e| EmbeddingError::new("openai", e))?;

        Ok(embeddings
            .into_iter()
            .map(|emb| emb.vec.into_iter().map(|x| x as f32).collect())
            .collect())
    }
}
