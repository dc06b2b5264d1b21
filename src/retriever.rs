//! Recuperación en dos niveles: búsqueda directa y, si no encuentra nada,
//! búsqueda con una consulta ampliada hecha sólo de términos de contenido.

use std::sync::Arc;
use tracing::debug;

use crate::embedding::content_terms;
use crate::error::QueryError;
use crate::models::ScoredChunk;
use crate::vector_store::{VectorIndex, DEFAULT_TOP_K};

pub const DEFAULT_BROADEN_MAX_TERMS: usize = 3;

/// Los términos con esta longitud o menos se descartan al ampliar.
pub const DEFAULT_MIN_TERM_CHARS: usize = 3;

pub const DEFAULT_STOP_WORDS: &[&str] = &[
    "what", "how", "when", "where", "why", "should", "would", "could", "will", "does", "doesn",
    "don", "isn", "aren", "wasn", "weren", "haven", "hasn", "hadn", "won", "can", "can't",
    "doesn't", "don't", "isn't", "aren't", "wasn't", "weren't", "haven't", "hasn't", "hadn't",
    "won't", "shouldn't", "wouldn't", "couldn't",
];

#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub top_k: usize,
    /// Distancia coseno máxima aceptada; `None` acepta cualquier resultado.
    pub max_distance: Option<f32>,
    pub broaden_max_terms: usize,
    pub min_term_chars: usize,
    pub stop_words: Vec<String>,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            max_distance: None,
            broaden_max_terms: DEFAULT_BROADEN_MAX_TERMS,
            min_term_chars: DEFAULT_MIN_TERM_CHARS,
            stop_words: DEFAULT_STOP_WORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Resultado de `retrieve`: chunks en orden de cercanía y, si se usó, la
/// consulta ampliada.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub chunks: Vec<ScoredChunk>,
    pub broadened_query: Option<String>,
}

#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    config: RetrieverConfig,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, config: RetrieverConfig) -> Self {
        Self { index, config }
    }

    pub async fn retrieve(&self, question: &str) -> Result<Retrieval, QueryError> {
        let chunks = self.search(question).await?;
        debug!("Búsqueda inicial: {} fuentes para '{}'", chunks.len(), question);
        if !chunks.is_empty() {
            return Ok(Retrieval {
                chunks,
                broadened_query: None,
            });
        }

        let Some(broadened) = broaden_query(question, &self.config) else {
            debug!("Sin términos de contenido para ampliar la búsqueda");
            return Ok(Retrieval::default());
        };

        let chunks = self.search(&broadened).await?;
        debug!(
            "Búsqueda ampliada con '{}': {} fuentes",
            broadened,
            chunks.len()
        );
        Ok(Retrieval {
            chunks,
            broadened_query: Some(broadened),
        })
    }

    async fn search(&self, text: &str) -> Result<Vec<ScoredChunk>, QueryError> {
        let lexical = self.index.requires_shared_term();
        let k = if lexical {
            self.index.len()
        } else {
            self.config.top_k
        };

        let mut results = self.index.search(text, k).await?;
        if let Some(max) = self.config.max_distance {
            results.retain(|r| r.distance <= max);
        }
        if lexical {
            let query_terms = content_terms(text);
            results.retain(|r| {
                content_terms(&r.chunk.content)
                    .iter()
                    .any(|t| query_terms.contains(t))
            });
            results.truncate(self.config.top_k);
        }
        Ok(results)
    }
}

/// Consulta ampliada: los primeros términos de contenido de la pregunta.
///
/// Minúsculas, separación por espacios, sin puntuación en los extremos y sin
/// stop words ni términos cortos. `None` si no queda ningún término.
pub fn broaden_query(question: &str, config: &RetrieverConfig) -> Option<String> {
    let lowered = question.to_lowercase().replace('\u{2019}', "'");
    let terms: Vec<&str> = lowered
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|t| t.chars().count() > config.min_term_chars)
        .filter(|t| !config.stop_words.iter().any(|s| s == t))
        .take(config.broaden_max_terms)
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}
