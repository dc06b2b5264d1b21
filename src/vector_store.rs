//! Índice vectorial en memoria para los chunks del corpus.
//!
//! API pública:
//!   - `VectorIndex::build(chunks, embedder)`
//!   - `VectorIndex::search(&str, usize)`.
//!
//! El índice es inmutable tras construirse: las búsquedas concurrentes sólo
//! necesitan `&self`. Para cambiar el corpus se construye un índice nuevo.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::embedding::EmbeddingProvider;
use crate::error::{IndexBuildError, QueryError};
use crate::models::{Chunk, ScoredChunk};

pub const DEFAULT_TOP_K: usize = 8;

const EMBED_BATCH_SIZE: usize = 32;

struct IndexEntry {
    vector: Vec<f32>,
    norm: f32,
    chunk: Arc<Chunk>,
}

/// Resumen del índice para `/api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub chunks: usize,
    pub documents: usize,
    pub dimensions: usize,
    pub embedding_provider: String,
    pub built_at: DateTime<Utc>,
}

pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    dimensions: usize,
    embedder: Arc<dyn EmbeddingProvider>,
    built_at: DateTime<Utc>,
}

impl VectorIndex {
    /// Calcula el embedding de cada chunk y guarda los pares (vector, chunk)
    /// en orden de inserción.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, IndexBuildError> {
        if chunks.is_empty() {
            return Err(IndexBuildError::EmptyCorpus);
        }

        let dimensions = embedder.dimensions();
        let mut entries = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = embedder.embed_batch(&texts).await?;

            if vectors.len() != batch.len() {
                return Err(IndexBuildError::CountMismatch {
                    embeddings: vectors.len(),
                    chunks: batch.len(),
                });
            }

            for (chunk, vector) in batch.iter().zip(vectors) {
                if vector.len() != dimensions {
                    return Err(IndexBuildError::DimensionMismatch {
                        expected: dimensions,
                        actual: vector.len(),
                    });
                }
                entries.push(IndexEntry {
                    norm: l2_norm(&vector),
                    vector,
                    chunk: Arc::new(chunk.clone()),
                });
            }
            debug!("Embeddings calculados: {}/{}", entries.len(), chunks.len());
        }

        info!(
            "✅ Índice vectorial construido con {} chunks ({} dimensiones, proveedor '{}')",
            entries.len(),
            dimensions,
            embedder.name()
        );

        Ok(Self {
            entries,
            dimensions,
            embedder,
            built_at: Utc::now(),
        })
    }

    /// Los `k` chunks más cercanos a `query_text`, de menor a mayor distancia
    /// coseno. Los empates conservan el orden de inserción.
    pub async fn search(&self, query_text: &str, k: usize) -> Result<Vec<ScoredChunk>, QueryError> {
        let query = self.embedder.embed(query_text).await?;
        if query.len() != self.dimensions {
            return Err(QueryError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        Ok(self.search_vector(&query, k))
    }

    /// Búsqueda exacta (fuerza bruta) a partir de un vector ya calculado.
    pub fn search_vector(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let query_norm = l2_norm(query);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_distance(query, query_norm, &entry.vector, entry.norm)))
            .collect();

        // sort_by es estable: a igual distancia gana el orden de inserción
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored
            .into_iter()
            .take(k)
            .map(|(i, distance)| ScoredChunk {
                chunk: self.entries[i].chunk.clone(),
                distance,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Ver [`EmbeddingProvider::requires_shared_term`].
    pub fn requires_shared_term(&self) -> bool {
        self.embedder.requires_shared_term()
    }

    pub fn stats(&self) -> IndexStats {
        let documents: HashSet<&str> = self
            .entries
            .iter()
            .map(|e| e.chunk.document_id.as_str())
            .collect();
        IndexStats {
            chunks: self.entries.len(),
            documents: documents.len(),
            dimensions: self.dimensions,
            embedding_provider: self.embedder.name().to_string(),
            built_at: self.built_at,
        }
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// `1 - coseno`, en [0, 2]. Un vector nulo se trata como ortogonal (1.0).
fn cosine_distance(a: &[f32], norm_a: f32, b: &[f32], norm_b: f32) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    1.0 - dot / (norm_a * norm_b)
}
