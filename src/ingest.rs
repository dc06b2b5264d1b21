//! Construcción de la base de conocimiento: corpus CSV → documentos →
//! chunks → índice vectorial, informando del progreso en el `Status` compartido.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, info};

use crate::{
    app_state::Status,
    chunker::Chunker,
    config::AppConfig,
    corpus,
    embedding,
    error::{IndexBuildError, InitError},
    llm::LlmManager,
    models::SourceRecord,
    rag::AnswerComposer,
    retriever::{Retriever, RetrieverConfig},
    vector_store::{IndexStats, VectorIndex},
};

/// Todo lo que necesita una sesión para responder consultas.
pub struct KnowledgeBase {
    pub sources: Vec<SourceRecord>,
    pub composer: Arc<AnswerComposer>,
    pub stats: IndexStats,
}

impl std::fmt::Display for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} fuentes, {} chunks indexados ({} dimensiones, proveedor '{}').",
            self.sources.len(),
            self.stats.chunks,
            self.stats.dimensions,
            self.stats.embedding_provider
        )
    }
}

fn report(status: &Mutex<Status>, message: impl Into<String>, progress: f32) {
    let mut status = status.lock().unwrap_or_else(PoisonError::into_inner);
    status.message = message.into();
    status.progress = progress;
}

/// Carga el corpus, lo trocea y construye el índice desde cero.
pub async fn build_knowledge_base(
    cfg: &AppConfig,
    status: Arc<Mutex<Status>>,
) -> Result<KnowledgeBase, InitError> {
    report(&status, format!("Cargando corpus {}...", cfg.corpus_path.display()), 0.05);
    let entries = corpus::load_corpus(&cfg.corpus_path)?;
    let documents = corpus::build_documents(&entries);

    report(&status, format!("Troceando {} documentos...", documents.len()), 0.2);
    let chunker = Chunker::new(cfg.chunk_size, cfg.chunk_overlap)
        .map_err(|e| IndexBuildError::Chunker(e.to_string()))?;
    let chunks = chunker.split_all(&documents);
    info!("{} documentos troceados en {} chunks", documents.len(), chunks.len());

    let embedder = embedding::provider_from_config(cfg)?;
    report(
        &status,
        format!(
            "Calculando embeddings de {} chunks con '{}'...",
            chunks.len(),
            embedder.name()
        ),
        0.4,
    );
    let index = match VectorIndex::build(chunks, embedder).await {
        Ok(index) => Arc::new(index),
        Err(err) => {
            error!("Error construyendo el índice: {}", err);
            return Err(err.into());
        }
    };
    let stats = index.stats();

    report(&status, "Preparando el compositor de respuestas...", 0.9);
    let retriever = Retriever::new(
        index,
        RetrieverConfig {
            top_k: cfg.top_k,
            max_distance: cfg.max_distance,
            broaden_max_terms: cfg.broaden_max_terms,
            ..RetrieverConfig::default()
        },
    );
    let composer = AnswerComposer::new(retriever, LlmManager::from_config(cfg));

    Ok(KnowledgeBase {
        sources: entries.into_iter().map(|e| e.record).collect(),
        composer: Arc::new(composer),
        stats,
    })
}
