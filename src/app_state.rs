use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::{
    config::AppConfig,
    error::QueryError,
    ingest::{self, KnowledgeBase},
    vector_store::IndexStats,
};

/// Estado de la base de conocimiento de la sesión.
#[derive(Clone)]
pub enum KnowledgeState {
    Building,
    Ready(Arc<KnowledgeBase>),
    Failed(String),
}

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub knowledge: Arc<RwLock<KnowledgeState>>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexStats>,
}

impl AppState {
    pub fn new(config: AppConfig, shutdown_sender: oneshot::Sender<()>) -> Self {
        Self {
            config,
            knowledge: Arc::new(RwLock::new(KnowledgeState::Building)),
            status: Arc::new(Mutex::new(Status {
                is_busy: false,
                message: "Servidor listo.".to_string(),
                progress: 0.0,
                index: None,
            })),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
        }
    }

    /// La base de conocimiento activa, o `NotInitialized` si aún no hay una.
    pub fn knowledge_base(&self) -> Result<Arc<KnowledgeBase>, QueryError> {
        let knowledge = self.knowledge.read().unwrap_or_else(PoisonError::into_inner);
        match &*knowledge {
            KnowledgeState::Ready(kb) => Ok(kb.clone()),
            KnowledgeState::Building => Err(QueryError::NotInitialized(
                "el índice se está construyendo".to_string(),
            )),
            KnowledgeState::Failed(reason) => Err(QueryError::NotInitialized(reason.clone())),
        }
    }

    pub fn status_snapshot(&self) -> Status {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reconstruye la base de conocimiento desde cero en segundo plano.
    ///
    /// Devuelve `false` si ya había una construcción en curso. Mientras dura,
    /// la base anterior (si existe) sigue atendiendo consultas.
    pub fn spawn_rebuild(&self) -> bool {
        {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            if status.is_busy {
                return false;
            }
            status.is_busy = true;
            status.message = "Iniciando indexación...".to_string();
            status.progress = 0.0;
        }

        let state = self.clone();
        tokio::spawn(async move {
            let result = ingest::build_knowledge_base(&state.config, state.status.clone()).await;

            let mut status = state.status.lock().unwrap_or_else(PoisonError::into_inner);
            status.is_busy = false;
            status.progress = 0.0;
            let mut knowledge = state.knowledge.write().unwrap_or_else(PoisonError::into_inner);
            match result {
                Ok(kb) => {
                    status.message = format!("¡Indexación completada! {}", kb);
                    status.index = Some(kb.stats.clone());
                    info!("✅ Base de conocimiento lista: {}", kb);
                    *knowledge = KnowledgeState::Ready(Arc::new(kb));
                }
                Err(err) => {
                    status.message = format!("Error en la indexación: {}", err);
                    error!("Error construyendo la base de conocimiento: {}", err);
                    // Una reconstrucción fallida no retira la base que ya funcionaba.
                    if !matches!(*knowledge, KnowledgeState::Ready(_)) {
                        *knowledge = KnowledgeState::Failed(err.to_string());
                    }
                }
            }
        });
        true
    }
}
