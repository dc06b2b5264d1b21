//! Taxonomía de errores del núcleo RAG y de las calculadoras.
//!
//! Los errores de arranque (`CorpusLoadError`, `IndexBuildError`) son fatales
//! para la sesión. `BackendError` nunca llega al llamador de `query`: el
//! compositor lo convierte siempre en la respuesta de reserva.

use thiserror::Error;

/// El fichero de corpus no existe, no se puede leer o está mal formado.
#[derive(Debug, Error)]
pub enum CorpusLoadError {
    #[error("no se pudo abrir el corpus '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("faltan columnas obligatorias en el corpus: {}", missing.join(", "))]
    MissingColumns { missing: Vec<String> },

    #[error("fila {row} del corpus mal formada: {message}")]
    MalformedRow { row: usize, message: String },

    #[error("error leyendo el CSV del corpus: {0}")]
    Csv(#[from] csv::Error),
}

/// Fallo al construir el índice vectorial.
#[derive(Debug, Error)]
pub enum IndexBuildError {
    #[error("el corpus no produjo ningún chunk")]
    EmptyCorpus,

    #[error("proveedor de embeddings '{provider}' no disponible: {message}")]
    EmbeddingUnavailable { provider: String, message: String },

    #[error("dimensión de embedding inesperada: se esperaba {expected}, se obtuvo {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("número de embeddings ({embeddings}) distinto al número de chunks ({chunks})")]
    CountMismatch { embeddings: usize, chunks: usize },

    #[error("configuración de troceado no válida: {0}")]
    Chunker(String),
}

/// Fallo de un proveedor de embeddings.
#[derive(Debug, Clone, Error)]
#[error("embeddings ({provider}): {message}")]
pub struct EmbeddingError {
    pub provider: String,
    pub message: String,
}

impl EmbeddingError {
    pub fn new(provider: impl Into<String>, message: impl ToString) -> Self {
        Self {
            provider: provider.into(),
            message: message.to_string(),
        }
    }
}

impl From<EmbeddingError> for IndexBuildError {
    fn from(err: EmbeddingError) -> Self {
        IndexBuildError::EmbeddingUnavailable {
            provider: err.provider,
            message: err.message,
        }
    }
}

/// Cualquier fallo del arranque del sistema.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Corpus(#[from] CorpusLoadError),

    #[error(transparent)]
    Index(#[from] IndexBuildError),
}

/// El backend de generación no está disponible o respondió algo inservible.
///
/// Todas las variantes se tratan igual en el compositor: se degrada a la
/// respuesta plantilla.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend de generación deshabilitado")]
    Disabled,

    #[error("backend inaccesible: {0}")]
    Unreachable(String),

    #[error("tiempo de espera agotado contactando con el backend")]
    Timeout,

    #[error("el backend respondió con estado {status}: {body}")]
    Status { status: u16, body: String },

    #[error("el modelo '{0}' no está disponible en el backend")]
    ModelMissing(String),

    #[error("respuesta del backend mal formada: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_decode() {
            BackendError::Malformed(err.to_string())
        } else {
            BackendError::Unreachable(err.to_string())
        }
    }
}

/// Entrada no reconocida en las calculadoras.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("valor no válido para {field}: '{value}'. Valores aceptados: {}", accepted.join(", "))]
pub struct InvalidInputError {
    pub field: &'static str,
    pub value: String,
    pub accepted: Vec<String>,
}

/// Fallo inesperado durante la recuperación o la generación de una consulta.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("la base de conocimiento no está inicializada: {0}")]
    NotInitialized(String),

    #[error("la pregunta está vacía")]
    EmptyQuestion,

    #[error("no se pudo generar el embedding de la consulta: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("dimensión del embedding de la consulta ({actual}) distinta a la del índice ({expected})")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Fallo al generar un cuestionario.
#[derive(Debug, Error)]
pub enum QuizError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("cuestionario no disponible: {0}")]
    Backend(#[from] BackendError),
}
