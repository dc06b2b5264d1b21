//! Modelos de dominio (fuentes del corpus, documentos, chunks y respuestas).

use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Tipo de fuente tal y como aparece en la columna `Type` del corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceType {
    AcademicPaper,
    Podcast,
    GovernmentResource,
    /// Cualquier otra etiqueta; se conserva el texto original.
    Other(String),
}

impl SourceType {
    pub fn parse(label: &str) -> Self {
        let normalized: String = label
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "academicpaper" | "paper" | "study" | "metaanalysis" => Self::AcademicPaper,
            "podcast" => Self::Podcast,
            "governmentresource" | "government" | "governmentguideline" => {
                Self::GovernmentResource
            }
            _ => Self::Other(label.trim().to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::AcademicPaper => "Academic Paper",
            Self::Podcast => "Podcast",
            Self::GovernmentResource => "Government Resource",
            Self::Other(label) => label,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for SourceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Una fila del corpus. Inmutable durante la sesión.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRecord {
    pub title: String,
    pub url: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub relevance: String,
    pub notes: String,
}

/// Texto completo asociado a una fuente, antes de trocearlo.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub source: Arc<SourceRecord>,
}

/// Trozo de un documento: la unidad que se indexa y se recupera.
///
/// `start` es el desplazamiento (en caracteres) dentro del documento y
/// `overlap` cuántos de sus primeros caracteres repiten el final del chunk
/// anterior. Quitando ese prefijo a cada chunk y concatenando se recupera el
/// documento original.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub index: usize,
    pub start: usize,
    pub overlap: usize,
    pub content: String,
    pub source: Arc<SourceRecord>,
}

impl Chunk {
    /// Parte del chunk que no repite contenido del chunk anterior.
    pub fn fresh_content(&self) -> &str {
        match self.content.char_indices().nth(self.overlap) {
            Some((byte, _)) => &self.content[byte..],
            None => "",
        }
    }
}

/// Chunk devuelto por una búsqueda junto a su distancia a la consulta.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<Chunk>,
    pub distance: f32,
}

/// Metadatos de una fuente citada en una respuesta.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub title: String,
    pub url: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub relevance: String,
    pub notes: String,
    pub content_preview: String,
}

impl SourceSummary {
    pub const PREVIEW_CHARS: usize = 200;

    pub fn from_chunk(chunk: &Chunk) -> Self {
        let source = &chunk.source;
        Self {
            title: source.title.clone(),
            url: source.url.clone(),
            source_type: source.source_type.label().to_string(),
            relevance: source.relevance.clone(),
            notes: source.notes.clone(),
            content_preview: format!("{}...", truncate_chars(&chunk.content, Self::PREVIEW_CHARS)),
        }
    }
}

/// Respuesta final: texto y fuentes en orden de recuperación.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceSummary>,
}

/// Resultado del interfaz de consulta: nunca un error sin capturar.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutcome {
    Answered(Answer),
    Failed { error: String },
}

impl QueryOutcome {
    pub fn failed(error: impl fmt::Display) -> Self {
        Self::Failed {
            error: error.to_string(),
        }
    }
}

/// Prefijo de `text` con como mucho `max` caracteres, sin partir code points.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_type_accepts_spacing_and_case_variants() {
        assert_eq!(SourceType::parse("Academic Paper"), SourceType::AcademicPaper);
        assert_eq!(SourceType::parse("academic_paper"), SourceType::AcademicPaper);
        assert_eq!(SourceType::parse("PODCAST"), SourceType::Podcast);
        assert_eq!(
            SourceType::parse("Government Resource"),
            SourceType::GovernmentResource
        );
        assert_eq!(
            SourceType::parse("YouTube Channel"),
            SourceType::Other("YouTube Channel".into())
        );
    }

    #[test]
    fn truncate_chars_respects_multibyte_boundaries() {
        assert_eq!(truncate_chars("ñandú", 3), "ñan");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn query_outcome_serializes_untagged() {
        let failed = serde_json::to_value(QueryOutcome::failed("boom")).unwrap();
        assert_eq!(failed, serde_json::json!({ "error": "boom" }));

        let answered = serde_json::to_value(QueryOutcome::Answered(Answer {
            answer: "hola".into(),
            sources: vec![],
        }))
        .unwrap();
        assert_eq!(answered, serde_json::json!({ "answer": "hola", "sources": [] }));
    }
}
