//! Consulta RAG sobre el índice vectorial del corpus.
//!
//! Flujo:
//!   1. Recuperación (con búsqueda ampliada si la directa no encuentra nada).
//!   2. Construcción del bloque de contexto con citas numeradas.
//!   3. Generación con el backend configurado.
//!   4. Si el backend no está o falla, respuesta plantilla determinista.
//!   5. Siempre se devuelven los metadatos de todas las fuentes recuperadas.

use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::error::QueryError;
use crate::llm::{GenerationRequest, LlmManager};
use crate::models::{truncate_chars, Answer, QueryOutcome, ScoredChunk, SourceSummary};
use crate::retriever::Retriever;

/// Caracteres de cada chunk que entran en el contexto del prompt.
pub const CONTEXT_CHARS_PER_CHUNK: usize = 800;

const FALLBACK_MAX_PASSAGES: usize = 2;
const FALLBACK_PASSAGE_CHARS: usize = 400;
const SIGNATURE_CHARS: usize = 150;
const MIN_SIGNATURE_CHARS: usize = 30;

pub const STUDY_GUIDE_PREFIX: &str = "Create a comprehensive study guide for: ";

pub const NO_MATCH_MESSAGE: &str = "\
I couldn't find anything in my knowledge base that matches your question, and no generation \
backend is connected to answer from general fitness knowledge.

**To get AI-powered answers:**
• Install Ollama: `curl -fsSL https://ollama.com/install.sh | sh`
• Pull the model: `ollama pull llama3.2:1b`
• Start it: `ollama serve`
• Or set `GENERATION_BACKEND=openai` / `groq` with an API key, then restart the coach";

const SYSTEM_PROMPT: &str = "\
You are FitScience Coach, a specialized fitness and nutrition expert. You have access to curated \
research sources AND general fitness knowledge.

Always provide a comprehensive answer that combines both sources of information. \
Be conversational, practical, and encouraging.";

const ANSWER_INSTRUCTIONS: &str = "\
Instructions:
1. Provide a helpful, comprehensive answer using both the research sources above AND your general knowledge
2. Be conversational and encouraging
3. Give practical, actionable advice
4. At the end, add a 'Sources' section listing only the research sources from the provided context that you actually used";

pub struct AnswerComposer {
    retriever: Retriever,
    llm: LlmManager,
}

impl AnswerComposer {
    pub fn new(retriever: Retriever, llm: LlmManager) -> Self {
        Self { retriever, llm }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn llm(&self) -> &LlmManager {
        &self.llm
    }

    /// Interfaz de consulta: nunca propaga un error, lo devuelve como `{error}`.
    pub async fn query(&self, question: &str) -> QueryOutcome {
        match self.answer(question).await {
            Ok(answer) => QueryOutcome::Answered(answer),
            Err(err) => {
                warn!("La consulta falló: {err}");
                QueryOutcome::failed(format!("Error al procesar la consulta: {err}"))
            }
        }
    }

    /// Guía de estudio de un tema: una consulta normal con la pregunta fija
    /// "Create a comprehensive study guide for: <title>".
    pub async fn study_guide(&self, title: &str) -> QueryOutcome {
        let title = title.trim();
        if title.is_empty() {
            return QueryOutcome::failed(format!(
                "Error al procesar la consulta: {}",
                QueryError::EmptyQuestion
            ));
        }
        info!("📝 Generando guía de estudio para '{}'", title);
        self.query(&study_guide_question(title)).await
    }

    /// Recupera, genera (o degrada a plantilla) y devuelve respuesta + fuentes.
    pub async fn answer(&self, question: &str) -> Result<Answer, QueryError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }

        let retrieval = self.retriever.retrieve(question).await?;
        let chunks = retrieval.chunks;
        info!("📚 {} fuentes relevantes para: '{}'", chunks.len(), question);

        let context = build_context(&chunks);
        let prompt = build_prompt(question, &context);

        let answer = match self.llm.generate(&prompt).await {
            Ok(text) => text,
            Err(err) => {
                warn!("Backend de generación no disponible ({err}); usando respuesta plantilla");
                fallback_answer(&chunks)
            }
        };

        Ok(Answer {
            answer,
            sources: chunks
                .iter()
                .map(|c| SourceSummary::from_chunk(&c.chunk))
                .collect(),
        })
    }
}

/// Bloque de contexto: `[i] título | url | nota` seguido del texto del chunk.
pub fn build_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, scored)| {
            let source = &scored.chunk.source;
            let note = if source.notes.is_empty() {
                &source.relevance
            } else {
                &source.notes
            };
            format!(
                "[{}] {} | {} | {}\n{}",
                i + 1,
                source.title,
                source.url,
                note,
                truncate_chars(&scored.chunk.content, CONTEXT_CHARS_PER_CHUNK)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prompt(question: &str, context: &str) -> GenerationRequest {
    let context = if context.is_empty() {
        "(no matching sources in the knowledge base)"
    } else {
        context
    };
    GenerationRequest {
        system: SYSTEM_PROMPT.to_string(),
        user: format!(
            "Research Sources from my Knowledge Base:\n{context}\n\nUser Question: {question}\n\n{ANSWER_INSTRUCTIONS}\n\nAnswer:"
        ),
    }
}

/// Respuesta determinista cuando no hay backend de generación.
pub fn fallback_answer(chunks: &[ScoredChunk]) -> String {
    if chunks.is_empty() {
        return NO_MATCH_MESSAGE.to_string();
    }

    let mut seen = HashSet::new();
    let mut passages: Vec<String> = chunks
        .iter()
        .filter_map(|scored| {
            let content = &scored.chunk.content;
            let signature = truncate_chars(content, SIGNATURE_CHARS).trim();
            if signature.chars().count() > MIN_SIGNATURE_CHARS && seen.insert(signature) {
                Some(clean_passage(content))
            } else {
                None
            }
        })
        .take(FALLBACK_MAX_PASSAGES)
        .collect();
    if passages.is_empty() {
        passages.push(clean_passage(&chunks[0].chunk.content));
    }
    debug!("Respuesta plantilla con {} pasajes", passages.len());

    let mut titles: Vec<&str> = Vec::new();
    for scored in chunks {
        let title = scored.chunk.source.title.as_str();
        if !titles.contains(&title) {
            titles.push(title);
        }
    }

    format!(
        "I found relevant sources in my knowledge base, but no generation backend is connected, \
         so here is what they say:\n\n{}\n\n\
         **To get AI-powered answers:**\n\
         • Install Ollama: `curl -fsSL https://ollama.com/install.sh | sh`\n\
         • Pull the model: `ollama pull llama3.2:1b`\n\
         • Start it: `ollama serve`\n\
         • Or set `GENERATION_BACKEND=openai` / `groq` with an API key, then restart the coach\n\n\
         **Sources found in my knowledge base:**\n{}",
        passages.join("\n\n"),
        titles
            .iter()
            .map(|t| format!("• {t}"))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

pub fn study_guide_question(title: &str) -> String {
    format!("{STUDY_GUIDE_PREFIX}{title}")
}

/// Prefijo del pasaje tal cual, sin espacios en los extremos.
fn clean_passage(content: &str) -> String {
    truncate_chars(content, FALLBACK_PASSAGE_CHARS)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, SourceRecord, SourceType};
    use std::sync::Arc;

    fn scored(title: &str, notes: &str, content: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Arc::new(Chunk {
                id: format!("{title}-0"),
                document_id: title.to_string(),
                index: 0,
                start: 0,
                overlap: 0,
                content: content.to_string(),
                source: Arc::new(SourceRecord {
                    title: title.to_string(),
                    url: format!("https://example.org/{title}"),
                    source_type: SourceType::GovernmentResource,
                    relevance: "High".to_string(),
                    notes: notes.to_string(),
                }),
            }),
            distance: 0.1,
        }
    }

    const PROTEIN: &str = "Protein intake of 1.6-2.2 g/kg per day supports muscle protein synthesis.";

    #[test]
    fn context_lists_numbered_citations_in_order() {
        let chunks = vec![
            scored("Protein", "meta-analysis", PROTEIN),
            scored("Sleep", "", "Adults should sleep 7-9 hours for recovery and growth."),
        ];
        let context = build_context(&chunks);
        assert!(context.starts_with(
            "[1] Protein | https://example.org/Protein | meta-analysis\nProtein intake"
        ));
        // sin notas se usa la relevancia
        assert!(context.contains("\n\n[2] Sleep | https://example.org/Sleep | High\nAdults"));
    }

    #[test]
    fn context_truncates_long_chunks() {
        let long = "x".repeat(2000);
        let context = build_context(&[scored("Long", "n", &long)]);
        let body = context.lines().nth(1).unwrap();
        assert_eq!(body.len(), CONTEXT_CHARS_PER_CHUNK);
    }

    #[test]
    fn prompt_carries_question_and_context() {
        let prompt = build_prompt("How much protein?", "[1] ctx");
        assert!(prompt.system.contains("FitScience Coach"));
        assert!(prompt.user.contains("[1] ctx"));
        assert!(prompt.user.contains("User Question: How much protein?"));
        assert!(prompt.user.contains("'Sources' section"));
    }

    #[test]
    fn fallback_without_chunks_is_the_no_match_message() {
        assert_eq!(fallback_answer(&[]), NO_MATCH_MESSAGE);
    }

    #[test]
    fn fallback_deduplicates_passages_and_lists_titles() {
        let chunks = vec![
            scored("Protein A", "", PROTEIN),
            scored("Protein B", "", PROTEIN),
            scored("Sleep", "", "Adults should sleep 7-9 hours for recovery and growth."),
        ];
        let answer = fallback_answer(&chunks);
        assert_eq!(answer.matches("Protein intake of 1.6-2.2").count(), 1);
        assert!(answer.contains("Adults should sleep 7-9 hours"));
        assert!(answer.contains("• Protein A\n• Protein B\n• Sleep"));
        assert!(answer.contains("ollama serve"));
    }

    #[test]
    fn fallback_uses_first_chunk_when_all_are_too_short() {
        let chunks = vec![scored("Tiny", "", "Short\nnote.")];
        let answer = fallback_answer(&chunks);
        assert!(answer.contains("Short\nnote."));
    }

    #[test]
    fn fallback_quotes_multi_line_passages_verbatim() {
        let content = "Resistance training guidelines:\n- 2 to 3 sessions per week\n- 8 to 12 reps per set";
        let chunks = vec![scored("Training", "", content)];
        let answer = fallback_answer(&chunks);
        assert!(answer.contains(content));
    }

    #[test]
    fn study_guide_question_names_the_topic() {
        assert_eq!(
            study_guide_question("Vitamin D"),
            "Create a comprehensive study guide for: Vitamin D"
        );
    }
}
