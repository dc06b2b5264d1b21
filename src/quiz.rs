//! Generación de cuestionarios de repaso sobre una fuente del corpus.
//!
//! El backend recibe el esquema JSON del cuestionario y el contexto
//! recuperado. La respuesta se valida antes de entregarla; si no es válida se
//! reintenta una vez con un prompt más estricto.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BackendError, QuizError};
use crate::llm::GenerationRequest;
use crate::rag::{build_context, AnswerComposer};

pub const QUIZ_QUESTIONS: usize = 3;

const MIN_OPTIONS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QuizQuestion {
    pub question: String,
    /// Opciones de respuesta, al menos dos.
    pub options: Vec<String>,
    /// Índice (desde 0) de la opción correcta dentro de `options`.
    pub answer_index: usize,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Quiz {
    pub topic: String,
    pub questions: Vec<QuizQuestion>,
}

/// Pide al backend un cuestionario de `QUIZ_QUESTIONS` preguntas sobre `title`.
pub async fn generate_quiz(composer: &AnswerComposer, title: &str) -> Result<Quiz, QuizError> {
    let title = title.trim();
    let retrieval = composer.retriever().retrieve(title).await?;
    let context = build_context(&retrieval.chunks);
    let schema = serde_json::to_string_pretty(&schemars::schema_for!(Quiz))
        .map_err(|e| BackendError::Malformed(e.to_string()))?;

    let mut last_error = String::new();
    for attempt in 1..=2 {
        let request = quiz_prompt(title, &context, &schema, attempt > 1);
        let raw = composer.llm().generate(&request).await?;
        match parse_quiz(&raw) {
            Ok(quiz) => {
                info!("📝 Cuestionario generado para '{}' (intento {})", title, attempt);
                return Ok(quiz);
            }
            Err(reason) => {
                warn!("Cuestionario no válido para '{}' (intento {}): {}", title, attempt, reason);
                last_error = reason;
            }
        }
    }
    Err(BackendError::Malformed(last_error).into())
}

fn quiz_prompt(title: &str, context: &str, schema: &str, strict: bool) -> GenerationRequest {
    let mut system = format!(
        "You are FitScience Coach. Create {QUIZ_QUESTIONS} quiz questions to test understanding of: {title}\n\n\
         Answer with a single JSON object that matches this JSON Schema:\n{schema}\n\n\
         Each question needs at least {MIN_OPTIONS} options and `answer_index` must point at the correct option."
    );
    if strict {
        system.push_str(
            "\n\nYour previous answer was not valid. Return ONLY the JSON object, \
             with no markdown fences and no commentary.",
        );
    }
    let context = if context.is_empty() {
        "(no matching sources in the knowledge base)"
    } else {
        context
    };
    GenerationRequest {
        system,
        user: format!("Source material:\n{context}\n\nTopic: {title}"),
    }
}

/// Extrae y valida el JSON del cuestionario devuelto por el backend.
pub fn parse_quiz(raw: &str) -> Result<Quiz, String> {
    let json = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let quiz: Quiz = serde_json::from_str(json).map_err(|e| format!("JSON no válido: {e}"))?;

    if quiz.questions.len() != QUIZ_QUESTIONS {
        return Err(format!(
            "se esperaban {QUIZ_QUESTIONS} preguntas, llegaron {}",
            quiz.questions.len()
        ));
    }
    for (i, q) in quiz.questions.iter().enumerate() {
        if q.question.trim().is_empty() {
            return Err(format!("la pregunta {} está vacía", i + 1));
        }
        if q.options.len() < MIN_OPTIONS {
            return Err(format!("la pregunta {} tiene menos de {MIN_OPTIONS} opciones", i + 1));
        }
        if q.answer_index >= q.options.len() {
            return Err(format!(
                "la pregunta {} apunta a la opción {} de {}",
                i + 1,
                q.answer_index,
                q.options.len()
            ));
        }
    }
    Ok(quiz)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quiz_json(questions: usize, answer_index: usize) -> String {
        let qs: Vec<_> = (0..questions)
            .map(|i| {
                json!({
                    "question": format!("Question {i}?"),
                    "options": ["a", "b", "c"],
                    "answer_index": answer_index,
                    "explanation": "because"
                })
            })
            .collect();
        json!({ "topic": "Protein", "questions": qs }).to_string()
    }

    #[test]
    fn accepts_valid_quiz_inside_fences() {
        let raw = format!("```json\n{}\n```", quiz_json(3, 2));
        let quiz = parse_quiz(&raw).unwrap();
        assert_eq!(quiz.topic, "Protein");
        assert_eq!(quiz.questions.len(), 3);
        assert_eq!(quiz.questions[0].answer_index, 2);
    }

    #[test]
    fn rejects_wrong_question_count() {
        let err = parse_quiz(&quiz_json(2, 0)).unwrap_err();
        assert!(err.contains("3 preguntas"));
    }

    #[test]
    fn rejects_out_of_range_answer() {
        assert!(parse_quiz(&quiz_json(3, 3)).is_err());
    }

    #[test]
    fn rejects_prose() {
        assert!(parse_quiz("Sure! Here is your quiz.").is_err());
    }

    #[test]
    fn prompt_embeds_schema_and_topic() {
        let schema = serde_json::to_string(&schemars::schema_for!(Quiz)).unwrap();
        assert!(schema.contains("answer_index"));
        let request = quiz_prompt("Sleep and recovery", "", &schema, true);
        assert!(request.system.contains("test understanding of: Sleep and recovery"));
        assert!(request.system.contains("answer_index"));
        assert!(request.system.contains("ONLY the JSON object"));
        assert!(request.user.contains("no matching sources"));
    }
}
