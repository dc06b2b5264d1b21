use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use url::Url;

use fitscience_coach::{
    chunker::Chunker,
    corpus,
    embedding::HashingEmbedder,
    error::{BackendError, QuizError},
    llm::{GenerationBackend, GenerationRequest, LlmManager},
    models::QueryOutcome,
    quiz,
    rag::AnswerComposer,
    retriever::{Retriever, RetrieverConfig},
    vector_store::VectorIndex,
};

/// Servidor falso que habla los protocolos de Ollama y OpenAI.
#[derive(Clone, Default)]
struct Fake {
    models: Vec<String>,
    replies: Arc<Mutex<VecDeque<(StatusCode, String)>>>,
    requests: Arc<Mutex<Vec<Value>>>,
    auth: Arc<Mutex<Vec<String>>>,
}

impl Fake {
    fn with_models(models: &[&str]) -> Self {
        Self {
            models: models.iter().map(|m| m.to_string()).collect(),
            ..Self::default()
        }
    }

    fn reply(&self, status: StatusCode, text: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back((status, text.to_string()));
    }

    fn next_reply(&self) -> (StatusCode, String) {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((StatusCode::OK, "default reply".to_string()))
    }

    fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    fn record_auth(&self, headers: &HeaderMap) {
        if let Some(value) = headers.get("authorization") {
            self.auth
                .lock()
                .unwrap()
                .push(value.to_str().unwrap().to_string());
        }
    }
}

async fn tags(State(fake): State<Fake>) -> Json<Value> {
    let models: Vec<_> = fake.models.iter().map(|m| json!({ "name": m })).collect();
    Json(json!({ "models": models }))
}

async fn generate(State(fake): State<Fake>, Json(body): Json<Value>) -> Response {
    fake.requests.lock().unwrap().push(body);
    match fake.next_reply() {
        (StatusCode::OK, text) => Json(json!({ "response": text, "done": true })).into_response(),
        (status, text) => (status, text).into_response(),
    }
}

async fn models(State(fake): State<Fake>, headers: HeaderMap) -> Json<Value> {
    fake.record_auth(&headers);
    let data: Vec<_> = fake.models.iter().map(|m| json!({ "id": m })).collect();
    Json(json!({ "object": "list", "data": data }))
}

async fn chat(State(fake): State<Fake>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    fake.record_auth(&headers);
    fake.requests.lock().unwrap().push(body);
    match fake.next_reply() {
        (StatusCode::OK, text) => Json(json!({
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": text } }]
        }))
        .into_response(),
        (status, text) => (status, text).into_response(),
    }
}

async fn serve(fake: Fake) -> Url {
    let app = Router::new()
        .route("/api/tags", get(tags))
        .route("/api/generate", post(generate))
        .route("/v1/models", get(models))
        .route("/v1/chat/completions", post(chat))
        .with_state(fake);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{addr}")).unwrap()
}

fn local(url: Url) -> LlmManager {
    LlmManager::new(
        GenerationBackend::LocalEndpoint {
            url,
            model: "llama3.2:1b".to_string(),
        },
        Duration::from_secs(2),
        Duration::from_secs(5),
    )
}

fn request() -> GenerationRequest {
    GenerationRequest {
        system: "You are FitScience Coach.".to_string(),
        user: "How much protein?".to_string(),
    }
}

async fn composer(llm: LlmManager) -> AnswerComposer {
    let csv = "Title,URL,Type,Relevance,Notes,Content\n\
        Protein Requirements,https://example.org/protein,Academic Paper,High,ISSN,\
        Protein needs for active adults range from 1.6 to 2.2 grams per kilogram of body weight each day.\n";
    let entries = corpus::load_corpus_from_reader(csv.as_bytes()).unwrap();
    let chunks = Chunker::default().split_all(&corpus::build_documents(&entries));
    let index = VectorIndex::build(chunks, Arc::new(HashingEmbedder::default()))
        .await
        .unwrap();
    let retriever = Retriever::new(
        Arc::new(index),
        RetrieverConfig {
            max_distance: Some(0.99),
            ..RetrieverConfig::default()
        },
    );
    AnswerComposer::new(retriever, llm)
}

fn quiz_json() -> String {
    let question = json!({
        "question": "How much protein per kg?",
        "options": ["0.5 g", "1.6-2.2 g", "5 g"],
        "answer_index": 1,
        "explanation": "ISSN position stand"
    });
    json!({ "topic": "Protein", "questions": [question, question, question] }).to_string()
}

#[tokio::test]
async fn local_endpoint_receives_non_streaming_request_with_fixed_options() {
    let fake = Fake::with_models(&["llama3.2:1b"]);
    fake.reply(StatusCode::OK, "  Eat about 1.6 g/kg.  ");
    let llm = local(serve(fake.clone()).await);

    let text = llm.generate(&request()).await.unwrap();
    assert_eq!(text, "Eat about 1.6 g/kg.");

    let sent = &fake.requests()[0];
    assert_eq!(sent["model"], "llama3.2:1b");
    assert_eq!(sent["stream"], false);
    assert_eq!(sent["options"]["temperature"], 0.7);
    assert_eq!(sent["options"]["top_p"], 0.9);
    assert_eq!(sent["options"]["max_tokens"], 512);
    let prompt = sent["prompt"].as_str().unwrap();
    assert!(prompt.starts_with("You are FitScience Coach."));
    assert!(prompt.ends_with("How much protein?"));
}

#[tokio::test]
async fn missing_model_fails_the_availability_check_without_generating() {
    let fake = Fake::with_models(&["mistral:7b"]);
    let llm = local(serve(fake.clone()).await);

    let err = llm.generate(&request()).await.unwrap_err();
    assert!(matches!(err, BackendError::ModelMissing(ref m) if m == "llama3.2:1b"));
    assert!(fake.requests().is_empty());
}

#[tokio::test]
async fn non_200_is_a_status_error() {
    let fake = Fake::with_models(&["llama3.2:1b"]);
    fake.reply(StatusCode::INTERNAL_SERVER_ERROR, "boom");
    let llm = local(serve(fake).await);

    match llm.generate(&request()).await {
        Err(BackendError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("se esperaba un error de estado, llegó {other:?}"),
    }
}

#[tokio::test]
async fn hosted_endpoint_uses_bearer_auth_and_chat_messages() {
    let fake = Fake::with_models(&["gpt-test"]);
    fake.reply(StatusCode::OK, "Hosted answer");
    let base = serve(fake.clone()).await.join("v1").unwrap();
    let llm = LlmManager::new(
        GenerationBackend::HostedEndpoint {
            url: base,
            api_key: "test-key".to_string(),
            model: "gpt-test".to_string(),
        },
        Duration::from_secs(2),
        Duration::from_secs(5),
    );

    assert_eq!(llm.generate(&request()).await.unwrap(), "Hosted answer");

    let auth = fake.auth.lock().unwrap().clone();
    assert_eq!(auth, vec!["Bearer test-key", "Bearer test-key"]);
    let sent = &fake.requests()[0];
    assert_eq!(sent["model"], "gpt-test");
    assert_eq!(sent["messages"][0]["role"], "system");
    assert_eq!(sent["messages"][1]["content"], "How much protein?");
    assert_eq!(sent["temperature"], 0.7);
}

#[tokio::test]
async fn composer_returns_generated_text_with_sources() {
    let fake = Fake::with_models(&["llama3.2:1b"]);
    fake.reply(StatusCode::OK, "Aim for 1.6-2.2 g/kg.\n\nSources: [1]");
    let composer = composer(local(serve(fake.clone()).await)).await;

    let answer = composer.answer("How much protein do I need?").await.unwrap();
    assert_eq!(answer.answer, "Aim for 1.6-2.2 g/kg.\n\nSources: [1]");
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].title, "Protein Requirements");

    let prompt = fake.requests()[0]["prompt"].as_str().unwrap().to_string();
    assert!(prompt.contains("[1] Protein Requirements | https://example.org/protein | ISSN"));
    assert!(prompt.contains("User Question: How much protein do I need?"));
}

#[tokio::test]
async fn composer_falls_back_when_backend_errors() {
    let fake = Fake::with_models(&["llama3.2:1b"]);
    fake.reply(StatusCode::SERVICE_UNAVAILABLE, "overloaded");
    let composer = composer(local(serve(fake).await)).await;

    let answer = composer.answer("How much protein do I need?").await.unwrap();
    assert!(answer.answer.contains("1.6 to 2.2 grams per kilogram"));
    assert!(answer.answer.contains("• Protein Requirements"));
    assert_eq!(answer.sources.len(), 1);
}

#[tokio::test]
async fn study_guide_runs_through_the_query_pipeline() {
    let fake = Fake::with_models(&["llama3.2:1b"]);
    fake.reply(StatusCode::OK, "## Protein study guide\n\nSources: [1]");
    let composer = composer(local(serve(fake.clone()).await)).await;

    match composer.study_guide("Protein Requirements").await {
        QueryOutcome::Answered(answer) => {
            assert_eq!(answer.answer, "## Protein study guide\n\nSources: [1]");
            assert_eq!(answer.sources.len(), 1);
            assert_eq!(answer.sources[0].title, "Protein Requirements");
        }
        other => panic!("se esperaba una respuesta, llegó {other:?}"),
    }

    let prompt = fake.requests()[0]["prompt"].as_str().unwrap().to_string();
    assert!(prompt.contains("User Question: Create a comprehensive study guide for: Protein Requirements"));

    let empty = composer.study_guide("   ").await;
    assert!(matches!(empty, QueryOutcome::Failed { .. }));
    assert_eq!(fake.requests().len(), 1);
}

#[tokio::test]
async fn quiz_is_retried_once_after_invalid_output() {
    let fake = Fake::with_models(&["llama3.2:1b"]);
    fake.reply(StatusCode::OK, "Sure! Here are three questions...");
    fake.reply(StatusCode::OK, &format!("```json\n{}\n```", quiz_json()));
    let composer = composer(local(serve(fake.clone()).await)).await;

    let quiz = quiz::generate_quiz(&composer, "Protein Requirements").await.unwrap();
    assert_eq!(quiz.questions.len(), 3);
    assert_eq!(quiz.questions[0].answer_index, 1);

    let requests = fake.requests();
    assert_eq!(requests.len(), 2);
    let retry_prompt = requests[1]["prompt"].as_str().unwrap();
    assert!(retry_prompt.contains("ONLY the JSON object"));
    assert!(retry_prompt.contains("test understanding of: Protein Requirements"));
}

#[tokio::test]
async fn quiz_gives_up_after_two_invalid_outputs() {
    let fake = Fake::with_models(&["llama3.2:1b"]);
    fake.reply(StatusCode::OK, "not json");
    fake.reply(StatusCode::OK, "{\"topic\": \"Protein\", \"questions\": []}");
    let composer = composer(local(serve(fake.clone()).await)).await;

    let err = quiz::generate_quiz(&composer, "Protein Requirements").await.unwrap_err();
    assert!(matches!(err, QuizError::Backend(BackendError::Malformed(_))));
    assert_eq!(fake.requests().len(), 2);
}
