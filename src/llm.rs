//! Acceso al backend de generación de texto.
//!
//! `GenerationBackend` describe a quién se habla (nadie, un Ollama local o un
//! endpoint compatible con OpenAI como OpenAI o Groq) y `LlmManager` expone un
//! único `generate` para todos ellos.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::AppConfig;
use crate::error::BackendError;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2:1b";

#[derive(Clone, PartialEq)]
pub enum GenerationBackend {
    Disabled,
    LocalEndpoint {
        url: Url,
        model: String,
    },
    HostedEndpoint {
        url: Url,
        api_key: String,
        model: String,
    },
}

// La clave de API no debe acabar en los logs.
impl fmt::Debug for GenerationBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "Disabled"),
            Self::LocalEndpoint { url, model } => f
                .debug_struct("LocalEndpoint")
                .field("url", &url.as_str())
                .field("model", model)
                .finish(),
            Self::HostedEndpoint { url, model, .. } => f
                .debug_struct("HostedEndpoint")
                .field("url", &url.as_str())
                .field("api_key", &"***")
                .field("model", model)
                .finish(),
        }
    }
}

/// Parámetros de muestreo, fijos para todas las respuestas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 512,
        }
    }
}

/// Prompt estructurado: rol de sistema + mensaje del usuario.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
}

impl GenerationRequest {
    /// Prompt plano para endpoints que sólo aceptan un texto.
    pub fn flattened(&self) -> String {
        format!("{}\n\n{}", self.system.trim_end(), self.user)
    }
}

// --- Tipos del protocolo Ollama ---

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: GenerationOptions,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

// --- Tipos del protocolo compatible con OpenAI ---

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Gestor del backend de generación.
#[derive(Debug, Clone)]
pub struct LlmManager {
    backend: GenerationBackend,
    http: reqwest::Client,
    options: GenerationOptions,
    probe_timeout: Duration,
    generation_timeout: Duration,
    // Una sola llamada saliente a la vez.
    gate: Arc<Semaphore>,
}

impl LlmManager {
    pub fn new(
        backend: GenerationBackend,
        probe_timeout: Duration,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            http: reqwest::Client::new(),
            options: GenerationOptions::default(),
            probe_timeout,
            generation_timeout,
            gate: Arc::new(Semaphore::new(1)),
        }
    }

    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        info!("Backend de generación: {:?}", cfg.generation_backend);
        Self::new(
            cfg.generation_backend.clone(),
            cfg.probe_timeout,
            cfg.generation_timeout,
        )
    }

    pub fn disabled() -> Self {
        Self::new(
            GenerationBackend::Disabled,
            Duration::from_secs(3),
            Duration::from_secs(30),
        )
    }

    // ---------------------------------------------------------------------
    // SONDEO
    // ---------------------------------------------------------------------

    /// Comprueba que el backend responde y ofrece el modelo configurado.
    pub async fn probe(&self) -> Result<(), BackendError> {
        match &self.backend {
            GenerationBackend::Disabled => Err(BackendError::Disabled),
            GenerationBackend::LocalEndpoint { url, model } => {
                let response = self
                    .http
                    .get(endpoint(url, "api/tags")?)
                    .timeout(self.probe_timeout)
                    .send()
                    .await?;
                let tags: TagsResponse = check_status(response).await?.json().await?;
                if tags.models.iter().any(|m| m.name.contains(model.as_str())) {
                    Ok(())
                } else {
                    Err(BackendError::ModelMissing(model.clone()))
                }
            }
            GenerationBackend::HostedEndpoint {
                url,
                api_key,
                model,
            } => {
                let response = self
                    .http
                    .get(endpoint(url, "models")?)
                    .bearer_auth(api_key)
                    .timeout(self.probe_timeout)
                    .send()
                    .await?;
                let models: ModelsResponse = check_status(response).await?.json().await?;
                if models.data.iter().any(|m| &m.id == model) {
                    Ok(())
                } else {
                    Err(BackendError::ModelMissing(model.clone()))
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // GENERACIÓN
    // ---------------------------------------------------------------------

    /// Sondea el backend y, si está disponible, genera una respuesta.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;

        self.probe().await?;

        let text = match &self.backend {
            GenerationBackend::Disabled => return Err(BackendError::Disabled),
            GenerationBackend::LocalEndpoint { url, model } => {
                self.generate_local(url, model, request).await?
            }
            GenerationBackend::HostedEndpoint {
                url,
                api_key,
                model,
            } => self.generate_hosted(url, api_key, model, request).await?,
        };

        let text = text.trim();
        if text.is_empty() {
            warn!("El backend devolvió una respuesta vacía");
            return Err(BackendError::Malformed("respuesta vacía".to_string()));
        }
        Ok(text.to_string())
    }

    async fn generate_local(
        &self,
        url: &Url,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<String, BackendError> {
        debug!(model, "Generando respuesta con el endpoint local");
        let payload = OllamaGenerateRequest {
            model,
            prompt: request.flattened(),
            stream: false,
            options: self.options,
        };
        let response = self
            .http
            .post(endpoint(url, "api/generate")?)
            .timeout(self.generation_timeout)
            .json(&payload)
            .send()
            .await?;
        let body: OllamaGenerateResponse = check_status(response).await?.json().await?;
        Ok(body.response)
    }

    async fn generate_hosted(
        &self,
        url: &Url,
        api_key: &str,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<String, BackendError> {
        debug!(model, "Generando respuesta con el endpoint alojado");
        let payload = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: self.options.temperature,
            top_p: self.options.top_p,
            max_tokens: self.options.max_tokens,
            stream: false,
        };
        let response = self
            .http
            .post(endpoint(url, "chat/completions")?)
            .bearer_auth(api_key)
            .timeout(self.generation_timeout)
            .json(&payload)
            .send()
            .await?;
        let body: ChatResponse = check_status(response).await?.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackendError::Malformed("la respuesta no trae choices".to_string()))
    }
}

/// Une `path` a la URL base conservando su ruta (`/v1` + `models` → `/v1/models`).
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url, BackendError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path)
        .map_err(|e| BackendError::Unreachable(format!("URL no válida: {e}")))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status == reqwest::StatusCode::OK {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_keeps_base_path() {
        let base = Url::parse("https://api.groq.com/openai/v1").unwrap();
        assert_eq!(
            endpoint(&base, "chat/completions").unwrap().as_str(),
            "https://api.groq.com/openai/v1/chat/completions"
        );
        let local = Url::parse("http://localhost:11434").unwrap();
        assert_eq!(
            endpoint(&local, "api/tags").unwrap().as_str(),
            "http://localhost:11434/api/tags"
        );
    }

    #[test]
    fn debug_output_hides_api_key() {
        let backend = GenerationBackend::HostedEndpoint {
            url: Url::parse("https://api.openai.com/v1").unwrap(),
            api_key: "sk-secret".into(),
            model: "gpt-4o-mini".into(),
        };
        let printed = format!("{backend:?}");
        assert!(!printed.contains("sk-secret"));
        assert!(printed.contains("gpt-4o-mini"));
    }

    #[test]
    fn options_serialize_with_expected_names() {
        let json = serde_json::to_value(GenerationOptions::default()).unwrap();
        assert_eq!(json["max_tokens"], 512);
        assert_eq!(json["temperature"], 0.7);
        assert_eq!(json["top_p"], 0.9);
    }

    #[tokio::test]
    async fn disabled_backend_never_generates() {
        let llm = LlmManager::disabled();
        let request = GenerationRequest {
            system: "s".into(),
            user: "u".into(),
        };
        assert!(matches!(
            llm.generate(&request).await,
            Err(BackendError::Disabled)
        ));
    }

    #[tokio::test]
    async fn unreachable_local_endpoint_is_reported() {
        let llm = LlmManager::new(
            GenerationBackend::LocalEndpoint {
                url: Url::parse("http://127.0.0.1:1").unwrap(),
                model: DEFAULT_OLLAMA_MODEL.into(),
            },
            Duration::from_secs(2),
            Duration::from_secs(2),
        );
        assert!(matches!(
            llm.probe().await,
            Err(BackendError::Unreachable(_) | BackendError::Timeout)
        ));
    }
}
