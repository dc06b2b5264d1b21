//! Carga y gestión de configuración de la aplicación (corpus, embeddings y LLM).

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::chunker::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::embedding::{
    DEFAULT_HASHING_DIMENSIONS, DEFAULT_OLLAMA_EMBEDDING_MODEL, FASTEMBED_DIMENSIONS,
    FASTEMBED_MODEL, OPENAI_EMBEDDING_DIMENSIONS,
};
use crate::llm::{GenerationBackend, DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL};
use crate::retriever::DEFAULT_BROADEN_MAX_TERMS;
use crate::vector_store::DEFAULT_TOP_K;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmbeddingKind {
    /// all-MiniLM-L6-v2 local con fastembed.
    FastEmbed,
    Hashing,
    Ollama,
    OpenAI,
}

impl FromStr for EmbeddingKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fastembed" | "local" | "minilm" => Ok(Self::FastEmbed),
            "hashing" => Ok(Self::Hashing),
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            other => Err(anyhow!("Proveedor de embeddings no soportado: {other}")),
        }
    }
}

impl EmbeddingKind {
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::FastEmbed => FASTEMBED_MODEL,
            Self::Hashing => "",
            Self::Ollama => DEFAULT_OLLAMA_EMBEDDING_MODEL,
            Self::OpenAI => "text-embedding-3-small",
        }
    }

    pub fn default_dimensions(&self) -> usize {
        match self {
            Self::FastEmbed => FASTEMBED_DIMENSIONS,
            Self::Hashing => DEFAULT_HASHING_DIMENSIONS,
            Self::Ollama => 768,
            Self::OpenAI => OPENAI_EMBEDDING_DIMENSIONS,
        }
    }

    /// Corte de relevancia por defecto. Sin él la búsqueda siempre devuelve
    /// `k` resultados y la consulta ampliada nunca se usaría.
    ///
    /// El embedder por hashing no lo necesita: sólo acepta chunks que
    /// comparten algún término con la consulta.
    pub fn default_max_distance(&self) -> Option<f32> {
        match self {
            Self::FastEmbed => Some(FASTEMBED_MAX_DISTANCE),
            Self::Hashing | Self::Ollama | Self::OpenAI => None,
        }
    }
}

/// Similitud coseno mínima de 0.3 para all-MiniLM-L6-v2.
pub const FASTEMBED_MAX_DISTANCE: f32 = 0.7;

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub corpus_path: PathBuf,

    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub max_distance: Option<f32>,
    pub broaden_max_terms: usize,

    pub embedding_provider: EmbeddingKind,
    pub embedding_model: String,
    pub embedding_dimensions: usize,

    pub generation_backend: GenerationBackend,
    pub ollama_url: Url,
    pub probe_timeout: Duration,
    pub generation_timeout: Duration,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());
        let corpus_path = PathBuf::from(
            env::var("CORPUS_PATH").unwrap_or_else(|_| "data/learning_corpus.csv".to_string()),
        );

        let chunk_size = parse_var("CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        let chunk_overlap = parse_var("CHUNK_OVERLAP", DEFAULT_CHUNK_OVERLAP)?;
        if chunk_overlap >= chunk_size {
            return Err(anyhow!(
                "CHUNK_OVERLAP ({chunk_overlap}) debe ser menor que CHUNK_SIZE ({chunk_size})"
            ));
        }
        let top_k = parse_var("TOP_K", DEFAULT_TOP_K)?;
        if top_k == 0 {
            return Err(anyhow!("TOP_K debe ser un entero positivo"));
        }
        let broaden_max_terms = parse_var("BROADEN_MAX_TERMS", DEFAULT_BROADEN_MAX_TERMS)?;

        let embedding_provider: EmbeddingKind = env::var("EMBEDDING_PROVIDER")
            .unwrap_or_else(|_| "fastembed".to_string())
            .parse()?;
        let embedding_model = env::var("EMBEDDING_MODEL")
            .unwrap_or_else(|_| embedding_provider.default_model().to_string());
        let embedding_dimensions =
            parse_var("EMBEDDING_DIMENSIONS", embedding_provider.default_dimensions())?;
        let max_distance = match env::var("RETRIEVAL_MAX_DISTANCE") {
            Ok(raw) if raw.eq_ignore_ascii_case("none") => None,
            Ok(raw) => Some(
                raw.parse::<f32>()
                    .with_context(|| format!("RETRIEVAL_MAX_DISTANCE no es un número: {raw}"))?,
            ),
            Err(_) => embedding_provider.default_max_distance(),
        };

        let ollama_url = parse_url(
            &env::var("OLLAMA_URL").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string()),
        )?;
        let generation_backend = generation_backend_from_env(&ollama_url)?;

        let probe_timeout = Duration::from_secs(parse_var("PROBE_TIMEOUT_SECS", 3u64)?);
        let generation_timeout = Duration::from_secs(parse_var("GENERATION_TIMEOUT_SECS", 30u64)?);

        Ok(Self {
            server_addr,
            corpus_path,
            chunk_size,
            chunk_overlap,
            top_k,
            max_distance,
            broaden_max_terms,
            embedding_provider,
            embedding_model,
            embedding_dimensions,
            generation_backend,
            ollama_url,
            probe_timeout,
            generation_timeout,
        })
    }
}

/// Traduce `GENERATION_BACKEND` a la variante correspondiente.
fn generation_backend_from_env(ollama_url: &Url) -> Result<GenerationBackend> {
    let kind = env::var("GENERATION_BACKEND").unwrap_or_else(|_| "ollama".to_string());

    let (default_url, key_var, default_model) = match kind.to_lowercase().as_str() {
        "disabled" | "none" | "off" => return Ok(GenerationBackend::Disabled),
        "ollama" | "local" => {
            let model =
                env::var("OLLAMA_MODEL").unwrap_or_else(|_| DEFAULT_OLLAMA_MODEL.to_string());
            return Ok(GenerationBackend::LocalEndpoint {
                url: ollama_url.clone(),
                model,
            });
        }
        "openai" => ("https://api.openai.com/v1", "OPENAI_API_KEY", "gpt-4o-mini"),
        "groq" => (
            "https://api.groq.com/openai/v1",
            "GROQ_API_KEY",
            "llama-3.1-8b-instant",
        ),
        other => return Err(anyhow!("Backend de generación no soportado: {other}")),
    };

    let url = parse_url(&env::var("HOSTED_API_URL").unwrap_or_else(|_| default_url.to_string()))?;
    let api_key = env::var("HOSTED_API_KEY")
        .or_else(|_| env::var(key_var))
        .map_err(|_| anyhow!("Falta HOSTED_API_KEY o {key_var} en el entorno"))?;
    let model = env::var("HOSTED_MODEL").unwrap_or_else(|_| default_model.to_string());

    Ok(GenerationBackend::HostedEndpoint {
        url,
        api_key,
        model,
    })
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Valor no válido para {name} ('{raw}'): {e}")),
        Err(_) => Ok(default),
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).with_context(|| format!("URL no válida: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_kind_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<EmbeddingKind>().unwrap(), EmbeddingKind::OpenAI);
        assert_eq!("local".parse::<EmbeddingKind>().unwrap(), EmbeddingKind::FastEmbed);
        assert_eq!("Hashing".parse::<EmbeddingKind>().unwrap(), EmbeddingKind::Hashing);
        assert!("faiss".parse::<EmbeddingKind>().is_err());
    }

    #[test]
    fn provider_defaults() {
        assert_eq!(EmbeddingKind::FastEmbed.default_max_distance(), Some(0.7));
        assert_eq!(EmbeddingKind::FastEmbed.default_dimensions(), 384);
        assert_eq!(EmbeddingKind::FastEmbed.default_model(), "all-MiniLM-L6-v2");
        assert_eq!(EmbeddingKind::Hashing.default_max_distance(), None);
        assert_eq!(EmbeddingKind::OpenAI.default_max_distance(), None);
        assert_eq!(EmbeddingKind::OpenAI.default_dimensions(), 1536);
    }
}
