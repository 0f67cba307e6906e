use anyhow::{anyhow, Result};
use clap::ValueEnum;
use std::path::PathBuf;

pub const MAX_BATCH_DOCUMENTS: usize = 10;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_MODEL: &str = "gemini-2.0-flash";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExtractionBackend {
    Gemini,
    #[value(name = "openai")]
    OpenAi,
}

impl ExtractionBackend {
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ExtractionBackend::Gemini => "GEMINI_API_KEY",
            ExtractionBackend::OpenAi => "OPENAI_API_KEY",
        }
    }
}

/// Endpoint the extractor talks to, resolved from flags and environment.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub backend: ExtractionBackend,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl ExtractionConfig {
    pub fn resolve(
        backend: ExtractionBackend,
        model: Option<String>,
        base_url: Option<String>,
        api_key: Option<String>,
    ) -> Self {
        let (default_url, default_model) = match backend {
            ExtractionBackend::Gemini => (GEMINI_BASE_URL, GEMINI_MODEL),
            ExtractionBackend::OpenAi => (OPENAI_BASE_URL, OPENAI_MODEL),
        };
        let api_key = api_key
            .or_else(|| std::env::var(backend.api_key_env()).ok())
            .filter(|key| !key.trim().is_empty());
        ExtractionConfig {
            backend,
            base_url: base_url
                .unwrap_or_else(|| default_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| default_model.to_string()),
            api_key,
        }
    }
}

pub fn resolve_data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    dirs::data_dir()
        .map(|dir| dir.join("albafactura"))
        .ok_or_else(|| anyhow!("No platform data directory, pass --data-dir"))
}
