use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::{ExtractionBackend, ExtractionConfig};
use crate::models::ExtractedInvoiceData;
use crate::services::processor::SourceDocument;

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("No API key configured, set {0}")]
    MissingApiKey(&'static str),
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Extraction API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Empty response from extraction model")]
    EmptyResponse,
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Response does not match the invoice schema")]
    SchemaMismatch,
    #[error("Invalid extraction schema: {0}")]
    Schema(String),
}

/// Turns one source document into a raw invoice record. The returned data is
/// not reconciled.
#[async_trait]
pub trait InvoiceExtractor: Send + Sync {
    async fn extract(&self, document: &SourceDocument) -> Result<ExtractedInvoiceData, ExtractionError>;
}

pub struct HttpExtractor {
    client: reqwest::Client,
    config: ExtractionConfig,
}

impl HttpExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        HttpExtractor {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn api_key(&self) -> Result<&str, ExtractionError> {
        self.config
            .api_key
            .as_deref()
            .ok_or(ExtractionError::MissingApiKey(self.config.backend.api_key_env()))
    }
}

#[async_trait]
impl InvoiceExtractor for HttpExtractor {
    async fn extract(&self, document: &SourceDocument) -> Result<ExtractedInvoiceData, ExtractionError> {
        let api_key = self.api_key()?;
        info!(
            filename = %document.filename,
            mime = %document.mime_type,
            backend = ?self.config.backend,
            model = %self.config.model,
            "Requesting extraction"
        );
        let raw = match self.config.backend {
            ExtractionBackend::Gemini => call_gemini(&self.client, &self.config, api_key, document).await?,
            ExtractionBackend::OpenAi => call_openai(&self.client, &self.config, api_key, document).await?,
        };
        debug!(len = raw.len(), "Extraction response received");
        parse_extraction(&raw)
    }
}

// Gemini generateContent

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

async fn call_gemini(
    client: &reqwest::Client,
    config: &ExtractionConfig,
    api_key: &str,
    document: &SourceDocument,
) -> Result<String, ExtractionError> {
    let request = GeminiRequest {
        system_instruction: GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: Some(system_prompt()),
                inline_data: None,
            }],
        },
        contents: vec![GeminiContent {
            role: Some("user".to_string()),
            parts: vec![
                GeminiPart {
                    text: None,
                    inline_data: Some(InlineData {
                        mime_type: document.mime_type.clone(),
                        data: general_purpose::STANDARD.encode(&document.bytes),
                    }),
                },
                GeminiPart {
                    text: Some(user_prompt(&document.filename)),
                    inline_data: None,
                },
            ],
        }],
        generation_config: GenerationConfig {
            temperature: 0.1,
            response_mime_type: "application/json".to_string(),
        },
    };

    let url = format!("{}/models/{}:generateContent", config.base_url, config.model);
    let response = client
        .post(&url)
        .header("x-goog-api-key", api_key)
        .json(&request)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(ExtractionError::Api { status, body });
    }

    let body: GeminiResponse = response.json().await?;
    gemini_text(body)
}

/// Concatenated text parts of the first candidate.
fn gemini_text(body: GeminiResponse) -> Result<String, ExtractionError> {
    let text: String = body
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ExtractionError::EmptyResponse);
    }
    Ok(text)
}

// OpenAI-compatible chat completions

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<Message>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    File { file: FileData },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Serialize)]
struct FileData {
    filename: String,
    file_data: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn document_part(document: &SourceDocument) -> ContentPart {
    let data_url = format!(
        "data:{};base64,{}",
        document.mime_type,
        general_purpose::STANDARD.encode(&document.bytes)
    );
    if document.mime_type.starts_with("image/") {
        ContentPart::ImageUrl {
            image_url: ImageUrl { url: data_url },
        }
    } else if document.mime_type == "text/plain" {
        ContentPart::Text {
            text: String::from_utf8_lossy(&document.bytes).into_owned(),
        }
    } else {
        ContentPart::File {
            file: FileData {
                filename: document.filename.clone(),
                file_data: data_url,
            },
        }
    }
}

async fn call_openai(
    client: &reqwest::Client,
    config: &ExtractionConfig,
    api_key: &str,
    document: &SourceDocument,
) -> Result<String, ExtractionError> {
    let request = ChatRequest {
        model: config.model.clone(),
        temperature: 0.1,
        messages: vec![
            Message {
                role: "system".to_string(),
                content: MessageContent::Text(system_prompt()),
            },
            Message {
                role: "user".to_string(),
                content: MessageContent::Parts(vec![
                    document_part(document),
                    ContentPart::Text {
                        text: user_prompt(&document.filename),
                    },
                ]),
            },
        ],
        response_format: ResponseFormat {
            format_type: "json_object".to_string(),
        },
    };

    let response = client
        .post(format!("{}/chat/completions", config.base_url))
        .bearer_auth(api_key)
        .json(&request)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(ExtractionError::Api { status, body });
    }

    let body: ChatResponse = response.json().await?;
    chat_text(body)
}

fn chat_text(body: ChatResponse) -> Result<String, ExtractionError> {
    body.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or(ExtractionError::EmptyResponse)
}

/// Parses the model's reply into extracted data. Markdown fences and any text
/// around the outermost JSON object are ignored; the object must satisfy the
/// extraction schema. A mismatch is reported, not repaired.
pub fn parse_extraction(raw: &str) -> Result<ExtractedInvoiceData, ExtractionError> {
    let json_str = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let json_str = extract_json_object(json_str)?;
    let value: Value =
        serde_json::from_str(json_str).map_err(|e| ExtractionError::InvalidJson(e.to_string()))?;

    let schema = extraction_schema()?;
    if !schema.is_valid(&value) {
        return Err(ExtractionError::SchemaMismatch);
    }

    serde_json::from_value(value).map_err(|e| ExtractionError::InvalidJson(e.to_string()))
}

fn extract_json_object(s: &str) -> Result<&str, ExtractionError> {
    let start = s
        .find('{')
        .ok_or_else(|| ExtractionError::InvalidJson("no '{' in response".to_string()))?;
    let end = s
        .rfind('}')
        .ok_or_else(|| ExtractionError::InvalidJson("no '}' in response".to_string()))?;
    if end <= start {
        return Err(ExtractionError::InvalidJson("unbalanced braces in response".to_string()));
    }
    Ok(&s[start..=end])
}

fn extraction_schema() -> Result<JSONSchema, ExtractionError> {
    let schema = json!({
        "type": "object",
        "properties": {
            "invoiceNumber": {"type": ["string", "null"]},
            "date": {"type": ["string", "null"]},
            "dueDate": {"type": ["string", "null"]},
            "supplierName": {"type": ["string", "null"]},
            "supplierAddress": {"type": ["string", "null"]},
            "clientName": {"type": ["string", "null"]},
            "clientCif": {"type": ["string", "null"]},
            "clientAddress": {"type": ["string", "null"]},
            "items": {
                "type": ["array", "null"],
                "items": {
                    "type": "object",
                    "properties": {
                        "description": {"type": ["string", "null"]},
                        "quantity": {"type": ["number", "null"]},
                        "unitPrice": {"type": ["number", "null"]},
                        "total": {"type": ["number", "null"]}
                    }
                }
            },
            "subtotal": {"type": ["number", "null"]},
            "taxRate": {"type": ["number", "null"]},
            "taxAmount": {"type": ["number", "null"]},
            "total": {"type": ["number", "null"]},
            "notes": {"type": ["string", "null"]}
        }
    });

    JSONSchema::compile(&schema).map_err(|e| ExtractionError::Schema(e.to_string()))
}

fn system_prompt() -> String {
    r#"You convert delivery notes into invoice data. Return JSON only, one object, with these fields:
- invoiceNumber (string|null): delivery note or invoice number
- date (YYYY-MM-DD|null)
- dueDate (YYYY-MM-DD|null)
- supplierName (string|null), supplierAddress (string|null)
- clientName (string|null), clientCif (string|null, client tax id), clientAddress (string|null)
- items (array): each {description (string), quantity (number), unitPrice (number), total (number)}
- subtotal (number|null), taxRate (number|null, percent, e.g. 21), taxAmount (number|null), total (number|null)
- notes (string|null)
Use null for anything you cannot read. Do not invent prices that are not on the document.
"#
    .to_string()
}

fn user_prompt(filename: &str) -> String {
    format!("Extract the invoice data from the attached delivery note ({}).", filename)
}
