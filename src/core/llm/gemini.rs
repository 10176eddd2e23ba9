use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ModelInfo, ModelProvider, ModelRequest, ModelResponse, TokenUsage};
use crate::core::manifest::JsonSchema;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: WireGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    top_p: f32,
    top_k: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiResContent,
}

#[derive(Deserialize)]
struct GeminiResContent {
    #[serde(default)]
    parts: Vec<GeminiResPart>,
}

#[derive(Deserialize)]
struct GeminiResPart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u32,
}

/// Gemini REST provider. Built from an explicit API key by whoever
/// assembles the engine; when the request carries an output schema the call
/// asks for schema-constrained JSON output.
pub struct GeminiProvider {
    api_key: String,
    client: Client,
}

impl GeminiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: Client::new(),
        }
    }

    pub fn with_client(api_key: String, client: Client) -> Self {
        Self { api_key, client }
    }

    /// Models known to work with this provider, with their output budgets.
    pub fn known_models() -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                id: "gemini-2.5-flash".to_string(),
                name: "Gemini 2.5 Flash".to_string(),
                description: "Fast, efficient for most tasks".to_string(),
                max_tokens: 8192,
            },
            ModelInfo {
                id: "gemini-2.5-pro".to_string(),
                name: "Gemini 2.5 Pro".to_string(),
                description: "Advanced reasoning".to_string(),
                max_tokens: 8192,
            },
            ModelInfo {
                id: "gemini-3-pro".to_string(),
                name: "Gemini 3 Pro".to_string(),
                description: "Latest flagship model".to_string(),
                max_tokens: 65536,
            },
            ModelInfo {
                id: "gemini-3-pro-preview".to_string(),
                name: "Gemini 3 Pro Preview".to_string(),
                description: "Experimental features".to_string(),
                max_tokens: 65536,
            },
        ]
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let generation_config = WireGenerationConfig {
            temperature: request.config.temperature,
            max_output_tokens: request.config.max_output_tokens,
            top_p: request.config.top_p,
            top_k: request.config.top_k,
            response_mime_type: request
                .output_schema
                .as_ref()
                .map(|_| "application/json".to_string()),
            response_schema: request.output_schema.as_ref().map(to_gemini_schema),
        };

        let req = GenerateContentRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: request.prompt.clone(),
                }],
            }],
            generation_config,
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            BASE_URL, request.model, self.api_key
        );
        let res = self.client.post(&url).json(&req).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(anyhow!(
                "Gemini API error ({}): {}",
                status,
                res.text().await.unwrap_or_default()
            ));
        }
        let parsed: GenerateContentResponse = res.json().await?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .unwrap_or_default();
        let usage = parsed.usage_metadata.unwrap_or_default();

        Ok(ModelResponse {
            text,
            usage: TokenUsage {
                prompt_tokens: usage.prompt_token_count,
                completion_tokens: usage.candidates_token_count,
                total_tokens: usage.total_token_count,
            },
        })
    }
}

/// Convert the internal JSON-Schema contract into Gemini's schema
/// vocabulary: uppercase type names, nested properties, required lists,
/// array item schemas and nullability. Fields Gemini does not know about
/// are dropped.
pub fn to_gemini_schema(schema: &JsonSchema) -> Value {
    let mut out = Map::new();

    if let Some(schema_type) = schema.schema_type.as_deref() {
        let mapped = match schema_type {
            "string" => "STRING",
            "number" => "NUMBER",
            "integer" => "INTEGER",
            "boolean" => "BOOLEAN",
            "array" => "ARRAY",
            "object" => "OBJECT",
            _ => "STRING",
        };
        out.insert("type".to_string(), Value::String(mapped.to_string()));
    }
    if let Some(description) = &schema.description {
        out.insert(
            "description".to_string(),
            Value::String(description.clone()),
        );
    }
    if let Some(enum_values) = &schema.enum_values {
        out.insert("enum".to_string(), Value::Array(enum_values.clone()));
    }
    if let Some(properties) = &schema.properties {
        let converted: Map<String, Value> = properties
            .iter()
            .map(|(key, child)| (key.clone(), to_gemini_schema(child)))
            .collect();
        out.insert("properties".to_string(), Value::Object(converted));
    }
    if let Some(required) = &schema.required {
        out.insert(
            "required".to_string(),
            Value::Array(
                required
                    .iter()
                    .map(|r| Value::String(r.clone()))
                    .collect(),
            ),
        );
    }
    if let Some(items) = &schema.items {
        out.insert("items".to_string(), to_gemini_schema(items));
    }
    if schema.nullable.unwrap_or(false) {
        out.insert("nullable".to_string(), Value::Bool(true));
    }

    Value::Object(out)
}
