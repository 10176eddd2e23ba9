pub mod gemini;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::manifest::JsonSchema;

/// Model used when a manifest does not name one.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Engine-level generation defaults; manifest execution config overrides
/// them field by field.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_output_tokens: 8192,
            top_p: 0.95,
            top_k: 40,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub prompt: String,
    /// When present, the provider must be asked for schema-constrained JSON
    /// output rather than free text.
    pub output_schema: Option<JsonSchema>,
    pub config: GenerationConfig,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub max_tokens: u32,
}

/// One call against a generative model provider. A provider error is fatal
/// to the run that issued it.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse>;
}
