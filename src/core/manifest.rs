use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Connector type identifiers as they appear in manifests and grant rows.
pub const CONNECTOR_GOOGLE_DRIVE: &str = "google_drive";
pub const CONNECTOR_GMAIL: &str = "gmail";

/// One connector an app wants access to. `required` connectors block
/// execution until their grant is allowed; optional ones are fetched
/// opportunistically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorRequirement {
    #[serde(rename = "type")]
    pub connector_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTuning {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default, rename = "maxOutputTokens")]
    pub max_output_tokens: Option<u32>,
}

/// Retry-on-validation-failure declaration. Parsed and preserved but not
/// enforced: a validation failure is always terminal in the current engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default, rename = "retryOnValidationFailure")]
    pub retry_on_validation_failure: bool,
    #[serde(default, rename = "maxRetries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, rename = "modelConfig")]
    pub model_config: Option<ModelTuning>,
    #[serde(default, rename = "retryConfig")]
    pub retry_config: Option<RetryConfig>,
}

/// App manifest embedded on an app version. Declares what the app needs
/// (connectors), what it produces (output schema) and how it runs
/// (execution parameters).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub connectors: Vec<ConnectorRequirement>,
    #[serde(default)]
    pub config_schema: Option<JsonSchema>,
    pub output_schema: JsonSchema,
    #[serde(default)]
    pub execution: Option<ExecutionConfig>,
}

impl AppManifest {
    pub fn required_connectors(&self) -> impl Iterator<Item = &ConnectorRequirement> {
        self.connectors.iter().filter(|c| c.required)
    }
}

/// Simplified JSON Schema used for both config forms and model output
/// contracts. Unknown keys are ignored on deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonSchema {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, JsonSchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<JsonSchema>>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, rename = "minLength", skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(default, rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl JsonSchema {
    pub fn of_type(schema_type: &str) -> Self {
        Self {
            schema_type: Some(schema_type.to_string()),
            ..Default::default()
        }
    }

    pub fn object(properties: BTreeMap<String, JsonSchema>, required: Vec<String>) -> Self {
        Self {
            schema_type: Some("object".to_string()),
            properties: Some(properties),
            required: if required.is_empty() {
                None
            } else {
                Some(required)
            },
            ..Default::default()
        }
    }
}
