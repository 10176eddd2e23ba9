use anyhow::{Result, anyhow};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::core::connectors::{ConnectorRegistry, FetchOptions};
use crate::core::llm::gemini::GeminiProvider;
use crate::core::llm::{DEFAULT_MODEL, GenerationConfig, ModelProvider, ModelRequest};
use crate::core::manifest::ExecutionConfig;
use crate::core::store::{
    AccountStatus, Grant, GrantStatus, RecordStore, RunArtifact, RunStatus,
};
use crate::core::template::{self, TemplateContext};
use crate::core::validation;
use crate::core::vault::TokenVault;

/// Failure taxonomy for one run. Everything here surfaces as the run's
/// terminal `error` status with the message below; connector fetch failures
/// are handled inside the fetch stage and never reach this type.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("App not found or access denied")]
    NotFound,
    #[error("App is disabled")]
    Disabled,
    #[error("Required connector '{0}' is not authorized")]
    PermissionDenied(String),
    #[error("Model invocation failed: {0}")]
    ModelInvocation(String),
    #[error("Failed to parse AI response: {0}")]
    Parse(String),
    #[error("Output validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Allowed status order for a run:
/// pending → fetching → processing → validating → (completed | error).
/// `error` (and the reserved `failed`) can interrupt any active stage;
/// terminal statuses never transition away.
pub fn can_transition(from: RunStatus, to: RunStatus) -> bool {
    if from == to {
        return true;
    }
    match from {
        RunStatus::Pending => matches!(
            to,
            RunStatus::Fetching | RunStatus::Error | RunStatus::Failed
        ),
        RunStatus::Fetching => matches!(
            to,
            RunStatus::Processing | RunStatus::Error | RunStatus::Failed
        ),
        RunStatus::Processing => matches!(
            to,
            RunStatus::Validating | RunStatus::Error | RunStatus::Failed
        ),
        RunStatus::Validating => matches!(
            to,
            RunStatus::Completed | RunStatus::Error | RunStatus::Failed
        ),
        RunStatus::Completed | RunStatus::Failed | RunStatus::Error => false,
    }
}

/// Access-control predicate injected by the embedding process. An admin may
/// execute runs for apps they do not own; the default grants nobody that.
pub trait Authorizer: Send + Sync {
    fn is_admin(&self, user_id: &str) -> bool;
}

/// Default policy: no admin bypass for anyone.
pub struct NoAdmins;

impl Authorizer for NoAdmins {
    fn is_admin(&self, _user_id: &str) -> bool {
        false
    }
}

/// Secrets and endpoints the engine needs, assembled explicitly by the
/// embedding process rather than read from hidden globals.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub gemini_api_key: String,
    /// Base64-encoded 256-bit key for connector token decryption.
    pub token_encryption_key: String,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow!("GEMINI_API_KEY environment variable is required"))?;
        let token_encryption_key = std::env::var("TOKEN_ENCRYPTION_KEY")
            .or_else(|_| std::env::var("ENCRYPTION_KEY"))
            .map_err(|_| {
                anyhow!("TOKEN_ENCRYPTION_KEY or ENCRYPTION_KEY environment variable is required")
            })?;
        Ok(Self {
            gemini_api_key,
            token_encryption_key,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Run row created by the caller before orchestration begins.
    pub run_id: String,
    pub installed_app_id: String,
    pub user_id: String,
    /// Merged over the stored configuration; overrides win per key.
    pub input_overrides: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub model: String,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub duration_ms: u64,
}

/// Terminal result of one execution: `Completed` with output, or `Error`
/// with a display-ready message. Metadata is always present.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: RunStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub metadata: RunMetadata,
}

/// Synchronous progress observer, invoked at each stage transition strictly
/// before the next stage begins. Delivery concerns are the caller's;
/// nothing the callback does alters run execution.
pub type StatusCallback = Box<dyn Fn(RunStatus, Option<&str>) + Send + Sync>;

/// Executes installed-app runs end to end: precondition checks, connector
/// fetch, template render, model invocation, output validation, and status
/// plus artifact persistence.
pub struct RunEngine {
    store: Arc<RecordStore>,
    vault: TokenVault,
    registry: ConnectorRegistry,
    provider: Arc<dyn ModelProvider>,
    authorizer: Arc<dyn Authorizer>,
}

impl RunEngine {
    pub fn new(
        store: Arc<RecordStore>,
        vault: TokenVault,
        registry: ConnectorRegistry,
        provider: Arc<dyn ModelProvider>,
    ) -> Self {
        Self {
            store,
            vault,
            registry,
            provider,
            authorizer: Arc::new(NoAdmins),
        }
    }

    /// Standard assembly: Gemini provider and Google connectors sharing one
    /// HTTP client, vault from the configured key.
    pub fn from_config(config: &EngineConfig, store: Arc<RecordStore>) -> Result<Self> {
        let vault = TokenVault::from_base64_key(&config.token_encryption_key)?;
        let client = reqwest::Client::new();
        let registry = ConnectorRegistry::with_google_connectors(client.clone());
        let provider = Arc::new(GeminiProvider::with_client(
            config.gemini_api_key.clone(),
            client,
        ));
        Ok(Self::new(store, vault, registry, provider))
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Execute one run end to end. Never panics and never returns a
    /// non-terminal state: any failure inside the pipeline is caught here,
    /// persisted as `error`, and returned with its message.
    pub async fn execute_run(
        &self,
        request: &RunRequest,
        on_status: Option<StatusCallback>,
    ) -> RunResult {
        let started = Instant::now();
        let emit = move |status: RunStatus, message: Option<&str>| {
            if let Some(cb) = &on_status {
                cb(status, message);
            }
        };

        match self.run_pipeline(request, started, &emit).await {
            Ok((output, metadata)) => {
                emit(RunStatus::Completed, None);
                info!(
                    "Run {} completed in {}ms ({} in / {} out tokens)",
                    request.run_id,
                    metadata.duration_ms,
                    metadata.tokens_input,
                    metadata.tokens_output
                );
                RunResult {
                    status: RunStatus::Completed,
                    output: Some(output),
                    error: None,
                    metadata,
                }
            }
            Err(err) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let message = err.to_string();
                emit(RunStatus::Error, Some(&message));
                self.persist_status(
                    &request.run_id,
                    RunStatus::Error,
                    Some(&message),
                    Some(duration_ms as i64),
                )
                .await;
                error!("Run {} failed: {}", request.run_id, message);
                RunResult {
                    status: RunStatus::Error,
                    output: None,
                    error: Some(message),
                    metadata: RunMetadata {
                        model: "unknown".to_string(),
                        tokens_input: 0,
                        tokens_output: 0,
                        duration_ms,
                    },
                }
            }
        }
    }

    async fn run_pipeline(
        &self,
        request: &RunRequest,
        started: Instant,
        emit: &dyn Fn(RunStatus, Option<&str>),
    ) -> Result<(Value, RunMetadata), EngineError> {
        // 1. Preconditions: ownership, enablement, required grants.
        self.transition(
            &request.run_id,
            RunStatus::Pending,
            Some("Loading app configuration..."),
            emit,
        )
        .await;

        let app = self
            .store
            .installed_app(&request.installed_app_id)
            .await?
            .ok_or(EngineError::NotFound)?;
        if app.user_id != request.user_id && !self.authorizer.is_admin(&request.user_id) {
            return Err(EngineError::NotFound);
        }
        if !app.enabled {
            return Err(EngineError::Disabled);
        }

        let version = self
            .store
            .version(&app.version_id)
            .await?
            .ok_or_else(|| anyhow!("App version '{}' is missing", app.version_id))?;

        let config = merge_config(&app.config, &request.input_overrides);

        let grants = self.store.grants_for_app(&app.id).await?;
        for requirement in version.manifest.required_connectors() {
            let allowed = grants.iter().any(|g| {
                g.connector_type == requirement.connector_type
                    && g.status == GrantStatus::Allowed
            });
            if !allowed {
                return Err(EngineError::PermissionDenied(
                    requirement.connector_type.clone(),
                ));
            }
        }

        // 2. Fetch data for every allowed grant, not just the required ones.
        self.transition(
            &request.run_id,
            RunStatus::Fetching,
            Some("Fetching data from connected services..."),
            emit,
        )
        .await;
        let connector_data = self.fetch_connector_data(&request.user_id, &grants).await;

        // 3. Render the prompt and invoke the model.
        self.transition(
            &request.run_id,
            RunStatus::Processing,
            Some("Processing with AI..."),
            emit,
        )
        .await;

        let context = TemplateContext::new(config, connector_data);
        let prompt = template::render(&version.run_template, &context);

        let execution = version.manifest.execution.clone().unwrap_or_default();
        let model = execution
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let generation = resolve_generation(&execution);

        let response = self
            .provider
            .generate(&ModelRequest {
                model: model.clone(),
                prompt,
                output_schema: Some(version.output_schema.clone()),
                config: generation,
            })
            .await
            .map_err(|e| EngineError::ModelInvocation(e.to_string()))?;

        // 4. Parse and validate the structured output.
        self.transition(
            &request.run_id,
            RunStatus::Validating,
            Some("Validating output..."),
            emit,
        )
        .await;

        let parsed = match validation::parse_model_json(&response.text) {
            Ok(value) => value,
            Err(message) => {
                self.save_artifact(&request.run_id, None, &response.text, &model, &response)
                    .await;
                return Err(EngineError::Parse(message));
            }
        };

        let report = validation::validate(&parsed, &version.output_schema);
        if !report.valid {
            if let Some(retry) = &execution.retry_config {
                // Declared retry policy is recognized but not enforced;
                // a validation failure is terminal.
                if retry.retry_on_validation_failure && retry.max_retries > 0 {
                    warn!(
                        "Run {}: validation failed, retry policy declared but not enforced",
                        request.run_id
                    );
                }
            }
            self.save_artifact(&request.run_id, None, &response.text, &model, &response)
                .await;
            return Err(EngineError::Validation(report.errors.join(", ")));
        }

        // 5. Persist the terminal state and artifact.
        let duration_ms = started.elapsed().as_millis() as u64;
        self.save_artifact(
            &request.run_id,
            Some(parsed.clone()),
            &response.text,
            &model,
            &response,
        )
        .await;
        self.persist_status(
            &request.run_id,
            RunStatus::Completed,
            None,
            Some(duration_ms as i64),
        )
        .await;

        Ok((
            parsed,
            RunMetadata {
                model,
                tokens_input: response.usage.prompt_tokens,
                tokens_output: response.usage.completion_tokens,
                duration_ms,
            },
        ))
    }

    /// Emit to the observer, then persist. The callback always runs before
    /// the next stage starts; a persistence failure is logged, never fatal.
    async fn transition(
        &self,
        run_id: &str,
        status: RunStatus,
        message: Option<&str>,
        emit: &dyn Fn(RunStatus, Option<&str>),
    ) {
        emit(status, message);
        self.persist_status(run_id, status, None, None).await;
    }

    async fn persist_status(
        &self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
        duration_ms: Option<i64>,
    ) {
        if let Err(e) = self
            .store
            .update_run_status(run_id, status, error_message, duration_ms)
            .await
        {
            warn!("Failed to persist status '{}' for run {}: {:#}", status, run_id, e);
        }
    }

    async fn save_artifact(
        &self,
        run_id: &str,
        output: Option<Value>,
        raw_response: &str,
        model: &str,
        response: &crate::core::llm::ModelResponse,
    ) {
        let artifact = RunArtifact {
            run_id: run_id.to_string(),
            output,
            raw_response: Some(raw_response.to_string()),
            model_used: Some(model.to_string()),
            tokens_input: response.usage.prompt_tokens as i64,
            tokens_output: response.usage.completion_tokens as i64,
        };
        if let Err(e) = self.store.save_artifact(&artifact).await {
            warn!("Failed to save artifacts for run {}: {:#}", run_id, e);
        }
    }

    /// Build the connector-type-keyed data bag for every allowed grant. Any
    /// per-connector failure is logged and skipped; the run proceeds with
    /// whatever data was obtained.
    async fn fetch_connector_data(
        &self,
        user_id: &str,
        grants: &[Grant],
    ) -> Map<String, Value> {
        let mut data = Map::new();
        for grant in grants.iter().filter(|g| g.status == GrantStatus::Allowed) {
            match self.fetch_one(user_id, grant).await {
                Ok(Some(bag)) => {
                    data.insert(grant.connector_type.clone(), bag);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        "Failed to fetch data from {}: {:#}",
                        grant.connector_type, e
                    );
                }
            }
        }
        data
    }

    async fn fetch_one(&self, user_id: &str, grant: &Grant) -> Result<Option<Value>> {
        let Some(account) = self
            .store
            .connector_account(user_id, &grant.connector_type)
            .await?
        else {
            warn!("Connector {} not found for user", grant.connector_type);
            return Ok(None);
        };
        if account.status != AccountStatus::Connected {
            warn!(
                "Connector {} status is {}",
                grant.connector_type,
                account.status.as_str()
            );
            return Ok(None);
        }
        let Some(fetcher) = self.registry.get(&grant.connector_type) else {
            warn!("Unknown connector type: {}", grant.connector_type);
            return Ok(None);
        };

        let tokens = self.vault.decrypt_tokens(&account.tokens)?;
        let options = FetchOptions::from_grant_options(&grant.options, fetcher.default_page_size());
        let bag = fetcher.fetch(&tokens, &options).await?;
        Ok(Some(bag))
    }
}

/// Stored config with per-key overrides applied on top.
pub fn merge_config(
    stored: &Map<String, Value>,
    overrides: &Map<String, Value>,
) -> Map<String, Value> {
    let mut merged = stored.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Manifest tuning over engine defaults, field by field.
pub fn resolve_generation(execution: &ExecutionConfig) -> GenerationConfig {
    let mut config = GenerationConfig::default();
    if let Some(tuning) = &execution.model_config {
        if let Some(temperature) = tuning.temperature {
            config.temperature = temperature;
        }
        if let Some(max_output_tokens) = tuning.max_output_tokens {
            config.max_output_tokens = max_output_tokens;
        }
    }
    config
}
