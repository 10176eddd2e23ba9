use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::manifest::{AppManifest, JsonSchema};
use crate::core::vault::EncryptedTokens;

/// Lifecycle status of a run. `Failed` is a reserved terminal value kept
/// for legacy rows; the engine itself only ever emits `Error` on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Fetching,
    Processing,
    Validating,
    Completed,
    Failed,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Fetching => "fetching",
            RunStatus::Processing => "processing",
            RunStatus::Validating => "validating",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "fetching" => Some(RunStatus::Fetching),
            "processing" => Some(RunStatus::Processing),
            "validating" => Some(RunStatus::Validating),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "error" => Some(RunStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Error
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantStatus {
    Pending,
    Allowed,
    Denied,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Pending => "pending",
            GrantStatus::Allowed => "allowed",
            GrantStatus::Denied => "denied",
        }
    }

    fn parse_or_pending(s: &str) -> Self {
        match s {
            "allowed" => GrantStatus::Allowed,
            "denied" => GrantStatus::Denied,
            _ => GrantStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Connected,
    Expired,
    Revoked,
    Error,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Connected => "connected",
            AccountStatus::Expired => "expired",
            AccountStatus::Revoked => "revoked",
            AccountStatus::Error => "error",
        }
    }

    fn parse_or_error(s: &str) -> Self {
        match s {
            "connected" => AccountStatus::Connected,
            "expired" => AccountStatus::Expired,
            "revoked" => AccountStatus::Revoked,
            _ => AccountStatus::Error,
        }
    }
}

/// A published app version: manifest, prompt template and output contract.
/// Versions are pinned at install time and never auto-upgraded.
#[derive(Debug, Clone)]
pub struct AppVersion {
    pub id: String,
    pub manifest: AppManifest,
    pub run_template: String,
    pub output_schema: JsonSchema,
}

#[derive(Debug, Clone)]
pub struct InstalledApp {
    pub id: String,
    pub user_id: String,
    pub version_id: String,
    pub enabled: bool,
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct Grant {
    pub installed_app_id: String,
    pub connector_type: String,
    pub status: GrantStatus,
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct ConnectorAccount {
    pub user_id: String,
    pub connector_type: String,
    pub status: AccountStatus,
    pub tokens: EncryptedTokens,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: String,
    pub installed_app_id: String,
    pub user_id: String,
    pub version_id: String,
    pub status: RunStatus,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
}

/// Durable output of one run attempt. Written at most once per run.
#[derive(Debug, Clone)]
pub struct RunArtifact {
    pub run_id: String,
    pub output: Option<Value>,
    pub raw_response: Option<String>,
    pub model_used: Option<String>,
    pub tokens_input: i64,
    pub tokens_output: i64,
}

/// Sqlite-backed record store for the engine: installed apps, versions,
/// grants, connector accounts, runs and artifacts. A single guarded
/// connection gives per-run status updates single-writer ordering.
pub struct RecordStore {
    db: Arc<Mutex<Connection>>,
}

impl RecordStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(db: Connection) -> Result<Self> {
        init_schema(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub async fn insert_version(&self, version: &AppVersion) -> Result<()> {
        let manifest_json = serde_json::to_string(&version.manifest)?;
        let output_schema_json = serde_json::to_string(&version.output_schema)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO app_versions (id, manifest_json, run_template, output_schema_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                manifest_json = excluded.manifest_json,
                run_template = excluded.run_template,
                output_schema_json = excluded.output_schema_json",
            params![
                version.id,
                manifest_json,
                version.run_template,
                output_schema_json
            ],
        )?;
        Ok(())
    }

    pub async fn version(&self, version_id: &str) -> Result<Option<AppVersion>> {
        let row = {
            let db = self.db.lock().await;
            db.query_row(
                "SELECT id, manifest_json, run_template, output_schema_json
                 FROM app_versions WHERE id = ?1",
                [version_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?
        };
        match row {
            Some((id, manifest_json, run_template, output_schema_json)) => Ok(Some(AppVersion {
                id,
                manifest: serde_json::from_str(&manifest_json)?,
                run_template,
                output_schema: serde_json::from_str(&output_schema_json)?,
            })),
            None => Ok(None),
        }
    }

    pub async fn install_app(&self, app: &InstalledApp) -> Result<()> {
        let config_json = serde_json::to_string(&app.config)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO installed_apps (id, user_id, version_id, is_enabled, config_json)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                is_enabled = excluded.is_enabled,
                config_json = excluded.config_json",
            params![
                app.id,
                app.user_id,
                app.version_id,
                app.enabled as i64,
                config_json
            ],
        )?;
        Ok(())
    }

    pub async fn installed_app(&self, id: &str) -> Result<Option<InstalledApp>> {
        let row = {
            let db = self.db.lock().await;
            db.query_row(
                "SELECT id, user_id, version_id, is_enabled, config_json
                 FROM installed_apps WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?
        };
        match row {
            Some((id, user_id, version_id, enabled, config_json)) => Ok(Some(InstalledApp {
                id,
                user_id,
                version_id,
                enabled: enabled != 0,
                config: serde_json::from_str(&config_json)?,
            })),
            None => Ok(None),
        }
    }

    pub async fn set_app_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE installed_apps SET is_enabled = ?1 WHERE id = ?2",
            params![enabled as i64, id],
        )?;
        Ok(())
    }

    pub async fn upsert_grant(&self, grant: &Grant) -> Result<()> {
        let options_json = serde_json::to_string(&grant.options)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO installed_app_grants (installed_app_id, connector_type, status, grant_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(installed_app_id, connector_type) DO UPDATE SET
                status = excluded.status,
                grant_json = excluded.grant_json",
            params![
                grant.installed_app_id,
                grant.connector_type,
                grant.status.as_str(),
                options_json
            ],
        )?;
        Ok(())
    }

    /// Grants are only mutated by explicit user action toggling allow/deny.
    pub async fn set_grant_status(
        &self,
        installed_app_id: &str,
        connector_type: &str,
        status: GrantStatus,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE installed_app_grants SET status = ?1
             WHERE installed_app_id = ?2 AND connector_type = ?3",
            params![status.as_str(), installed_app_id, connector_type],
        )?;
        Ok(())
    }

    pub async fn grants_for_app(&self, installed_app_id: &str) -> Result<Vec<Grant>> {
        let rows = {
            let db = self.db.lock().await;
            let mut stmt = db.prepare(
                "SELECT installed_app_id, connector_type, status, grant_json
                 FROM installed_app_grants WHERE installed_app_id = ?1
                 ORDER BY connector_type",
            )?;
            let rows = stmt.query_map([installed_app_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            let mut collected = Vec::new();
            for row in rows {
                collected.push(row?);
            }
            collected
        };

        let mut grants = Vec::with_capacity(rows.len());
        for (installed_app_id, connector_type, status, options_json) in rows {
            grants.push(Grant {
                installed_app_id,
                connector_type,
                status: GrantStatus::parse_or_pending(&status),
                options: serde_json::from_str(&options_json)?,
            });
        }
        Ok(grants)
    }

    pub async fn upsert_connector_account(&self, account: &ConnectorAccount) -> Result<()> {
        let scopes_json = serde_json::to_string(&account.scopes)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO connector_accounts
                (user_id, connector_type, status, access_token_encrypted,
                 refresh_token_encrypted, token_iv, scopes_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, connector_type) DO UPDATE SET
                status = excluded.status,
                access_token_encrypted = excluded.access_token_encrypted,
                refresh_token_encrypted = excluded.refresh_token_encrypted,
                token_iv = excluded.token_iv,
                scopes_json = excluded.scopes_json",
            params![
                account.user_id,
                account.connector_type,
                account.status.as_str(),
                account.tokens.access,
                account.tokens.refresh,
                account.tokens.iv,
                scopes_json
            ],
        )?;
        Ok(())
    }

    pub async fn connector_account(
        &self,
        user_id: &str,
        connector_type: &str,
    ) -> Result<Option<ConnectorAccount>> {
        let row = {
            let db = self.db.lock().await;
            db.query_row(
                "SELECT user_id, connector_type, status, access_token_encrypted,
                        refresh_token_encrypted, token_iv, scopes_json
                 FROM connector_accounts WHERE user_id = ?1 AND connector_type = ?2",
                [user_id, connector_type],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?
        };
        match row {
            Some((user_id, connector_type, status, access, refresh, iv, scopes_json)) => {
                Ok(Some(ConnectorAccount {
                    user_id,
                    connector_type,
                    status: AccountStatus::parse_or_error(&status),
                    tokens: EncryptedTokens {
                        access,
                        refresh,
                        iv,
                    },
                    scopes: serde_json::from_str(&scopes_json)?,
                }))
            }
            None => Ok(None),
        }
    }

    /// Create the run row in `pending` before orchestration begins.
    pub async fn create_run(
        &self,
        installed_app_id: &str,
        user_id: &str,
        version_id: &str,
    ) -> Result<String> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = now_iso();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO runs (id, installed_app_id, user_id, version_id, status, started_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
            params![run_id, installed_app_id, user_id, version_id, started_at],
        )?;
        Ok(run_id)
    }

    /// Apply one status transition. Terminal statuses also stamp
    /// `completed_at`; error message and duration are written when given so
    /// a later update never clears an earlier value.
    pub async fn update_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
        duration_ms: Option<i64>,
    ) -> Result<()> {
        let completed_at = status.is_terminal().then(now_iso);
        let db = self.db.lock().await;
        db.execute(
            "UPDATE runs SET
                status = ?1,
                error_message = COALESCE(?2, error_message),
                duration_ms = COALESCE(?3, duration_ms),
                completed_at = COALESCE(?4, completed_at)
             WHERE id = ?5",
            params![
                status.as_str(),
                error_message,
                duration_ms,
                completed_at,
                run_id
            ],
        )?;
        Ok(())
    }

    pub async fn run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let row = {
            let db = self.db.lock().await;
            db.query_row(
                "SELECT id, installed_app_id, user_id, version_id, status,
                        started_at, completed_at, duration_ms, error_message
                 FROM runs WHERE id = ?1",
                [run_id],
                |row| {
                    Ok(RunRecord {
                        id: row.get(0)?,
                        installed_app_id: row.get(1)?,
                        user_id: row.get(2)?,
                        version_id: row.get(3)?,
                        status: RunStatus::parse(&row.get::<_, String>(4)?)
                            .unwrap_or(RunStatus::Error),
                        started_at: row.get(5)?,
                        completed_at: row.get(6)?,
                        duration_ms: row.get(7)?,
                        error_message: row.get(8)?,
                    })
                },
            )
            .optional()?
        };
        Ok(row)
    }

    pub async fn save_artifact(&self, artifact: &RunArtifact) -> Result<()> {
        let output_json = artifact
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO run_artifacts
                (run_id, output_json, raw_response, model_used, tokens_input, tokens_output)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                artifact.run_id,
                output_json,
                artifact.raw_response,
                artifact.model_used,
                artifact.tokens_input,
                artifact.tokens_output
            ],
        )?;
        Ok(())
    }

    pub async fn artifact(&self, run_id: &str) -> Result<Option<RunArtifact>> {
        let row = {
            let db = self.db.lock().await;
            db.query_row(
                "SELECT run_id, output_json, raw_response, model_used, tokens_input, tokens_output
                 FROM run_artifacts WHERE run_id = ?1",
                [run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?
        };
        match row {
            Some((run_id, output_json, raw_response, model_used, tokens_input, tokens_output)) => {
                let output = output_json
                    .map(|json| serde_json::from_str(&json))
                    .transpose()?;
                Ok(Some(RunArtifact {
                    run_id,
                    output,
                    raw_response,
                    model_used,
                    tokens_input,
                    tokens_output,
                }))
            }
            None => Ok(None),
        }
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn init_schema(db: &Connection) -> Result<()> {
    db.execute(
        "CREATE TABLE IF NOT EXISTS app_versions (
            id TEXT PRIMARY KEY,
            manifest_json TEXT NOT NULL,
            run_template TEXT NOT NULL,
            output_schema_json TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS installed_apps (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            version_id TEXT NOT NULL,
            is_enabled INTEGER NOT NULL DEFAULT 1,
            config_json TEXT NOT NULL DEFAULT '{}',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS installed_app_grants (
            installed_app_id TEXT NOT NULL,
            connector_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            grant_json TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (installed_app_id, connector_type)
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS connector_accounts (
            user_id TEXT NOT NULL,
            connector_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'connected',
            access_token_encrypted TEXT NOT NULL,
            refresh_token_encrypted TEXT,
            token_iv TEXT NOT NULL,
            scopes_json TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (user_id, connector_type)
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            installed_app_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            version_id TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            duration_ms INTEGER,
            error_message TEXT
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS run_artifacts (
            run_id TEXT PRIMARY KEY,
            output_json TEXT,
            raw_response TEXT,
            model_used TEXT,
            tokens_input INTEGER NOT NULL DEFAULT 0,
            tokens_output INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_version(id: &str) -> AppVersion {
        let manifest: AppManifest = serde_json::from_value(json!({
            "name": "Test App",
            "connectors": [{"type": "gmail", "required": true, "scopes": [], "description": ""}],
            "output_schema": {"type": "object"}
        }))
        .unwrap();
        AppVersion {
            id: id.to_string(),
            output_schema: manifest.output_schema.clone(),
            run_template: "Summarize {{config.topic}}".to_string(),
            manifest,
        }
    }

    #[tokio::test]
    async fn version_round_trip() {
        let store = RecordStore::open_in_memory().unwrap();
        store.insert_version(&sample_version("v1")).await.unwrap();
        let loaded = store.version("v1").await.unwrap().expect("version exists");
        assert_eq!(loaded.manifest.name, "Test App");
        assert_eq!(loaded.run_template, "Summarize {{config.topic}}");
        assert!(store.version("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn installed_app_round_trip_and_toggle() {
        let store = RecordStore::open_in_memory().unwrap();
        store.insert_version(&sample_version("v1")).await.unwrap();
        store
            .install_app(&InstalledApp {
                id: "app-1".to_string(),
                user_id: "user-1".to_string(),
                version_id: "v1".to_string(),
                enabled: true,
                config: json!({"topic": "rust"}).as_object().cloned().unwrap(),
            })
            .await
            .unwrap();

        let app = store.installed_app("app-1").await.unwrap().unwrap();
        assert!(app.enabled);
        assert_eq!(app.config["topic"], "rust");

        store.set_app_enabled("app-1", false).await.unwrap();
        assert!(!store.installed_app("app-1").await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn grant_status_toggles() {
        let store = RecordStore::open_in_memory().unwrap();
        store
            .upsert_grant(&Grant {
                installed_app_id: "app-1".to_string(),
                connector_type: "gmail".to_string(),
                status: GrantStatus::Pending,
                options: Map::new(),
            })
            .await
            .unwrap();

        store
            .set_grant_status("app-1", "gmail", GrantStatus::Allowed)
            .await
            .unwrap();
        let grants = store.grants_for_app("app-1").await.unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].status, GrantStatus::Allowed);
    }

    #[tokio::test]
    async fn connector_account_round_trip() {
        let store = RecordStore::open_in_memory().unwrap();
        store
            .upsert_connector_account(&ConnectorAccount {
                user_id: "user-1".to_string(),
                connector_type: "gmail".to_string(),
                status: AccountStatus::Connected,
                tokens: EncryptedTokens {
                    access: "ct-access".to_string(),
                    refresh: None,
                    iv: "00".repeat(12),
                },
                scopes: vec!["gmail.readonly".to_string()],
            })
            .await
            .unwrap();

        let account = store
            .connector_account("user-1", "gmail")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.status, AccountStatus::Connected);
        assert_eq!(account.scopes, vec!["gmail.readonly"]);
        assert!(
            store
                .connector_account("user-1", "google_drive")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn run_lifecycle_updates_apply_in_order() {
        let store = RecordStore::open_in_memory().unwrap();
        let run_id = store.create_run("app-1", "user-1", "v1").await.unwrap();

        let run = store.run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.completed_at.is_none());

        for status in [
            RunStatus::Fetching,
            RunStatus::Processing,
            RunStatus::Validating,
        ] {
            store
                .update_run_status(&run_id, status, None, None)
                .await
                .unwrap();
        }
        store
            .update_run_status(&run_id, RunStatus::Completed, None, Some(1234))
            .await
            .unwrap();

        let run = store.run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.duration_ms, Some(1234));
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn later_update_does_not_clear_error_fields() {
        let store = RecordStore::open_in_memory().unwrap();
        let run_id = store.create_run("app-1", "user-1", "v1").await.unwrap();
        store
            .update_run_status(&run_id, RunStatus::Error, Some("boom"), Some(10))
            .await
            .unwrap();
        store
            .update_run_status(&run_id, RunStatus::Error, None, None)
            .await
            .unwrap();

        let run = store.run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.error_message.as_deref(), Some("boom"));
        assert_eq!(run.duration_ms, Some(10));
    }

    #[tokio::test]
    async fn artifact_round_trip() {
        let store = RecordStore::open_in_memory().unwrap();
        let run_id = store.create_run("app-1", "user-1", "v1").await.unwrap();
        store
            .save_artifact(&RunArtifact {
                run_id: run_id.clone(),
                output: Some(json!({"a": 1})),
                raw_response: Some("{\"a\":1}".to_string()),
                model_used: Some("gemini-2.5-flash".to_string()),
                tokens_input: 12,
                tokens_output: 7,
            })
            .await
            .unwrap();

        let artifact = store.artifact(&run_id).await.unwrap().unwrap();
        assert_eq!(artifact.output, Some(json!({"a": 1})));
        assert_eq!(artifact.tokens_input, 12);
        assert_eq!(artifact.model_used.as_deref(), Some("gemini-2.5-flash"));
    }

    #[tokio::test]
    async fn store_survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");
        {
            let store = RecordStore::open(&path).unwrap();
            store.insert_version(&sample_version("v1")).await.unwrap();
        }
        let store = RecordStore::open(&path).unwrap();
        assert!(store.version("v1").await.unwrap().is_some());
    }
}
