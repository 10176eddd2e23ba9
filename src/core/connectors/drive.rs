use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{ConnectorFetcher, FetchOptions};
use crate::core::manifest::CONNECTOR_GOOGLE_DRIVE;
use crate::core::vault::DecryptedTokens;

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const FILE_FIELDS: &str = "nextPageToken, files(id, name, mimeType, modifiedTime, size)";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "mimeType", default)]
    pub mime_type: Option<String>,
    #[serde(rename = "modifiedTime", default)]
    pub modified_time: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
}

#[derive(Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// Google Drive v3 listing strategy: one `files.list` page, normalized to
/// `{"files": [...]}`.
pub struct DriveFetcher {
    client: Client,
}

impl DriveFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConnectorFetcher for DriveFetcher {
    fn connector_type(&self) -> &'static str {
        CONNECTOR_GOOGLE_DRIVE
    }

    fn default_page_size(&self) -> u32 {
        100
    }

    async fn fetch(&self, tokens: &DecryptedTokens, options: &FetchOptions) -> Result<Value> {
        let mut query = vec![
            ("pageSize".to_string(), options.page_size.to_string()),
            ("fields".to_string(), FILE_FIELDS.to_string()),
        ];
        if let Some(q) = &options.query {
            query.push(("q".to_string(), q.clone()));
        }
        if let Some(token) = &options.page_token {
            query.push(("pageToken".to_string(), token.clone()));
        }

        let res = self
            .client
            .get(FILES_URL)
            .bearer_auth(&tokens.access_token)
            .query(&query)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(anyhow!(
                "Drive files.list failed ({}): {}",
                status,
                res.text().await.unwrap_or_default()
            ));
        }

        let listing: FileListResponse = res.json().await?;
        Ok(json!({ "files": listing.files }))
    }
}
