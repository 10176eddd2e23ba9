pub mod drive;
pub mod gmail;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::info;

use crate::core::vault::DecryptedTokens;

/// Provider-agnostic fetch parameters mapped from a grant's free-form
/// options payload.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub page_size: u32,
    pub page_token: Option<String>,
    pub query: Option<String>,
}

impl FetchOptions {
    /// Map grant options, accepting both historically-used key spellings:
    /// `pageSize`/`maxResults` for the result-size hint and `query`/`q` for
    /// the free-text filter.
    pub fn from_grant_options(options: &Map<String, Value>, default_page_size: u32) -> Self {
        let page_size = options
            .get("pageSize")
            .or_else(|| options.get("maxResults"))
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(default_page_size);
        let page_token = options
            .get("pageToken")
            .and_then(Value::as_str)
            .map(str::to_string);
        let query = options
            .get("query")
            .or_else(|| options.get("q"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            page_size,
            page_token,
            query,
        }
    }
}

/// One connector's listing strategy: given decrypted credentials and fetch
/// options, return the normalized data bag stored under the connector-type
/// key (e.g. `{"files": [...]}`). A single first page, no auto-pagination.
#[async_trait]
pub trait ConnectorFetcher: Send + Sync {
    fn connector_type(&self) -> &'static str;

    /// Provider-specific result-size default applied when the grant does
    /// not carry one.
    fn default_page_size(&self) -> u32;

    async fn fetch(&self, tokens: &DecryptedTokens, options: &FetchOptions) -> Result<Value>;
}

/// Maps connector type to its fetch strategy. Adding a connector means
/// registering a new fetcher, not editing a branch.
#[derive(Default)]
pub struct ConnectorRegistry {
    fetchers: HashMap<String, Box<dyn ConnectorFetcher>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the standard Google fetchers, sharing one HTTP client.
    pub fn with_google_connectors(client: Client) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(drive::DriveFetcher::new(client.clone())));
        registry.register(Box::new(gmail::GmailFetcher::new(client)));
        registry
    }

    pub fn register(&mut self, fetcher: Box<dyn ConnectorFetcher>) {
        info!("Registered connector fetcher: {}", fetcher.connector_type());
        self.fetchers
            .insert(fetcher.connector_type().to_string(), fetcher);
    }

    pub fn get(&self, connector_type: &str) -> Option<&dyn ConnectorFetcher> {
        self.fetchers.get(connector_type).map(|f| f.as_ref())
    }

    pub fn registered_types(&self) -> Vec<&str> {
        self.fetchers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn maps_canonical_option_keys() {
        let opts = FetchOptions::from_grant_options(
            &options(json!({"pageSize": 25, "query": "is:unread", "pageToken": "tok"})),
            100,
        );
        assert_eq!(opts.page_size, 25);
        assert_eq!(opts.query.as_deref(), Some("is:unread"));
        assert_eq!(opts.page_token.as_deref(), Some("tok"));
    }

    #[test]
    fn accepts_legacy_key_spellings() {
        let opts = FetchOptions::from_grant_options(
            &options(json!({"maxResults": 10, "q": "report"})),
            100,
        );
        assert_eq!(opts.page_size, 10);
        assert_eq!(opts.query.as_deref(), Some("report"));
    }

    #[test]
    fn canonical_keys_win_over_legacy_ones() {
        let opts = FetchOptions::from_grant_options(
            &options(json!({"pageSize": 5, "maxResults": 50, "query": "a", "q": "b"})),
            100,
        );
        assert_eq!(opts.page_size, 5);
        assert_eq!(opts.query.as_deref(), Some("a"));
    }

    #[test]
    fn empty_options_fall_back_to_provider_default() {
        let opts = FetchOptions::from_grant_options(&Map::new(), 50);
        assert_eq!(opts.page_size, 50);
        assert!(opts.query.is_none());
        assert!(opts.page_token.is_none());
    }

    #[test]
    fn registry_resolves_registered_types_only() {
        let registry = ConnectorRegistry::with_google_connectors(Client::new());
        assert!(registry.get("google_drive").is_some());
        assert!(registry.get("gmail").is_some());
        assert!(registry.get("notion").is_none());
        assert_eq!(registry.get("google_drive").unwrap().default_page_size(), 100);
        assert_eq!(registry.get("gmail").unwrap().default_page_size(), 50);
    }
}
