use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{ConnectorFetcher, FetchOptions};
use crate::core::manifest::CONNECTOR_GMAIL;
use crate::core::vault::DecryptedTokens;

const MESSAGES_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailMessageRef {
    pub id: String,
    #[serde(rename = "threadId", default)]
    pub thread_id: Option<String>,
}

#[derive(Deserialize)]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<GmailMessageRef>,
}

/// Gmail v1 listing strategy: one `messages.list` page, normalized to
/// `{"messages": [...]}`.
pub struct GmailFetcher {
    client: Client,
}

impl GmailFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConnectorFetcher for GmailFetcher {
    fn connector_type(&self) -> &'static str {
        CONNECTOR_GMAIL
    }

    fn default_page_size(&self) -> u32 {
        50
    }

    async fn fetch(&self, tokens: &DecryptedTokens, options: &FetchOptions) -> Result<Value> {
        let mut query = vec![("maxResults".to_string(), options.page_size.to_string())];
        if let Some(q) = &options.query {
            query.push(("q".to_string(), q.clone()));
        }
        if let Some(token) = &options.page_token {
            query.push(("pageToken".to_string(), token.clone()));
        }

        let res = self
            .client
            .get(MESSAGES_URL)
            .bearer_auth(&tokens.access_token)
            .query(&query)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(anyhow!(
                "Gmail messages.list failed ({}): {}",
                status,
                res.text().await.unwrap_or_default()
            ));
        }

        let listing: MessageListResponse = res.json().await?;
        Ok(json!({ "messages": listing.messages }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_listing_response() {
        let listing: MessageListResponse = serde_json::from_str(
            r#"{
                "messages": [
                    {"id": "m1", "threadId": "t1"},
                    {"id": "m2"}
                ],
                "resultSizeEstimate": 2
            }"#,
        )
        .unwrap();
        assert_eq!(listing.messages.len(), 2);
        assert_eq!(listing.messages[0].thread_id.as_deref(), Some("t1"));
        assert!(listing.messages[1].thread_id.is_none());
    }

    #[test]
    fn empty_mailbox_defaults_to_no_messages() {
        let listing: MessageListResponse = serde_json::from_str("{}").unwrap();
        assert!(listing.messages.is_empty());
    }
}
