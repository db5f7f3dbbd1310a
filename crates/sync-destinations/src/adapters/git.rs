use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::json;
use sync_types::Destination;

use crate::adapter::{DestinationAdapter, RemoteRecord, UploadPayload};
use crate::http::{classify_status, require_config};
use crate::DestinationError;

/// Commits one Markdown file per activity to a GitHub-style contents API.
/// `external_id` is the file path within the repo, which doubles as the
/// content-addressed key GitHub's contents API needs for updates (it also
/// requires the blob's current `sha`, fetched on demand).
pub struct GitDestination {
    client: Client,
    api_base: String,
}

impl GitDestination {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            api_base: "https://api.github.com".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base(client: Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
        }
    }
}

impl Default for GitDestination {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

fn file_path(config: &std::collections::HashMap<String, String>, title: &str) -> String {
    let dir = config.get("directory").map(String::as_str).unwrap_or("activities");
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    format!("{dir}/{slug}.md")
}

#[async_trait]
impl DestinationAdapter for GitDestination {
    fn destination(&self) -> Destination {
        Destination::GitRepo
    }

    async fn create(&self, payload: UploadPayload<'_>) -> Result<RemoteRecord, DestinationError> {
        let repo = require_config(payload.config, "repo")?;
        let token = require_config(payload.config, "access_token")?;
        let path = file_path(payload.config, payload.title);
        let url = format!("{}/repos/{repo}/contents/{path}", self.api_base);
        let content = format!("# {}\n\n{}\n", payload.title, payload.description);

        let response = self
            .client
            .put(&url)
            .bearer_auth(token)
            .header("User-Agent", "fitglue-sync-engine")
            .json(&json!({
                "message": format!("fitglue: add {}", payload.title),
                "content": base64::engine::general_purpose::STANDARD.encode(&content),
            }))
            .send()
            .await
            .map_err(|err| DestinationError::Transient(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        Ok(RemoteRecord {
            external_id: path,
            title: payload.title.to_string(),
            description: payload.description.to_string(),
        })
    }

    async fn fetch(
        &self,
        external_id: &str,
        config: &std::collections::HashMap<String, String>,
    ) -> Result<RemoteRecord, DestinationError> {
        let repo = require_config(config, "repo")?;
        let token = require_config(config, "access_token")?;
        let url = format!("{}/repos/{repo}/contents/{external_id}", self.api_base);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("User-Agent", "fitglue-sync-engine")
            .send()
            .await
            .map_err(|err| DestinationError::Transient(err.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DestinationError::NotFound(external_id.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| DestinationError::Permanent(err.to_string()))?;
        let encoded = body
            .get("content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| DestinationError::Permanent("contents response missing content".to_string()))?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.replace('\n', ""))
            .map_err(|err| DestinationError::Permanent(err.to_string()))?;
        let text = String::from_utf8_lossy(&decoded).to_string();
        let (title, description) = text
            .strip_prefix("# ")
            .and_then(|rest| rest.split_once("\n\n"))
            .map(|(title, description)| (title.to_string(), description.trim_end().to_string()))
            .unwrap_or((String::new(), text));

        Ok(RemoteRecord {
            external_id: external_id.to_string(),
            title,
            description,
        })
    }

    async fn update(
        &self,
        external_id: &str,
        payload: UploadPayload<'_>,
    ) -> Result<(), DestinationError> {
        let repo = require_config(payload.config, "repo")?;
        let token = require_config(payload.config, "access_token")?;
        let url = format!("{}/repos/{repo}/contents/{external_id}", self.api_base);

        let existing = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("User-Agent", "fitglue-sync-engine")
            .send()
            .await
            .map_err(|err| DestinationError::Transient(err.to_string()))?;
        if !existing.status().is_success() {
            let status = existing.status();
            let body = existing.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }
        let existing_body: serde_json::Value = existing
            .json()
            .await
            .map_err(|err| DestinationError::Permanent(err.to_string()))?;
        let sha = existing_body
            .get("sha")
            .and_then(|s| s.as_str())
            .ok_or_else(|| DestinationError::Permanent("contents response missing sha".to_string()))?;

        let content = format!("# {}\n\n{}\n", payload.title, payload.description);
        let response = self
            .client
            .put(&url)
            .bearer_auth(token)
            .header("User-Agent", "fitglue-sync-engine")
            .json(&json!({
                "message": format!("fitglue: update {}", payload.title),
                "content": base64::engine::general_purpose::STANDARD.encode(&content),
                "sha": sha,
            }))
            .send()
            .await
            .map_err(|err| DestinationError::Transient(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }
        Ok(())
    }
}
