use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use sync_types::{Destination, Tier};

use crate::adapter::{DestinationAdapter, RemoteRecord, UploadPayload};
use crate::http::{classify_status, require_config};
use crate::DestinationError;

/// Publishes an activity to a user's public showcase page. Gated to Plus
/// and above, unlike the other three adapters.
pub struct ShowcaseDestination {
    client: Client,
    api_base: String,
    user_tier: Tier,
}

impl ShowcaseDestination {
    pub fn new(client: Client, user_tier: Tier) -> Self {
        Self {
            client,
            api_base: "https://showcase.fitglue.app/api".to_string(),
            user_tier,
        }
    }

    fn require_tier(&self) -> Result<(), DestinationError> {
        if self.user_tier == Tier::Free {
            return Err(DestinationError::TierRestricted(
                "public showcase requires Plus or Pro".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DestinationAdapter for ShowcaseDestination {
    fn destination(&self) -> Destination {
        Destination::PublicShowcase
    }

    async fn create(&self, payload: UploadPayload<'_>) -> Result<RemoteRecord, DestinationError> {
        self.require_tier()?;
        let showcase_slug = require_config(payload.config, "showcase_slug")?;
        let token = require_config(payload.config, "access_token")?;

        let response = self
            .client
            .post(format!("{}/showcases/{showcase_slug}/entries", self.api_base))
            .bearer_auth(token)
            .json(&json!({ "title": payload.title, "description": payload.description }))
            .send()
            .await
            .map_err(|err| DestinationError::Transient(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| DestinationError::Permanent(err.to_string()))?;
        let entry_id = body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DestinationError::Permanent("showcase response missing id".to_string()))?;

        Ok(RemoteRecord {
            external_id: entry_id.to_string(),
            title: payload.title.to_string(),
            description: payload.description.to_string(),
        })
    }

    async fn fetch(
        &self,
        external_id: &str,
        config: &std::collections::HashMap<String, String>,
    ) -> Result<RemoteRecord, DestinationError> {
        self.require_tier()?;
        let showcase_slug = require_config(config, "showcase_slug")?;
        let token = require_config(config, "access_token")?;

        let response = self
            .client
            .get(format!(
                "{}/showcases/{showcase_slug}/entries/{external_id}",
                self.api_base
            ))
            .bearer_auth(token)
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
        Ok(RemoteRecord {
            external_id: external_id.to_string(),
            title: body.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            description: body
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        })
    }

    async fn update(
        &self,
        external_id: &str,
        payload: UploadPayload<'_>,
    ) -> Result<(), DestinationError> {
        self.require_tier()?;
        let showcase_slug = require_config(payload.config, "showcase_slug")?;
        let token = require_config(payload.config, "access_token")?;

        let response = self
            .client
            .put(format!(
                "{}/showcases/{showcase_slug}/entries/{external_id}",
                self.api_base
            ))
            .bearer_auth(token)
            .json(&json!({ "title": payload.title, "description": payload.description }))
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
