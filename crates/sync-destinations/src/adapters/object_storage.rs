use async_trait::async_trait;
use reqwest::Client;
use sync_types::Destination;

use crate::adapter::{DestinationAdapter, RemoteRecord, UploadPayload};
use crate::http::{classify_status, require_config};
use crate::DestinationError;

/// Writes one JSON object per activity to an S3-compatible bucket via its
/// presigned-URL-free PUT/GET object API. `external_id` is the object key.
pub struct ObjectStorageDestination {
    client: Client,
}

impl ObjectStorageDestination {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Default for ObjectStorageDestination {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

fn object_key(config: &std::collections::HashMap<String, String>, activity_id: &str) -> String {
    let prefix = config.get("prefix").map(String::as_str).unwrap_or("activities");
    format!("{prefix}/{activity_id}.json")
}

fn object_body(record: &RemoteRecord) -> serde_json::Value {
    serde_json::json!({ "title": record.title, "description": record.description })
}

#[async_trait]
impl DestinationAdapter for ObjectStorageDestination {
    fn destination(&self) -> Destination {
        Destination::ObjectStorage
    }

    async fn create(&self, payload: UploadPayload<'_>) -> Result<RemoteRecord, DestinationError> {
        let bucket_url = require_config(payload.config, "bucket_url")?;
        let activity_id = require_config(payload.config, "activity_id")?;
        let key = object_key(payload.config, activity_id);
        let record = RemoteRecord {
            external_id: key.clone(),
            title: payload.title.to_string(),
            description: payload.description.to_string(),
        };

        let response = self
            .client
            .put(format!("{bucket_url}/{key}"))
            .json(&object_body(&record))
            .send()
            .await
            .map_err(|err| DestinationError::Transient(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }
        Ok(record)
    }

    async fn fetch(
        &self,
        external_id: &str,
        config: &std::collections::HashMap<String, String>,
    ) -> Result<RemoteRecord, DestinationError> {
        let bucket_url = require_config(config, "bucket_url")?;
        let response = self
            .client
            .get(format!("{bucket_url}/{external_id}"))
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
        let bucket_url = require_config(payload.config, "bucket_url")?;
        let record = RemoteRecord {
            external_id: external_id.to_string(),
            title: payload.title.to_string(),
            description: payload.description.to_string(),
        };
        let response = self
            .client
            .put(format!("{bucket_url}/{external_id}"))
            .json(&object_body(&record))
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
