use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use sync_types::Destination;

use crate::adapter::{DestinationAdapter, RemoteRecord, UploadPayload};
use crate::http::{classify_status, require_config};
use crate::DestinationError;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Appends (or updates) one row per activity in a user-configured Google
/// Sheet. `external_id` is the sheet row number as a string.
pub struct SheetDestination {
    client: Client,
}

impl SheetDestination {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Default for SheetDestination {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

#[async_trait]
impl DestinationAdapter for SheetDestination {
    fn destination(&self) -> Destination {
        Destination::GoogleSheets
    }

    async fn create(&self, payload: UploadPayload<'_>) -> Result<RemoteRecord, DestinationError> {
        let spreadsheet_id = require_config(payload.config, "spreadsheet_id")?;
        let access_token = require_config(payload.config, "access_token")?;
        let sheet_range = payload.config.get("range").map(String::as_str).unwrap_or("Activities!A:B");

        let url = format!(
            "{SHEETS_API_BASE}/{spreadsheet_id}/values/{sheet_range}:append?valueInputOption=RAW"
        );
        let response = self
            .client
            .post(url)
            .bearer_auth(access_token)
            .json(&json!({ "values": [[payload.title, payload.description]] }))
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
        let updated_range = body
            .get("updates")
            .and_then(|u| u.get("updatedRange"))
            .and_then(|r| r.as_str())
            .ok_or_else(|| DestinationError::Permanent("sheets append missing updatedRange".to_string()))?;
        let row = updated_range
            .rsplit(|c: char| !c.is_ascii_digit())
            .find(|s| !s.is_empty())
            .ok_or_else(|| DestinationError::Permanent(format!("could not parse row from {updated_range}")))?;

        Ok(RemoteRecord {
            external_id: row.to_string(),
            title: payload.title.to_string(),
            description: payload.description.to_string(),
        })
    }

    async fn fetch(
        &self,
        external_id: &str,
        config: &std::collections::HashMap<String, String>,
    ) -> Result<RemoteRecord, DestinationError> {
        let spreadsheet_id = require_config(config, "spreadsheet_id")?;
        let access_token = require_config(config, "access_token")?;
        let url = format!("{SHEETS_API_BASE}/{spreadsheet_id}/values/Activities!A{external_id}:B{external_id}");

        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| DestinationError::Transient(err.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DestinationError::NotFound(format!("row {external_id}")));
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
        let row = body
            .get("values")
            .and_then(|v| v.get(0))
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();
        let title = row.first().and_then(|v| v.as_str()).unwrap_or("").to_string();
        let description = row.get(1).and_then(|v| v.as_str()).unwrap_or("").to_string();

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
        let spreadsheet_id = require_config(payload.config, "spreadsheet_id")?;
        let access_token = require_config(payload.config, "access_token")?;
        let url = format!(
            "{SHEETS_API_BASE}/{spreadsheet_id}/values/Activities!A{external_id}:B{external_id}?valueInputOption=RAW"
        );

        let response = self
            .client
            .put(url)
            .bearer_auth(access_token)
            .json(&json!({ "values": [[payload.title, payload.description]] }))
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
