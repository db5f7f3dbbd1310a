use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::fs;
use tokio::sync::RwLock;

use crate::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Engine-wide configuration: artifact store root, off-load threshold, bus
/// retry budget, per-provider OAuth-client placeholders, and the section-end
/// sentinel destinations must not write past on UPDATE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_artifact_root")]
    pub artifact_bucket_root: String,
    #[serde(default = "default_inlining_threshold")]
    pub inlining_threshold_bytes: u64,
    #[serde(default = "default_retry_budget")]
    pub bus_retry_budget: u32,
    #[serde(default)]
    pub providers: HashMap<String, ProviderCredentials>,
    #[serde(default = "default_section_end_marker")]
    pub section_end_marker: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            artifact_bucket_root: default_artifact_root(),
            inlining_threshold_bytes: default_inlining_threshold(),
            bus_retry_budget: default_retry_budget(),
            providers: HashMap::new(),
            section_end_marker: default_section_end_marker(),
        }
    }
}

fn default_artifact_root() -> String {
    ".fitglue/artifacts".to_string()
}

fn default_inlining_threshold() -> u64 {
    1024 * 1024
}

fn default_retry_budget() -> u32 {
    5
}

fn default_section_end_marker() -> String {
    "<!-- fitglue:end -->".to_string()
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    project: Value,
    env: Value,
    runtime: Value,
}

/// Layered JSON config: defaults < project file < environment variables <
/// runtime overrides, merged on every read so a `patch_runtime` call is
/// visible immediately without a restart.
#[derive(Clone)]
pub struct ConfigStore {
    project_path: PathBuf,
    layers: Arc<RwLock<ConfigLayers>>,
}

impl ConfigStore {
    pub async fn new(project_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let project_path = project_path.as_ref().to_path_buf();
        if let Some(parent) = project_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let project = read_json_file(&project_path).await.unwrap_or_else(|_| empty_object());
        let layers = ConfigLayers {
            project,
            env: env_layer(),
            runtime: empty_object(),
        };
        Ok(Self {
            project_path,
            layers: Arc::new(RwLock::new(layers)),
        })
    }

    pub async fn get(&self) -> EngineConfig {
        let merged = self.get_effective_value().await;
        serde_json::from_value(merged).unwrap_or_default()
    }

    pub async fn get_effective_value(&self) -> Value {
        let layers = self.layers.read().await.clone();
        let mut merged = serde_json::to_value(EngineConfig::default()).unwrap_or_else(|_| empty_object());
        deep_merge(&mut merged, &layers.project);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.runtime);
        merged
    }

    pub async fn patch_project(&self, patch: Value) -> Result<(), StoreError> {
        {
            let mut layers = self.layers.write().await;
            deep_merge(&mut layers.project, &patch);
        }
        self.save_project().await
    }

    pub async fn patch_runtime(&self, patch: Value) {
        let mut layers = self.layers.write().await;
        deep_merge(&mut layers.runtime, &patch);
    }

    async fn save_project(&self) -> Result<(), StoreError> {
        let snapshot = self.layers.read().await.project.clone();
        write_json_file(&self.project_path, &snapshot).await
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn read_json_file(path: &Path) -> Result<Value, StoreError> {
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

async fn write_json_file(path: &Path, value: &Value) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).await?;
    Ok(())
}

/// One function per environment-variable concern, merged with `deep_merge` —
/// same shape as the project this is ported from, minus the channel-specific
/// variables that don't apply here.
fn env_layer() -> Value {
    let mut root = empty_object();

    if let Ok(root_path) = std::env::var("FITGLUE_ARTIFACT_ROOT") {
        if !root_path.trim().is_empty() {
            deep_merge(&mut root, &json!({ "artifact_bucket_root": root_path }));
        }
    }
    if let Ok(threshold) = std::env::var("FITGLUE_INLINING_THRESHOLD_BYTES") {
        if let Ok(parsed) = threshold.parse::<u64>() {
            deep_merge(&mut root, &json!({ "inlining_threshold_bytes": parsed }));
        }
    }
    if let Ok(budget) = std::env::var("FITGLUE_BUS_RETRY_BUDGET") {
        if let Ok(parsed) = budget.parse::<u32>() {
            deep_merge(&mut root, &json!({ "bus_retry_budget": parsed }));
        }
    }
    for (key, value) in std::env::vars() {
        let Some(provider) = key.strip_prefix("FITGLUE_PROVIDER_") else {
            continue;
        };
        let (provider_id, field_key) = if let Some(id) = provider.strip_suffix("_CLIENT_ID") {
            (id, "client_id")
        } else if let Some(id) = provider.strip_suffix("_CLIENT_SECRET") {
            (id, "client_secret")
        } else {
            continue;
        };
        let provider_id = provider_id.to_lowercase();
        deep_merge(
            &mut root,
            &json!({ "providers": { provider_id: { field_key: value } } }),
        );
    }
    root
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_apply_when_project_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json")).await.unwrap();
        let config = store.get().await;
        assert_eq!(config.inlining_threshold_bytes, 1024 * 1024);
        assert_eq!(config.bus_retry_budget, 5);
    }

    #[tokio::test]
    async fn runtime_patch_overrides_project_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json")).await.unwrap();
        store.patch_project(json!({ "bus_retry_budget": 3 })).await.unwrap();
        store.patch_runtime(json!({ "bus_retry_budget": 9 })).await;
        assert_eq!(store.get().await.bus_retry_budget, 9);
    }
}
