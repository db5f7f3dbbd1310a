use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Plus,
    Pro,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrationBlock {
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub tier: Tier,
    #[serde(default)]
    pub access_enabled: bool,
    #[serde(default)]
    pub integrations: HashMap<String, IntegrationBlock>,
    #[serde(default)]
    pub sync_counters: HashMap<String, u64>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tier: Tier::Free,
            access_enabled: true,
            integrations: HashMap::new(),
            sync_counters: HashMap::new(),
        }
    }
}
