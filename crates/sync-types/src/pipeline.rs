use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{new_id, Destination, Source};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnricherStep {
    pub provider_id: String,
    #[serde(default)]
    pub inputs: HashMap<String, String>,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub destination: Destination,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

/// User-owned pipeline configuration: one source, an ordered enricher plan,
/// a set of destinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub source: Source,
    #[serde(default)]
    pub enrichers: Vec<EnricherStep>,
    pub destinations: Vec<DestinationConfig>,
    #[serde(default)]
    pub disabled: bool,
}

impl Pipeline {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, source: Source) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.into(),
            name: name.into(),
            source,
            enrichers: Vec::new(),
            destinations: Vec::new(),
            disabled: false,
        }
    }

    /// Invariant: a pipeline is only eligible for matching when it has at
    /// least one destination.
    pub fn is_valid(&self) -> bool {
        !self.destinations.is_empty()
    }

    pub fn destination_set(&self) -> Vec<Destination> {
        self.destinations.iter().map(|d| d.destination).collect()
    }
}
