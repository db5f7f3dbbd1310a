pub mod artifact;
pub mod config;
mod error;
mod json_store;

pub use artifact::{activity_data_path, enriched_event_path, ArtifactStore, FsArtifactStore};
pub use config::{ConfigStore, EngineConfig, ProviderCredentials};
pub use error::StoreError;
pub use json_store::{JsonFileStore, StateStore};
