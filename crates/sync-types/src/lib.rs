pub mod activity;
pub mod event;
pub mod ingest;
pub mod metadata;
pub mod pending_input;
pub mod pipeline;
pub mod run;
pub mod section;
pub mod uploaded;
pub mod user;

pub use activity::*;
pub use event::*;
pub use ingest::RawActivityMessage;
pub use metadata::MetadataBag;
pub use pending_input::*;
pub use pipeline::*;
pub use run::*;
pub use uploaded::*;
pub use user::*;

use serde::{Deserialize, Serialize};

/// Source providers an activity can originate from. Shared by `Pipeline.source`
/// and `StandardizedActivity.source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Strava,
    Garmin,
    Polar,
    Suunto,
    Coros,
    ManualUpload,
}

/// Destination providers a pipeline can fan out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Strava,
    GoogleSheets,
    GitRepo,
    ObjectStorage,
    PublicShowcase,
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Destination::Strava => "strava",
            Destination::GoogleSheets => "google_sheets",
            Destination::GitRepo => "git_repo",
            Destination::ObjectStorage => "object_storage",
            Destination::PublicShowcase => "public_showcase",
        };
        f.write_str(s)
    }
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
