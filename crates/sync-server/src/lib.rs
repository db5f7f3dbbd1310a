//! Minimal HTTP surface: a stand-in ingress handler (the real webhook /
//! signature-verification frontend is out of scope) plus pipeline-run
//! lookup and a health check. Modeled on the teacher server crate's
//! `serve`/`app_router` split.

mod http;

pub use http::serve;

use std::sync::Arc;

use sync_bus::MessageBus;
use sync_destinations::is_bounceback;
use sync_store::{ArtifactStore, StateStore};

#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<dyn MessageBus>,
    pub store: Arc<dyn StateStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub bounceback_window: chrono::Duration,
}

impl AppState {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn StateStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            bus,
            store,
            artifacts,
            bounceback_window: chrono::Duration::minutes(10),
        }
    }

    pub async fn is_bounceback(
        &self,
        user_id: &str,
        destination: sync_types::Destination,
        destination_id: &str,
    ) -> bool {
        is_bounceback(&self.store, user_id, destination, destination_id, self.bounceback_window).await
    }
}
