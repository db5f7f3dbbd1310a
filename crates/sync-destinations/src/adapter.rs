use async_trait::async_trait;
use sync_types::Destination;

use crate::DestinationError;

/// What an adapter reads from / writes to the remote service. `description`
/// carries the full section-protocol document; `raw` is whatever the
/// provider needs to reconstruct a PUT/update body (opaque to the worker).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteRecord {
    pub external_id: String,
    pub title: String,
    pub description: String,
}

/// What the worker hands an adapter for a CREATE or UPDATE call: the merged
/// title/description plus the destination's own config slice (already
/// stripped of its key prefix).
pub struct UploadPayload<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub config: &'a std::collections::HashMap<String, String>,
}

/// One destination's native create/fetch/update calls. Implementors own
/// HTTP and auth; the worker owns the state machine around them.
#[async_trait]
pub trait DestinationAdapter: Send + Sync {
    fn destination(&self) -> Destination;

    async fn create(&self, payload: UploadPayload<'_>) -> Result<RemoteRecord, DestinationError>;

    async fn fetch(
        &self,
        external_id: &str,
        config: &std::collections::HashMap<String, String>,
    ) -> Result<RemoteRecord, DestinationError>;

    async fn update(
        &self,
        external_id: &str,
        payload: UploadPayload<'_>,
    ) -> Result<(), DestinationError>;
}
