use std::sync::Arc;

use sync_store::StateStore;
use sync_types::Destination;

/// A webhook-pushed activity is denied admission if we ourselves wrote it to
/// this destination within `retry_window`. Source handlers call this before
/// publishing to `raw-activity`; it is the one piece of the destination
/// protocol that lives upstream of the upload workers.
pub async fn is_bounceback(
    store: &Arc<dyn StateStore>,
    user_id: &str,
    destination: Destination,
    destination_id: &str,
    retry_window: chrono::Duration,
) -> bool {
    let Some(record) = store
        .get_uploaded_activity(user_id, destination, destination_id)
        .await
    else {
        return false;
    };
    record.is_within_window(chrono::Utc::now(), retry_window)
}
