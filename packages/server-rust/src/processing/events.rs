//! Lane handlers: what happens to queued activities.

use std::sync::Arc;

use futures_util::FutureExt;
use tracing::debug;

use crate::worker::{EventHandles, LaneHandler, QueueItem};

fn is_public(item: &QueueItem) -> bool {
    item.payload.get("visibility").and_then(|v| v.as_str()) == Some("public")
}

/// Client lane: side effects of local API calls. Public `Create` activities
/// fan out to the federation lane for delivery.
#[must_use]
pub fn client_handler(events: &EventHandles) -> LaneHandler {
    let enqueue_federation = Arc::clone(&events.enqueue_federation);
    Arc::new(move |item: QueueItem| {
        let enqueue_federation = Arc::clone(&enqueue_federation);
        async move {
            debug!(
                actor = %item.origin_actor,
                activity = %item.activity_type,
                object = %item.object_type,
                "client activity"
            );
            if item.activity_type == "Create" && is_public(&item) {
                let mut delivery = QueueItem::federation(
                    item.origin_actor,
                    item.activity_type,
                    item.object_type,
                )
                .with_payload(item.payload);
                delivery.object_ref = item.object_ref;
                delivery.producer = item.producer;
                enqueue_federation(delivery).await?;
            }
            Ok(())
        }
        .boxed()
    })
}

/// Federation lane: records outbound deliveries.
#[must_use]
pub fn federation_handler() -> LaneHandler {
    Arc::new(|item: QueueItem| {
        async move {
            metrics::counter!(
                "weft_federation_activities_total",
                "activity" => item.activity_type.clone()
            )
            .increment(1);
            debug!(
                actor = %item.origin_actor,
                activity = %item.activity_type,
                object = item.object_ref.as_deref().unwrap_or_default(),
                "federation activity"
            );
            Ok(())
        }
        .boxed()
    })
}
