//! Expiry sweep shared by the backends.

use crate::traits::StorageResult;
use chrono::{DateTime, Utc};
use pixstash_core::MediaItem;
use std::future::Future;

/// Run `purge` for every candidate expired at `now`, one at a time.
///
/// `purge` returns `Ok(false)` when the item no longer needs removing (it
/// vanished or had its expiry moved in the meantime). Errors are logged and
/// the sweep moves on; the count covers items actually removed.
pub(crate) async fn sweep_expired<F, Fut>(
    candidates: Vec<MediaItem>,
    now: DateTime<Utc>,
    mut purge: F,
) -> usize
where
    F: FnMut(MediaItem) -> Fut,
    Fut: Future<Output = StorageResult<bool>>,
{
    let mut removed = 0;

    for item in candidates.into_iter().filter(|item| item.is_expired_at(now)) {
        let id = item.id.clone();
        match purge(item).await {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::error!(id = %id, error = %e, "Failed to remove expired item, continuing");
            }
        }
    }

    tracing::info!(removed, "Expired item sweep finished");
    removed
}
