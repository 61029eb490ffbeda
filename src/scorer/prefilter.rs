use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{info, warn};

use crate::collaborators::{with_timeout, Selector};
use crate::types::NewsEvent;

/// Bound the batch to `max_count` before enrichment.
///
/// Batches that already fit are returned untouched and the selector is not
/// called. Otherwise the selector picks original indices; out-of-range and
/// duplicate picks are dropped, a short pick list is topped up in batch order,
/// and a failed call or a pick list with nothing usable falls back to the
/// first `max_count` events. Output keeps batch order.
pub async fn pre_filter(
    selector: &dyn Selector,
    events: Vec<NewsEvent>,
    max_count: usize,
    timeout: Duration,
) -> Vec<NewsEvent> {
    if events.len() <= max_count {
        return events;
    }

    let total = events.len();
    let picked = match with_timeout("selector", timeout, selector.select(&events, max_count)).await {
        Ok(indices) => {
            let resolved = resolve_selection(&indices, total, max_count);
            if resolved.is_none() {
                warn!(returned = indices.len(), "selector returned no usable indices, truncating batch");
            }
            resolved
        }
        Err(e) => {
            warn!("selector failed, truncating batch to first {max_count}: {e}");
            None
        }
    };
    let picked = picked.unwrap_or_else(|| (0..max_count).collect());

    info!(total, kept = picked.len(), "pre-filter reduced batch");
    events
        .into_iter()
        .enumerate()
        .filter(|(i, _)| picked.contains(i))
        .map(|(_, e)| e)
        .collect()
}

/// Valid, unique indices capped at `k`, topped up from the front of the batch.
/// `None` when the selector gave nothing usable.
fn resolve_selection(indices: &[i64], len: usize, k: usize) -> Option<BTreeSet<usize>> {
    let mut chosen = BTreeSet::new();
    for &i in indices {
        if chosen.len() >= k {
            break;
        }
        if let Ok(idx) = usize::try_from(i) {
            if idx < len {
                chosen.insert(idx);
            }
        }
    }
    if chosen.is_empty() {
        return None;
    }
    for idx in 0..len {
        if chosen.len() >= k {
            break;
        }
        chosen.insert(idx);
    }
    Some(chosen)
}
